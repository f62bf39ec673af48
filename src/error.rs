//! Error taxonomy for context-forge.
//!
//! [`ContextError`] is the library's typed error. Per-item ingestion and
//! fetch/parse failures are recoverable and carry the offending origin;
//! embedding/generation exhaustion, index mismatches, timeouts, and the
//! agent step ceiling are surfaced as distinct variants so callers (the
//! CLI and the HTTP server) can map them to the right exit code or status.
//! The binary and server boundaries wrap these in `anyhow`.

use thiserror::Error;

/// Convenience alias: defaults the error type to [`ContextError`] while
/// still allowing an explicit error type (e.g. the server's `AppError`).
pub type Result<T, E = ContextError> = std::result::Result<T, E>;

/// The library's typed error.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A source could not be ingested. Recoverable per-item: the origin is
    /// retained so the failure can be reported without aborting the batch.
    #[error("failed to ingest '{origin}': {reason}")]
    Ingestion { origin: String, reason: String },

    /// A remote resource could not be fetched.
    #[error("failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// A fetched resource could not be parsed into text.
    #[error("failed to parse '{origin}': {reason}")]
    Parse { origin: String, reason: String },

    /// The embedding backend failed after exhausting retries.
    #[error("embedding with '{model}' failed after {attempts} attempt(s): {reason}")]
    Embedding {
        model: String,
        attempts: u32,
        reason: String,
    },

    /// The generation backend failed.
    #[error("generation with '{model}' failed: {reason}")]
    Generation { model: String, reason: String },

    /// The agent produced an unusable response.
    #[error("agent response error: {0}")]
    AgentResponse(String),

    /// The agent reached its bounded step ceiling without finishing.
    #[error("agent exceeded step ceiling of {limit} (at step {step})")]
    MaxStepsExceeded { limit: usize, step: usize },

    /// An operation exceeded its deadline.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A vector's dimensionality does not match the index.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// An entry's embedding model does not match the index.
    #[error("model mismatch: expected '{expected}', got '{got}'")]
    ModelMismatch { expected: String, got: String },

    /// A snapshot's version is not supported by this build.
    #[error("incompatible index snapshot '{path}': expected version {expected}, got {got}")]
    IncompatibleIndex {
        path: String,
        expected: u32,
        got: u32,
    },

    /// A snapshot failed integrity validation.
    #[error("corrupt index snapshot '{path}': {reason}")]
    CorruptIndex { path: String, reason: String },

    /// A configuration value was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An underlying I/O operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
