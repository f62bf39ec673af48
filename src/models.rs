//! Core data models used throughout context-forge.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Approximate chars-per-token ratio used for all budget accounting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate the token cost of a text under the 4-chars-per-token
/// heuristic. Empty text costs zero tokens.
pub fn approx_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Which adapter produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Web,
    DirectoryFile,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Web => "web",
            SourceKind::DirectoryFile => "directory_file",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of text extraction for a document that was produced.
///
/// Items that fail extraction outright never become documents; they are
/// reported as ingestion failures instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Text was extracted.
    Complete,
    /// The source was readable but yielded no text (e.g. an image-only PDF).
    Empty,
}

/// A normalized source document. Immutable once created; re-ingesting the
/// same origin produces a new document that supersedes the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kind: SourceKind,
    /// Origin locator: a filesystem path or a URL.
    pub origin: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub status: ExtractionStatus,
}

/// A bounded span of a document's body, the unit of indexing and retrieval.
///
/// Chunk identity is deterministic (derived from the owning document id and
/// the ordinal), so re-chunking the same document with the same parameters
/// yields identical chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    /// Character offset range into the document body.
    pub start: usize,
    pub end: usize,
    /// True when this chunk shares its leading characters with the tail of
    /// the previous chunk.
    pub overlaps_previous: bool,
}

/// A fixed-dimensionality vector for one chunk, tagged with the model that
/// produced it. All embeddings in one index share the same model and
/// dimensionality; mixing is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// Chunk + embedding + denormalized provenance, stored together so
/// retrieval needs no join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
    pub kind: SourceKind,
    pub origin: String,
}

/// Optional constraints applied during index search.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub kind: Option<SourceKind>,
    pub origin_prefix: Option<String>,
}

impl QueryFilters {
    /// Whether an entry passes all configured filters.
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(ref prefix) = self.origin_prefix {
            if !entry.origin.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One scored hit from the index.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Ordered retrieval hits, scores non-increasing by position. An empty
/// result means "no context available", which is distinct from failure.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredEntry>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// One formatted passage inside a [`ContextBlock`].
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    /// Template-formatted text, provenance included.
    pub text: String,
    pub origin: String,
    pub score: f32,
}

/// The final assembled, budget-constrained context handed to the
/// generation backend. Invariant: `token_count` never exceeds the
/// requested budget.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBlock {
    pub passages: Vec<Passage>,
    pub token_count: usize,
}

impl ContextBlock {
    /// Concatenate all passages into one prompt-ready string.
    pub fn joined(&self) -> String {
        self.passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Unique origin locators in passage order, for provenance reporting.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for p in &self.passages {
            if !seen.iter().any(|s| s == &p.origin) {
                seen.push(p.origin.clone());
            }
        }
        seen
    }
}
