//! HTTP API server.
//!
//! Exposes the pipeline over a JSON API whose endpoints map 1:1 to the CLI
//! subcommands. Success responses share one envelope:
//!
//! ```json
//! { "result": ..., "sources": ["<origin locators used>"], "error": null }
//! ```
//!
//! Errors carry the same envelope with `result: null` and a structured
//! error body:
//!
//! ```json
//! { "result": null, "sources": [], "error": { "code": "timeout", "message": "..." } }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/build-context` | Ingest a source and index it |
//! | `POST` | `/query` | Answer a question over the index |
//! | `POST` | `/summarize` | Ingest a source and summarize it |
//! | `POST` | `/agent/run` | Run a bounded agent task |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Status classes follow the error taxonomy: caller/config errors are 4xx,
//! backend failures are 5xx, timeouts are 408.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::adapter::{AdapterSet, SourceAdapter};
use crate::chunk::ChunkParams;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::ContextError;
use crate::index::VectorIndex;
use crate::models::{QueryFilters, SourceKind};
use crate::orchestrate::{AskOptions, Orchestrator};
use crate::pipeline;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub adapters: Arc<AdapterSet>,
    pub embedder: Arc<Embedder>,
    pub index: Arc<VectorIndex>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Start the API server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/build-context", post(handle_build_context))
        .route("/query", post(handle_query))
        .route("/summarize", post(handle_summarize))
        .route("/agent/run", post(handle_agent_run))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("API server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Response envelope ============

/// Success envelope shared by all endpoints.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    result: T,
    sources: Vec<String>,
    error: Option<ErrorDetail>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(result: T, sources: Vec<String>) -> Json<Self> {
        Json(Self {
            result,
            sources,
            error: None,
        })
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that renders the error envelope with the right
/// status class.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "result": null,
            "sources": [],
            "error": { "code": self.code, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<ContextError> for AppError {
    fn from(err: ContextError) -> Self {
        let message = err.to_string();
        match err {
            ContextError::Config(_) => bad_request(message),
            ContextError::Ingestion { .. } | ContextError::Parse { .. } => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "source_error",
                message,
            },
            ContextError::DimensionMismatch { .. } | ContextError::ModelMismatch { .. } => {
                AppError {
                    status: StatusCode::BAD_REQUEST,
                    code: "index_mismatch",
                    message,
                }
            }
            ContextError::Fetch { .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "fetch_failed",
                message,
            },
            ContextError::Embedding { .. } | ContextError::Generation { .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "backend_error",
                message,
            },
            ContextError::Timeout { .. } => AppError {
                status: StatusCode::REQUEST_TIMEOUT,
                code: "timeout",
                message,
            },
            ContextError::MaxStepsExceeded { .. } | ContextError::AgentResponse(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "agent_failed",
                message,
            },
            ContextError::IncompatibleIndex { .. }
            | ContextError::CorruptIndex { .. }
            | ContextError::Io(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message,
            },
        }
    }
}

fn parse_kind(kind: &str) -> Result<SourceKind, AppError> {
    match kind {
        "directory" | "directory_file" => Ok(SourceKind::DirectoryFile),
        "web" => Ok(SourceKind::Web),
        "pdf" => Ok(SourceKind::Pdf),
        other => Err(bad_request(format!(
            "unknown source kind '{}'; expected directory, web, or pdf",
            other
        ))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /build-context ============

#[derive(Deserialize)]
struct BuildRequest {
    kind: String,
    locator: String,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
}

#[derive(Serialize)]
struct BuildResult {
    documents_indexed: usize,
    documents_empty: usize,
    chunks_indexed: usize,
    failures: Vec<BuildFailure>,
}

#[derive(Serialize)]
struct BuildFailure {
    origin: String,
    error: String,
}

async fn handle_build_context(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<ApiResponse<BuildResult>>, AppError> {
    let kind = parse_kind(&req.kind)?;
    let params = ChunkParams::new(
        req.chunk_size.unwrap_or(state.config.chunking.chunk_size),
        req.overlap.unwrap_or(state.config.chunking.overlap),
    )?;

    let outcome = pipeline::build_context(
        &state.adapters,
        &state.embedder,
        &state.index,
        kind,
        &req.locator,
        &params,
    )
    .await?;
    state.index.persist(&state.config.index.snapshot)?;

    let sources = outcome.origins.clone();
    let result = BuildResult {
        documents_indexed: outcome.documents_indexed,
        documents_empty: outcome.documents_empty,
        chunks_indexed: outcome.chunks_indexed,
        failures: outcome
            .failures
            .iter()
            .map(|f| BuildFailure {
                origin: f.origin.clone(),
                error: f.error.to_string(),
            })
            .collect(),
    };
    Ok(ApiResponse::ok(result, sources))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    text: String,
    top_k: Option<usize>,
    token_budget: Option<usize>,
    kind: Option<String>,
    origin_prefix: Option<String>,
    timeout_secs: Option<u64>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let opts = ask_options(&state, req.top_k, req.token_budget, req.kind, req.origin_prefix, req.timeout_secs)?;
    let output = state.orchestrator.answer(&req.text, &opts).await?;
    Ok(ApiResponse::ok(output.text, output.sources))
}

// ============ POST /summarize ============

#[derive(Deserialize)]
struct SummarizeRequest {
    kind: String,
    locator: String,
    token_budget: Option<usize>,
    timeout_secs: Option<u64>,
}

async fn handle_summarize(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let kind = parse_kind(&req.kind)?;
    let adapter = state
        .adapters
        .find(kind)
        .ok_or_else(|| bad_request(format!("no adapter for source kind '{}'", kind)))?;

    let report = adapter.ingest(&req.locator).await?;
    if report.documents.is_empty() {
        return Err(bad_request(format!(
            "nothing to summarize at '{}'",
            req.locator
        )));
    }

    let params = ChunkParams::new(
        state.config.chunking.chunk_size,
        state.config.chunking.overlap,
    )?;
    let budget = req
        .token_budget
        .unwrap_or(state.config.retrieval.token_budget);
    let block = pipeline::sequential_block(&report.documents, &params, budget);

    let timeout = req.timeout_secs.map(Duration::from_secs);
    let output = state.orchestrator.summarize_block(&block, timeout).await?;
    Ok(ApiResponse::ok(output.text, output.sources))
}

// ============ POST /agent/run ============

#[derive(Deserialize)]
struct AgentRequest {
    task: String,
    max_steps: Option<usize>,
    top_k: Option<usize>,
    token_budget: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct AgentResult {
    answer: String,
    steps: Vec<crate::orchestrate::AgentStep>,
}

async fn handle_agent_run(
    State(state): State<AppState>,
    Json(req): Json<AgentRequest>,
) -> Result<Json<ApiResponse<AgentResult>>, AppError> {
    if req.task.trim().is_empty() {
        return Err(bad_request("task must not be empty"));
    }

    let opts = ask_options(&state, req.top_k, req.token_budget, None, None, req.timeout_secs)?;
    let max_steps = req.max_steps.unwrap_or(state.config.agent.max_steps);
    let outcome = state
        .orchestrator
        .run_agent(&req.task, max_steps, &opts)
        .await?;

    Ok(ApiResponse::ok(
        AgentResult {
            answer: outcome.answer,
            steps: outcome.steps,
        },
        outcome.sources,
    ))
}

fn ask_options(
    state: &AppState,
    top_k: Option<usize>,
    token_budget: Option<usize>,
    kind: Option<String>,
    origin_prefix: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<AskOptions, AppError> {
    let mut opts = AskOptions::new(
        top_k.unwrap_or(state.config.retrieval.top_k),
        token_budget.unwrap_or(state.config.retrieval.token_budget),
    );
    opts.filters = QueryFilters {
        kind: kind.as_deref().map(parse_kind).transpose()?,
        origin_prefix,
    };
    let timeout = timeout_secs.unwrap_or(state.config.retrieval.timeout_secs);
    if timeout > 0 {
        opts.timeout = Some(Duration::from_secs(timeout));
    }
    Ok(opts)
}
