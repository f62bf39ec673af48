//! Build-time pipeline: ingest → chunk → embed → index.
//!
//! Documents are independent, so the pipeline fans out one task per
//! document. The only shared mutable state is the vector index, whose
//! write lock serializes `add` calls while searches keep running. Per-item
//! ingestion failures are collected and reported alongside successes; an
//! embedding failure is fatal for the whole build.

use std::sync::Arc;

use crate::adapter::{AdapterSet, IngestFailure, SourceAdapter};
use crate::chunk::{chunk_document, ChunkParams};
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::{ContextError, Result};
use crate::index::VectorIndex;
use crate::models::{
    ContextBlock, Document, Embedding, ExtractionStatus, IndexEntry, RetrievalResult, ScoredEntry,
    SourceKind,
};

/// Counters and per-item failures from one build run.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Documents chunked, embedded, and added to the index.
    pub documents_indexed: usize,
    /// Documents skipped because extraction yielded no text.
    pub documents_empty: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Per-item ingestion failures (the batch continued past them).
    pub failures: Vec<IngestFailure>,
    /// Origin locators that were indexed.
    pub origins: Vec<String>,
}

impl BuildOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Ingest one locator and index everything it yields.
///
/// Re-ingesting an origin supersedes its previous entries: the old
/// document's entries are removed and fresh ones are added.
pub async fn build_context(
    adapters: &AdapterSet,
    embedder: &Arc<Embedder>,
    index: &Arc<VectorIndex>,
    kind: SourceKind,
    locator: &str,
    params: &ChunkParams,
) -> Result<BuildOutcome> {
    let adapter = adapters
        .find(kind)
        .ok_or_else(|| ContextError::Config(format!("no adapter for source kind '{}'", kind)))?;

    let report = adapter.ingest(locator).await?;
    tracing::info!(
        kind = %kind,
        locator,
        ok = report.ok_count(),
        failed = report.failed_count(),
        "ingested source"
    );

    let mut outcome = BuildOutcome {
        failures: report.failures,
        ..BuildOutcome::default()
    };

    let mut join_set = tokio::task::JoinSet::new();
    for document in report.documents {
        if document.status == ExtractionStatus::Empty {
            outcome.documents_empty += 1;
            continue;
        }
        let embedder = Arc::clone(embedder);
        let index = Arc::clone(index);
        let params = *params;
        join_set.spawn(async move { index_document(&embedder, &index, document, &params).await });
    }

    while let Some(joined) = join_set.join_next().await {
        let (origin, chunk_count) = joined.map_err(|e| ContextError::Ingestion {
            origin: locator.to_string(),
            reason: format!("indexing task failed: {}", e),
        })??;
        outcome.documents_indexed += 1;
        outcome.chunks_indexed += chunk_count;
        outcome.origins.push(origin);
    }
    outcome.origins.sort();

    Ok(outcome)
}

/// Chunk, embed, and index one document. Returns the origin and the number
/// of chunks written.
async fn index_document(
    embedder: &Embedder,
    index: &VectorIndex,
    document: Document,
    params: &ChunkParams,
) -> Result<(String, usize)> {
    let chunks = chunk_document(&document, params);
    if chunks.is_empty() {
        return Ok((document.origin, 0));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    let model = embedder.model().to_string();

    let entries: Vec<IndexEntry> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            embedding: Embedding {
                chunk_id: chunk.id.clone(),
                vector,
                model: model.clone(),
            },
            kind: document.kind,
            origin: document.origin.clone(),
            chunk,
        })
        .collect();
    let count = entries.len();

    // Supersede any previous ingestion of this origin, then append.
    index.remove_origin(&document.origin);
    index.add(entries)?;
    Ok((document.origin, count))
}

/// Build a sequential-reading context block straight from documents,
/// without touching the embedder or index. Used by summarization, which
/// reads material in source order rather than by relevance.
pub fn sequential_block(
    documents: &[Document],
    params: &ChunkParams,
    token_budget: usize,
) -> ContextBlock {
    let mut hits: Vec<ScoredEntry> = Vec::new();
    for document in documents {
        for chunk in chunk_document(document, params) {
            hits.push(ScoredEntry {
                entry: IndexEntry {
                    embedding: Embedding {
                        chunk_id: chunk.id.clone(),
                        // Assembly never reads the vector; nothing here is
                        // ever added to an index.
                        vector: Vec::new(),
                        model: String::new(),
                    },
                    kind: document.kind,
                    origin: document.origin.clone(),
                    chunk,
                },
                score: 1.0,
            });
        }
    }

    crate::assemble::assemble(
        &RetrievalResult { hits },
        crate::assemble::DEFAULT_TEMPLATE,
        crate::assemble::PassageOrdering::SourcePosition,
        token_budget,
    )
}

/// Open the configured snapshot, or start a fresh index when none exists.
/// A snapshot embedded with a different model or dimensionality than the
/// configuration is rejected instead of silently mixing vectors.
pub fn open_index(config: &Config) -> Result<VectorIndex> {
    let path = &config.index.snapshot;
    if path.exists() {
        let index = VectorIndex::load(path)?;
        if index.model() != config.embedding.model {
            return Err(ContextError::ModelMismatch {
                expected: config.embedding.model.clone(),
                got: index.model(),
            });
        }
        if index.dims() != config.embedding.dims {
            return Err(ContextError::DimensionMismatch {
                expected: config.embedding.dims,
                got: index.dims(),
            });
        }
        Ok(index)
    } else {
        Ok(VectorIndex::new(
            config.embedding.model.clone(),
            config.embedding.dims,
        ))
    }
}
