//! Query-time retrieval: embed, search, deduplicate, pack under budget.
//!
//! The pipeline is fixed: the query text is embedded through the gateway,
//! the index returns up to `top_k` scored entries, near-identical passages
//! (same document, overlapping character ranges) are collapsed to their
//! highest-scoring instance, and the survivors are greedily accepted in
//! score order until the next one would exceed the token budget. Greedy,
//! not optimal: results already accepted are kept even if a better-fitting
//! combination exists.
//!
//! Zero matching entries is a valid outcome, not an error — callers
//! distinguish "no context available" from failure.

use std::sync::Arc;
use std::time::Duration;

use crate::embed::Embedder;
use crate::error::{ContextError, Result};
use crate::index::VectorIndex;
use crate::models::{approx_token_count, QueryFilters, RetrievalResult, ScoredEntry};

/// All inputs for one retrieval invocation.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub text: String,
    pub top_k: usize,
    pub token_budget: usize,
    pub filters: QueryFilters,
    /// Deadline for the whole invocation, embedding call included. On
    /// expiry the in-flight backend call is abandoned and [`ContextError::Timeout`]
    /// is surfaced.
    pub timeout: Option<Duration>,
}

impl RetrievalRequest {
    pub fn new(text: impl Into<String>, top_k: usize, token_budget: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            token_budget,
            filters: QueryFilters::default(),
            timeout: None,
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Ranks and selects index entries for a query under a token budget.
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<Embedder>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub async fn retrieve(&self, req: &RetrievalRequest) -> Result<RetrievalResult> {
        match req.timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.retrieve_inner(req))
                .await
                .map_err(|_| ContextError::Timeout {
                    seconds: deadline.as_secs(),
                })?,
            None => self.retrieve_inner(req).await,
        }
    }

    async fn retrieve_inner(&self, req: &RetrievalRequest) -> Result<RetrievalResult> {
        if req.text.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let query_vector = self.embedder.embed_one(&req.text).await?;
        let hits = self.index.search(&query_vector, req.top_k, &req.filters)?;

        let deduped = dedup_overlapping(hits);
        let packed = pack_budget(deduped, req.token_budget);
        Ok(RetrievalResult { hits: packed })
    }
}

/// Collapse near-identical passages: two hits from the same document whose
/// character ranges intersect are duplicates, and only the highest-scoring
/// one survives. Input is already in descending score order, so the first
/// occurrence wins.
fn dedup_overlapping(hits: Vec<ScoredEntry>) -> Vec<ScoredEntry> {
    let mut kept: Vec<ScoredEntry> = Vec::with_capacity(hits.len());
    for hit in hits {
        let duplicate = kept.iter().any(|k| {
            k.entry.chunk.document_id == hit.entry.chunk.document_id
                && ranges_overlap(
                    k.entry.chunk.start,
                    k.entry.chunk.end,
                    hit.entry.chunk.start,
                    hit.entry.chunk.end,
                )
        });
        if !duplicate {
            kept.push(hit);
        }
    }
    kept
}

fn ranges_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// Greedy packing: accept hits in order until the next one would exceed the
/// budget, then stop. No backtracking.
fn pack_budget(hits: Vec<ScoredEntry>, token_budget: usize) -> Vec<ScoredEntry> {
    let mut used = 0usize;
    let mut out = Vec::new();
    for hit in hits {
        let cost = approx_token_count(&hit.entry.chunk.text);
        if used + cost > token_budget {
            break;
        }
        used += cost;
        out.push(hit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingCache, MockEmbeddingBackend, RetryPolicy};
    use crate::models::{Chunk, Embedding, IndexEntry, SourceKind};

    fn scored(chunk_id: &str, doc_id: &str, span: (usize, usize), text: &str, score: f32) -> ScoredEntry {
        ScoredEntry {
            entry: IndexEntry {
                chunk: Chunk {
                    id: chunk_id.to_string(),
                    document_id: doc_id.to_string(),
                    ordinal: 0,
                    text: text.to_string(),
                    start: span.0,
                    end: span.1,
                    overlaps_previous: false,
                },
                embedding: Embedding {
                    chunk_id: chunk_id.to_string(),
                    vector: vec![1.0],
                    model: "mock-embed".to_string(),
                },
                kind: SourceKind::DirectoryFile,
                origin: format!("/src/{}", doc_id),
            },
            score,
        }
    }

    #[test]
    fn dedup_keeps_highest_scoring_overlap() {
        let hits = vec![
            scored("c1", "d1", (0, 500), "a", 0.9),
            scored("c2", "d1", (450, 950), "b", 0.8), // overlaps c1
            scored("c3", "d1", (1000, 1500), "c", 0.7),
            scored("c4", "d2", (0, 500), "d", 0.6), // other doc, same span
        ];
        let kept = dedup_overlapping(hits);
        let ids: Vec<&str> = kept.iter().map(|h| h.entry.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c4"]);
    }

    #[test]
    fn packing_is_greedy_and_stops_at_first_overflow() {
        // 400 chars = 100 tokens each; budget 250 fits two, then stops even
        // though the fourth (smaller) hit would still fit.
        let hits = vec![
            scored("c1", "d1", (0, 400), &"a".repeat(400), 0.9),
            scored("c2", "d2", (0, 400), &"b".repeat(400), 0.8),
            scored("c3", "d3", (0, 400), &"c".repeat(400), 0.7),
            scored("c4", "d4", (0, 40), &"d".repeat(40), 0.6),
        ];
        let packed = pack_budget(hits, 250);
        let ids: Vec<&str> = packed.iter().map(|h| h.entry.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn packing_respects_exact_budget() {
        let hits = vec![
            scored("c1", "d1", (0, 400), &"a".repeat(400), 0.9),
            scored("c2", "d2", (0, 400), &"b".repeat(400), 0.8),
        ];
        let packed = pack_budget(hits, 200);
        assert_eq!(packed.len(), 2);
    }

    fn retriever_with_entries(entries: Vec<IndexEntry>) -> Retriever {
        let index = Arc::new(VectorIndex::new("mock-embed", 8));
        index.add(entries).unwrap();
        let embedder = Arc::new(
            Embedder::new(
                Box::new(MockEmbeddingBackend::new(8)),
                16,
                RetryPolicy::new(0, Duration::from_millis(1)),
            )
            .with_cache(EmbeddingCache::new()),
        );
        Retriever::new(embedder, index)
    }

    fn indexed(chunk_id: &str, doc_id: &str, text: &str, kind: SourceKind) -> IndexEntry {
        let digest_vec: Vec<f32> = {
            use sha2::{Digest, Sha256};
            let d = Sha256::digest(text.as_bytes());
            (0..8)
                .map(|i| (d[i % d.len()] as f32 / 255.0) - 0.5 + (i as f32 * 1e-3))
                .collect()
        };
        IndexEntry {
            chunk: Chunk {
                id: chunk_id.to_string(),
                document_id: doc_id.to_string(),
                ordinal: 0,
                text: text.to_string(),
                start: 0,
                end: text.chars().count(),
                overlaps_previous: false,
            },
            embedding: Embedding {
                chunk_id: chunk_id.to_string(),
                vector: digest_vec,
                model: "mock-embed".to_string(),
            },
            kind,
            origin: format!("/{}", doc_id),
        }
    }

    #[tokio::test]
    async fn identical_text_scores_highest() {
        let retriever = retriever_with_entries(vec![
            indexed("c1", "d1", "how the scheduler works", SourceKind::DirectoryFile),
            indexed("c2", "d2", "notes about the garbage collector", SourceKind::DirectoryFile),
        ]);

        let req = RetrievalRequest::new("how the scheduler works", 5, 1000);
        let result = retriever.retrieve(&req).await.unwrap();
        assert!(!result.is_empty());
        assert_eq!(result.hits[0].entry.chunk.id, "c1");
        for pair in result.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn empty_index_returns_empty_result() {
        let retriever = retriever_with_entries(vec![]);
        let req = RetrievalRequest::new("anything", 5, 1000);
        let result = retriever.retrieve(&req).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn unmatched_filters_return_empty_result_not_error() {
        let retriever = retriever_with_entries(vec![indexed(
            "c1",
            "d1",
            "some indexed text",
            SourceKind::DirectoryFile,
        )]);

        let req = RetrievalRequest::new("some indexed text", 5, 1000).with_filters(QueryFilters {
            kind: Some(SourceKind::Pdf),
            origin_prefix: None,
        });
        let result = retriever.retrieve(&req).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn blank_query_returns_empty_result() {
        let retriever = retriever_with_entries(vec![indexed(
            "c1",
            "d1",
            "some indexed text",
            SourceKind::DirectoryFile,
        )]);
        let req = RetrievalRequest::new("   ", 5, 1000);
        let result = retriever.retrieve(&req).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn budget_limits_accepted_hits() {
        // Each text is 400 chars = 100 tokens.
        let retriever = retriever_with_entries(vec![
            indexed("c1", "d1", &"alpha ".repeat(67)[..400].to_string(), SourceKind::DirectoryFile),
            indexed("c2", "d2", &"beta ".repeat(80)[..400].to_string(), SourceKind::DirectoryFile),
            indexed("c3", "d3", &"gamma ".repeat(67)[..400].to_string(), SourceKind::DirectoryFile),
        ]);

        let req = RetrievalRequest::new("alpha beta gamma", 5, 150);
        let result = retriever.retrieve(&req).await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
