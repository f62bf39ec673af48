//! In-memory vector index with snapshot persistence.
//!
//! Entries live in a `Vec` behind a `std::sync::RwLock`: `add` and `remove`
//! take the write lock (single-writer discipline) while `search` takes the
//! read lock, so concurrent queries proceed against a consistent view.
//!
//! Similarity is cosine: vectors are L2-normalized on insertion and queries
//! are normalized on entry, so ranking reduces to a dot product and vector
//! magnitude never biases scores. Ties are broken by insertion order, which
//! keeps repeated searches deterministic.
//!
//! # Snapshot format
//!
//! `persist` writes a single JSON object line followed by a trailing
//! integrity line:
//!
//! ```text
//! {"version":1,"model":"...","dims":N,"entry_count":M,"entries":[...]}
//! sha256:<hex>
//! ```
//!
//! The checksum covers the JSON line. `persist` writes to a temp file and
//! renames it into place; `load` verifies the version and checksum before
//! installing any state, so a partially written snapshot is never loaded.

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ContextError, Result};
use crate::models::{IndexEntry, QueryFilters, ScoredEntry};

/// Current snapshot format version, checked on load.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug)]
struct IndexInner {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

/// Thread-safe vector index over [`IndexEntry`] values.
#[derive(Debug)]
pub struct VectorIndex {
    inner: RwLock<IndexInner>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    model: String,
    dims: usize,
    entry_count: usize,
    entries: Vec<IndexEntry>,
}

/// Summary of the index for status output.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub model: String,
    pub dims: usize,
    pub entries: usize,
    pub documents: usize,
}

impl VectorIndex {
    /// Create an empty index bound to one embedding model and
    /// dimensionality. Entries embedded differently are rejected.
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                model: model.into(),
                dims,
                entries: Vec::new(),
            }),
        }
    }

    pub fn model(&self) -> String {
        self.inner.read().unwrap().model.clone()
    }

    pub fn dims(&self) -> usize {
        self.inner.read().unwrap().dims
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read().unwrap();
        let mut doc_ids: Vec<&str> = inner
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();
        IndexStats {
            model: inner.model.clone(),
            dims: inner.dims,
            entries: inner.entries.len(),
            documents: doc_ids.len(),
        }
    }

    /// Append entries. Serialized by the write lock; each entry's model and
    /// dimensionality are checked against the index before anything is
    /// inserted, so a bad batch leaves the index untouched.
    pub fn add(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for entry in &entries {
            if entry.embedding.model != inner.model {
                return Err(ContextError::ModelMismatch {
                    expected: inner.model.clone(),
                    got: entry.embedding.model.clone(),
                });
            }
            if entry.embedding.vector.len() != inner.dims {
                return Err(ContextError::DimensionMismatch {
                    expected: inner.dims,
                    got: entry.embedding.vector.len(),
                });
            }
        }
        for mut entry in entries {
            normalize(&mut entry.embedding.vector);
            inner.entries.push(entry);
        }
        Ok(())
    }

    /// Nearest-neighbor search. Returns at most `top_k` entries ordered by
    /// descending cosine score; equal scores keep insertion order.
    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredEntry>> {
        let inner = self.inner.read().unwrap();
        if query_vector.len() != inner.dims {
            return Err(ContextError::DimensionMismatch {
                expected: inner.dims,
                got: query_vector.len(),
            });
        }

        let mut query = query_vector.to_vec();
        normalize(&mut query);

        let mut hits: Vec<ScoredEntry> = inner
            .entries
            .iter()
            .filter(|e| filters.matches(e))
            .map(|e| ScoredEntry {
                entry: e.clone(),
                score: dot(&query, &e.embedding.vector),
            })
            .collect();

        // Stable sort: ties keep insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Delete all entries belonging to a document in one operation.
    /// Returns the number of entries removed.
    pub fn remove(&self, document_id: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.chunk.document_id != document_id);
        before - inner.entries.len()
    }

    /// Delete all entries whose origin locator matches. Used to supersede
    /// a document when its origin is re-ingested.
    pub fn remove_origin(&self, origin: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.origin != origin);
        before - inner.entries.len()
    }

    /// Write a full snapshot. The temp-file + rename dance keeps a crashed
    /// write from clobbering the previous snapshot.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read().unwrap();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            model: inner.model.clone(),
            dims: inner.dims,
            entry_count: inner.entries.len(),
            entries: inner.entries.clone(),
        };
        drop(inner);

        let body = serde_json::to_string(&snapshot).map_err(|e| ContextError::CorruptIndex {
            path: path.display().to_string(),
            reason: format!("serialize: {}", e),
        })?;
        let checksum = hex_digest(body.as_bytes());
        let payload = format!("{}\nsha256:{}\n", body, checksum);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a snapshot into a fresh index. Fails closed: version mismatch,
    /// bad checksum, and truncation all reject the file without installing
    /// anything.
    pub fn load(path: &Path) -> Result<Self> {
        let inner = read_snapshot(path)?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Replace this index's state with a snapshot, atomically from the
    /// point of view of concurrent readers: the swap happens under the
    /// write lock only after the snapshot fully verified.
    pub fn restore(&self, path: &Path) -> Result<()> {
        let fresh = read_snapshot(path)?;
        let mut inner = self.inner.write().unwrap();
        *inner = fresh;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<IndexInner> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path)?;

    let mut lines = content.lines();
    let body = lines.next().ok_or_else(|| ContextError::CorruptIndex {
        path: display.clone(),
        reason: "empty snapshot".to_string(),
    })?;
    let marker = lines.next().ok_or_else(|| ContextError::CorruptIndex {
        path: display.clone(),
        reason: "missing integrity marker".to_string(),
    })?;

    let expected = marker
        .strip_prefix("sha256:")
        .ok_or_else(|| ContextError::CorruptIndex {
            path: display.clone(),
            reason: "malformed integrity marker".to_string(),
        })?;
    let actual = hex_digest(body.as_bytes());
    if actual != expected {
        return Err(ContextError::CorruptIndex {
            path: display,
            reason: "checksum mismatch".to_string(),
        });
    }

    let snapshot: Snapshot =
        serde_json::from_str(body).map_err(|e| ContextError::CorruptIndex {
            path: display.clone(),
            reason: format!("parse: {}", e),
        })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(ContextError::IncompatibleIndex {
            path: display,
            expected: SNAPSHOT_VERSION,
            got: snapshot.version,
        });
    }
    if snapshot.entry_count != snapshot.entries.len() {
        return Err(ContextError::CorruptIndex {
            path: display,
            reason: format!(
                "entry count mismatch: header says {}, found {}",
                snapshot.entry_count,
                snapshot.entries.len()
            ),
        });
    }

    Ok(IndexInner {
        model: snapshot.model,
        dims: snapshot.dims,
        entries: snapshot.entries,
    })
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// L2-normalize in place. Zero vectors are left unchanged so they score
/// zero against everything instead of producing NaN.
fn normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Embedding, SourceKind};
    use tempfile::tempdir;

    fn entry(chunk_id: &str, doc_id: &str, vector: Vec<f32>, origin: &str) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id.to_string(),
                document_id: doc_id.to_string(),
                ordinal: 0,
                text: format!("text of {}", chunk_id),
                start: 0,
                end: 10,
                overlaps_previous: false,
            },
            embedding: Embedding {
                chunk_id: chunk_id.to_string(),
                vector,
                model: "mock-embed".to_string(),
            },
            kind: SourceKind::DirectoryFile,
            origin: origin.to_string(),
        }
    }

    fn sample_index() -> VectorIndex {
        let index = VectorIndex::new("mock-embed", 3);
        index
            .add(vec![
                entry("c1", "d1", vec![1.0, 0.0, 0.0], "/a"),
                entry("c2", "d1", vec![0.0, 1.0, 0.0], "/a"),
                entry("c3", "d2", vec![0.9, 0.1, 0.0], "/b"),
            ])
            .unwrap();
        index
    }

    #[test]
    fn search_orders_by_descending_score() {
        let index = sample_index();
        let hits = index
            .search(&[1.0, 0.0, 0.0], 3, &QueryFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].entry.chunk.id, "c1");
        assert_eq!(hits[1].entry.chunk.id, "c3");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn search_is_deterministic_with_stable_ties() {
        let index = VectorIndex::new("mock-embed", 2);
        // Identical vectors: scores tie exactly, insertion order decides.
        index
            .add(vec![
                entry("first", "d1", vec![1.0, 0.0], "/a"),
                entry("second", "d2", vec![1.0, 0.0], "/b"),
                entry("third", "d3", vec![1.0, 0.0], "/c"),
            ])
            .unwrap();

        for _ in 0..5 {
            let hits = index
                .search(&[1.0, 0.0], 3, &QueryFilters::default())
                .unwrap();
            let ids: Vec<&str> = hits.iter().map(|h| h.entry.chunk.id.as_str()).collect();
            assert_eq!(ids, vec!["first", "second", "third"]);
        }
    }

    #[test]
    fn magnitude_does_not_bias_ranking() {
        let index = VectorIndex::new("mock-embed", 2);
        index
            .add(vec![
                entry("small", "d1", vec![0.001, 0.0], "/a"),
                entry("large", "d2", vec![1000.0, 0.0], "/b"),
            ])
            .unwrap();
        let hits = index
            .search(&[1.0, 0.0], 2, &QueryFilters::default())
            .unwrap();
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
    }

    #[test]
    fn top_k_truncates() {
        let index = sample_index();
        let hits = index
            .search(&[1.0, 0.0, 0.0], 2, &QueryFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn dimension_mismatch_rejected_on_add_and_search() {
        let index = VectorIndex::new("mock-embed", 3);
        let err = index
            .add(vec![entry("c1", "d1", vec![1.0, 0.0], "/a")])
            .unwrap_err();
        assert!(matches!(err, ContextError::DimensionMismatch { expected: 3, got: 2 }));
        assert!(index.is_empty());

        let err = index
            .search(&[1.0, 0.0], 1, &QueryFilters::default())
            .unwrap_err();
        assert!(matches!(err, ContextError::DimensionMismatch { .. }));
    }

    #[test]
    fn model_mismatch_rejected() {
        let index = VectorIndex::new("other-model", 3);
        let err = index
            .add(vec![entry("c1", "d1", vec![1.0, 0.0, 0.0], "/a")])
            .unwrap_err();
        assert!(matches!(err, ContextError::ModelMismatch { .. }));
    }

    #[test]
    fn bad_batch_leaves_index_untouched() {
        let index = VectorIndex::new("mock-embed", 3);
        let err = index
            .add(vec![
                entry("ok", "d1", vec![1.0, 0.0, 0.0], "/a"),
                entry("bad", "d1", vec![1.0], "/a"),
            ])
            .unwrap_err();
        assert!(matches!(err, ContextError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn remove_deletes_all_document_entries() {
        let index = sample_index();
        assert_eq!(index.remove("d1"), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.remove("d1"), 0);
    }

    #[test]
    fn remove_origin_supersedes() {
        let index = sample_index();
        assert_eq!(index.remove_origin("/a"), 2);
        let hits = index
            .search(&[1.0, 0.0, 0.0], 5, &QueryFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.origin, "/b");
    }

    #[test]
    fn filters_restrict_results() {
        let index = sample_index();
        let hits = index
            .search(
                &[1.0, 0.0, 0.0],
                5,
                &QueryFilters {
                    kind: None,
                    origin_prefix: Some("/b".to_string()),
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.chunk.id, "c3");
    }

    #[test]
    fn persist_load_round_trip_preserves_search() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cfsnap");

        let index = sample_index();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.model(), "mock-embed");
        assert_eq!(loaded.dims(), 3);

        let query = [0.7, 0.3, 0.0];
        let original = index.search(&query, 3, &QueryFilters::default()).unwrap();
        let restored = loaded.search(&query, 3, &QueryFilters::default()).unwrap();
        assert_eq!(original.len(), restored.len());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.entry.chunk.id, b.entry.chunk.id);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cfsnap");
        sample_index().persist(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, &content[..content.len() / 2]).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, ContextError::CorruptIndex { .. }));
    }

    #[test]
    fn tampered_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cfsnap");
        sample_index().persist(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("text of c1", "text of cX", 1);
        std::fs::write(&path, tampered).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, ContextError::CorruptIndex { .. }));
    }

    #[test]
    fn version_mismatch_is_incompatible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cfsnap");

        let body = r#"{"version":99,"model":"m","dims":2,"entry_count":0,"entries":[]}"#;
        let payload = format!("{}\nsha256:{}\n", body, hex_digest(body.as_bytes()));
        std::fs::write(&path, payload).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ContextError::IncompatibleIndex { expected: 1, got: 99, .. }
        ));
    }

    #[test]
    fn restore_replaces_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cfsnap");
        sample_index().persist(&path).unwrap();

        let index = VectorIndex::new("mock-embed", 3);
        index
            .add(vec![entry("old", "dx", vec![0.0, 0.0, 1.0], "/old")])
            .unwrap();
        index.restore(&path).unwrap();

        assert_eq!(index.len(), 3);
        let hits = index
            .search(&[0.0, 0.0, 1.0], 5, &QueryFilters::default())
            .unwrap();
        assert!(hits.iter().all(|h| h.entry.chunk.id != "old"));
    }

    #[test]
    fn stats_count_documents() {
        let stats = sample_index().stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.dims, 3);
    }
}
