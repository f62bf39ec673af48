//! Boundary-preferring text chunker.
//!
//! Splits a [`Document`] body into overlapping chunks of roughly
//! `chunk_size` characters. Cuts happen on paragraph boundaries (`\n\n`)
//! when one exists, then sentence boundaries, and fall back to a fixed
//! character window when no boundary exists within `chunk_size * 3 / 2`
//! characters of the chunk start.
//!
//! Chunking is a pure function of `(document, params)`: chunk ids are
//! derived from the document id and ordinal, so re-running it yields an
//! identical sequence.

use uuid::Uuid;

use crate::error::{ContextError, Result};
use crate::models::{Chunk, Document};

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Create chunking parameters, rejecting `overlap >= chunk_size` and a
    /// zero chunk size before any document is processed.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ContextError::Config(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ContextError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Furthest a cut may drift past the chunk start while hunting for a
    /// semantic boundary.
    fn hard_limit(&self) -> usize {
        self.chunk_size + self.chunk_size / 2
    }
}

/// Split a document body into chunks. Deterministic and restartable:
/// identical inputs yield identical chunk sequences, ids included.
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> Vec<Chunk> {
    let chars: Vec<char> = doc.body.chars().collect();
    let n = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0usize;

    while start < n {
        let end = if n - start <= params.hard_limit() {
            n
        } else {
            let target = start + params.chunk_size;
            // A cut must land past the overlap region so the next chunk
            // makes progress.
            let floor = start + params.overlap + 1;
            find_boundary_before(&chars, floor, target)
                .or_else(|| find_boundary_after(&chars, target, start + params.hard_limit()))
                .unwrap_or(target)
        };

        let text: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            id: chunk_id(&doc.id, ordinal),
            document_id: doc.id.clone(),
            ordinal,
            text,
            start,
            end,
            overlaps_previous: ordinal > 0 && params.overlap > 0,
        });

        if end >= n {
            break;
        }
        start = end - params.overlap;
        ordinal += 1;
    }

    chunks
}

/// Deterministic chunk identity from the owning document and ordinal.
fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let name = format!("{}:{}", document_id, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Last paragraph boundary in `[lo, hi]`, then last sentence boundary.
/// Positions are cut indices: the chunk ends just before the returned index.
fn find_boundary_before(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    let mut sentence = None;
    for end in (lo..=hi).rev() {
        if is_paragraph_boundary(chars, end) {
            return Some(end);
        }
        if sentence.is_none() && is_sentence_boundary(chars, end) {
            sentence = Some(end);
        }
    }
    sentence
}

/// First boundary (paragraph or sentence) in `(lo, hi]`.
fn find_boundary_after(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    ((lo + 1)..=hi)
        .find(|&end| is_paragraph_boundary(chars, end) || is_sentence_boundary(chars, end))
}

fn is_paragraph_boundary(chars: &[char], end: usize) -> bool {
    end >= 2 && end <= chars.len() && chars[end - 1] == '\n' && chars[end - 2] == '\n'
}

fn is_sentence_boundary(chars: &[char], end: usize) -> bool {
    if end == 0 || end > chars.len() {
        return false;
    }
    matches!(chars[end - 1], '.' | '!' | '?')
        && (end == chars.len() || chars[end].is_whitespace())
}
