//! Context assembly: ordering, formatting, and the budget invariant.
//!
//! Turns a [`RetrievalResult`] into a [`ContextBlock`] ready to interpolate
//! into a prompt. The ordering mode is a caller decision, never inferred:
//! question answering reads passages by descending relevance, summarization
//! reads them in their original document position.
//!
//! Each passage is formatted through a template carrying both the text and
//! its provenance. Provenance is never dropped; when a single passage alone
//! exceeds the remaining budget its text is truncated as a last resort so
//! the block still fits.

use crate::models::{
    approx_token_count, ContextBlock, Passage, RetrievalResult, ScoredEntry, CHARS_PER_TOKEN,
};

/// How passages are ordered inside the assembled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassageOrdering {
    /// Descending relevance score — question answering.
    Relevance,
    /// Original document and position order — sequential reading /
    /// summarization.
    SourcePosition,
}

/// Default passage template. `{origin}` and `{text}` are interpolated.
pub const DEFAULT_TEMPLATE: &str = "[source: {origin}]\n{text}\n";

/// Assemble retrieval hits into a budget-constrained context block.
///
/// The returned block's `token_count` never exceeds `token_budget`.
pub fn assemble(
    result: &RetrievalResult,
    template: &str,
    ordering: PassageOrdering,
    token_budget: usize,
) -> ContextBlock {
    let mut hits: Vec<&ScoredEntry> = result.hits.iter().collect();
    match ordering {
        // Hits arrive in descending score order already; keep it.
        PassageOrdering::Relevance => {}
        PassageOrdering::SourcePosition => {
            hits.sort_by(|a, b| {
                a.entry
                    .origin
                    .cmp(&b.entry.origin)
                    .then(a.entry.chunk.document_id.cmp(&b.entry.chunk.document_id))
                    .then(a.entry.chunk.ordinal.cmp(&b.entry.chunk.ordinal))
            });
        }
    }

    let mut block = ContextBlock::default();
    for hit in hits {
        let formatted = render(template, &hit.entry.origin, &hit.entry.chunk.text);
        let cost = approx_token_count(&formatted);
        let remaining = token_budget - block.token_count;

        if cost <= remaining {
            block.token_count += cost;
            block.passages.push(Passage {
                text: formatted,
                origin: hit.entry.origin.clone(),
                score: hit.score,
            });
            continue;
        }

        // Last resort: a block with nothing in it helps nobody, so the
        // first passage is truncated to fit rather than dropped. Later
        // passages that overflow simply end the block.
        if block.passages.is_empty() {
            if let Some(truncated) = truncate_to_fit(template, hit, token_budget) {
                block.token_count += approx_token_count(&truncated);
                block.passages.push(Passage {
                    text: truncated,
                    origin: hit.entry.origin.clone(),
                    score: hit.score,
                });
            }
        }
        break;
    }

    debug_assert!(block.token_count <= token_budget);
    block
}

fn render(template: &str, origin: &str, text: &str) -> String {
    template.replace("{origin}", origin).replace("{text}", text)
}

/// Truncate a passage's text so the formatted result fits `token_budget`.
/// The template and provenance are kept whole; only the text shrinks.
/// Returns `None` when even an empty text would not fit.
fn truncate_to_fit(template: &str, hit: &ScoredEntry, token_budget: usize) -> Option<String> {
    let scaffold = render(template, &hit.entry.origin, "");
    let scaffold_chars = scaffold.chars().count();
    let budget_chars = token_budget * CHARS_PER_TOKEN;
    if scaffold_chars >= budget_chars {
        return None;
    }

    let keep = budget_chars - scaffold_chars;
    let text: String = hit.entry.chunk.text.chars().take(keep).collect();
    let formatted = render(template, &hit.entry.origin, &text);
    debug_assert!(approx_token_count(&formatted) <= token_budget);
    Some(formatted)
}
