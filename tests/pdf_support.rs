//! PDF ingestion tests.
//!
//! Builds minimal-but-valid PDF files on the fly (body objects first, then
//! an xref table with correct byte offsets) so extraction runs without any
//! fixture files or network access.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use context_forge::adapter::{AdapterSet, SourceAdapter};
use context_forge::adapter_pdf::PdfAdapter;
use context_forge::chunk::{chunk_document, ChunkParams};
use context_forge::config::{Config, SourcesConfig};
use context_forge::embed::{Embedder, MockEmbeddingBackend, RetryPolicy};
use context_forge::error::ContextError;
use context_forge::index::VectorIndex;
use context_forge::models::{ExtractionStatus, SourceKind};
use context_forge::pipeline;
use context_forge::retrieve::{RetrievalRequest, Retriever};

/// Minimal valid PDF with one page per entry in `pages`, each carrying one
/// line of text.
fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let mut offsets = Vec::new();

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + i * 2)).collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    let font_obj = 3 + n * 2;
    for (i, text) in pages.iter().enumerate() {
        let page_obj = 3 + i * 2;
        let content_obj = page_obj + 1;

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Contents {} 0 R /Resources << /Font << /F1 {} 0 R >> >> >> endobj\n",
                page_obj, content_obj, font_obj
            )
            .as_bytes(),
        );

        let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET\n", text);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                content_obj,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "{} 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
            font_obj
        )
        .as_bytes(),
    );

    let xref_start = out.len();
    let total = offsets.len() + 1;
    out.extend_from_slice(format!("xref\n0 {}\n", total).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total, xref_start
        )
        .as_bytes(),
    );
    out
}

#[tokio::test]
async fn three_page_pdf_yields_one_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.pdf");
    fs::write(
        &path,
        minimal_pdf(&[
            "Page one introduces the billing subsystem.",
            "Page two lists the invoice reconciliation rules.",
            "Page three covers refund handling and edge cases.",
        ]),
    )
    .unwrap();

    let adapter = PdfAdapter::from_config(&SourcesConfig::default()).unwrap();
    let report = adapter.ingest(path.to_str().unwrap()).await.unwrap();

    assert_eq!(report.ok_count(), 1);
    let doc = &report.documents[0];
    assert_eq!(doc.kind, SourceKind::Pdf);
    assert_eq!(doc.status, ExtractionStatus::Complete);
    assert!(doc.body.contains("billing subsystem"));
    assert!(doc.body.contains("refund handling"));
}

#[tokio::test]
async fn pdf_chunks_respect_the_size_window() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("long.pdf");
    // Enough repeated lines to force multiple chunks at size 500.
    let lines: Vec<String> = (0..60)
        .map(|i| format!("Line {} of the specification describes requirement {}.", i, i))
        .collect();
    let line_refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
    fs::write(&path, minimal_pdf(&line_refs)).unwrap();

    let adapter = PdfAdapter::from_config(&SourcesConfig::default()).unwrap();
    let report = adapter.ingest(path.to_str().unwrap()).await.unwrap();
    let doc = &report.documents[0];

    let params = ChunkParams::new(500, 50).unwrap();
    let chunks = chunk_document(doc, &params);

    assert!(chunks.len() > 1);
    let body_len = doc.body.chars().count();
    // Sentence boundaries sit every ~55 characters, so each cut lands
    // close to the 500-char target and the stride stays near 450.
    assert!(chunks.len() <= body_len.div_ceil(350));
    for chunk in &chunks {
        assert!(chunk.text.chars().count() <= 750);
    }
    // Identical re-run, identical chunks.
    assert_eq!(chunks, chunk_document(doc, &params));
}

#[tokio::test]
async fn pdf_builds_into_a_searchable_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("guide.pdf");
    fs::write(
        &path,
        minimal_pdf(&["The migration guide explains the snapshot format change."]),
    )
    .unwrap();

    let adapters = AdapterSet::from_config(&Config::default()).unwrap();
    let embedder = Arc::new(Embedder::new(
        Box::new(MockEmbeddingBackend::new(8)),
        8,
        RetryPolicy::new(0, Duration::from_millis(1)),
    ));
    let index = Arc::new(VectorIndex::new("mock-embed", 8));
    let params = ChunkParams::new(500, 50).unwrap();

    let outcome = pipeline::build_context(
        &adapters,
        &embedder,
        &index,
        SourceKind::Pdf,
        path.to_str().unwrap(),
        &params,
    )
    .await
    .unwrap();
    assert_eq!(outcome.documents_indexed, 1);
    assert!(outcome.chunks_indexed >= 1);

    let retriever = Retriever::new(embedder, index);
    let result = retriever
        .retrieve(&RetrievalRequest::new("snapshot format change", 3, 800))
        .await
        .unwrap();
    assert!(!result.is_empty());
    assert_eq!(result.hits[0].entry.kind, SourceKind::Pdf);
    assert!(result.hits[0].entry.origin.ends_with("guide.pdf"));
}

#[tokio::test]
async fn corrupt_pdf_surfaces_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.pdf");
    fs::write(&path, b"%PDF-1.4 but the rest is garbage").unwrap();

    let adapter = PdfAdapter::from_config(&SourcesConfig::default()).unwrap();
    let err = adapter.ingest(path.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, ContextError::Parse { .. }));
}
