//! PDF source adapter.
//!
//! Accepts either a local file path or an http(s) URL: remote PDFs are
//! downloaded first, then both paths feed the same extraction. Corrupt or
//! encrypted files (without a supplied password) fail with a parse error.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::adapter::{IngestReport, SourceAdapter};
use crate::adapter_web::parse_http_url;
use crate::config::SourcesConfig;
use crate::error::{ContextError, Result};
use crate::models::{Document, ExtractionStatus, SourceKind};

pub struct PdfAdapter {
    client: reqwest::Client,
}

impl PdfAdapter {
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ContextError::Config(format!("pdf client: {}", e)))?;
        Ok(Self { client })
    }

    async fn load_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        if is_url(locator) {
            let url = parse_http_url(locator)?;
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ContextError::Fetch {
                    url: locator.to_string(),
                    reason: e.to_string(),
                })?
                .error_for_status()
                .map_err(|e| ContextError::Fetch {
                    url: locator.to_string(),
                    reason: e.to_string(),
                })?;
            let bytes = response.bytes().await.map_err(|e| ContextError::Fetch {
                url: locator.to_string(),
                reason: e.to_string(),
            })?;
            Ok(bytes.to_vec())
        } else {
            std::fs::read(Path::new(locator)).map_err(|e| ContextError::Ingestion {
                origin: locator.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

#[async_trait]
impl SourceAdapter for PdfAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Pdf
    }

    async fn ingest(&self, locator: &str) -> Result<IngestReport> {
        let bytes = self.load_bytes(locator).await?;
        let body = extract_pdf_text(&bytes, locator)?;

        let status = if body.trim().is_empty() {
            // Readable PDF with no text layer (e.g. scanned pages).
            ExtractionStatus::Empty
        } else {
            ExtractionStatus::Complete
        };

        tracing::debug!(origin = locator, chars = body.len(), "extracted pdf");
        Ok(IngestReport::single(Document {
            id: Uuid::new_v4().to_string(),
            kind: SourceKind::Pdf,
            origin: locator.to_string(),
            body,
            fetched_at: Utc::now(),
            status,
        }))
    }
}

fn is_url(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Extract plain text from PDF bytes. Corrupt and encrypted inputs both
/// come back from the extractor as errors.
fn extract_pdf_text(bytes: &[u8], origin: &str) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ContextError::Parse {
        origin: origin.to_string(),
        reason: e.to_string(),
    })
}
