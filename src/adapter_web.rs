//! Web source adapter.
//!
//! Fetches a page over HTTP and flattens it into plain text. Scripts,
//! styles, and navigation chrome are skipped; text blocks shorter than the
//! configured minimum are dropped as boilerplate. Network failures and
//! non-success statuses surface as fetch errors.

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::adapter::{IngestReport, SourceAdapter};
use crate::config::SourcesConfig;
use crate::error::{ContextError, Result};
use crate::models::{Document, ExtractionStatus, SourceKind};

/// Elements whose text content is worth keeping.
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, pre, blockquote, td, th";

pub struct WebAdapter {
    client: reqwest::Client,
    min_block_len: usize,
}

impl WebAdapter {
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ContextError::Config(format!("web client: {}", e)))?;
        Ok(Self {
            client,
            min_block_len: config.min_block_len,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ContextError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ContextError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        response.text().await.map_err(|e| ContextError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn ingest(&self, locator: &str) -> Result<IngestReport> {
        let url = parse_http_url(locator)?;
        let html = self.fetch(&url).await?;
        let body = flatten_html(&html, self.min_block_len);

        let status = if body.trim().is_empty() {
            ExtractionStatus::Empty
        } else {
            ExtractionStatus::Complete
        };

        tracing::debug!(url = %url, bytes = body.len(), "fetched page");
        Ok(IngestReport::single(Document {
            id: Uuid::new_v4().to_string(),
            kind: SourceKind::Web,
            origin: url.to_string(),
            body,
            fetched_at: Utc::now(),
            status,
        }))
    }
}

/// Validate that the locator is an absolute http(s) URL.
pub fn parse_http_url(locator: &str) -> Result<Url> {
    let url = Url::parse(locator).map_err(|e| ContextError::Fetch {
        url: locator.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ContextError::Fetch {
            url: locator.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Flatten an HTML page into paragraph-separated plain text.
///
/// Walks the content block elements, joins each element's text nodes, and
/// keeps blocks at least `min_block_len` characters long. Script/style
/// content never appears because those tags contain no kept block elements.
pub fn flatten_html(html: &str, min_block_len: usize) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse(BLOCK_SELECTOR).expect("static selector");

    let mut blocks: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        // Nested blocks (e.g. li inside li) would duplicate text; only take
        // elements whose own text is not already covered by a kept child.
        let text = element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if text.chars().count() < min_block_len {
            continue;
        }
        if blocks.last().map(|b| b.contains(&text)).unwrap_or(false) {
            continue;
        }
        blocks.push(text);
    }
    blocks.join("\n\n")
}
