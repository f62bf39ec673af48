//! Source adapter trait and registry.
//!
//! Every input kind (directory, web page, PDF) implements the same
//! capability interface: given a locator, produce normalized [`Document`]s
//! with provenance. New sources implement [`SourceAdapter`] rather than
//! being detected by structural inspection.
//!
//! Ingestion is batch-friendly: a single unreadable item fails
//! independently and is collected into the [`IngestReport`] alongside the
//! successes, never silently dropped.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{ContextError, Result};
use crate::models::{Document, SourceKind};

/// A data source that can be ingested into documents.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which [`SourceKind`] this adapter produces.
    fn kind(&self) -> SourceKind;

    /// Ingest everything behind `locator` (a path or URL).
    ///
    /// Single-document adapters (web, PDF) return a report with one
    /// document or propagate their failure as `Err`. The directory adapter
    /// returns per-file failures inside the report and reserves `Err` for
    /// an unusable locator (e.g. the root does not exist).
    async fn ingest(&self, locator: &str) -> Result<IngestReport>;
}

/// One failed item within an ingestion batch.
#[derive(Debug)]
pub struct IngestFailure {
    pub origin: String,
    pub error: ContextError,
}

/// Successes and failures of one ingestion run, reported together.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<Document>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn single(document: Document) -> Self {
        Self {
            documents: vec![document],
            failures: Vec::new(),
        }
    }

    pub fn ok_count(&self) -> usize {
        self.documents.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// All configured adapters, one per [`SourceKind`].
pub struct AdapterSet {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl AdapterSet {
    /// Build the built-in adapters from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::adapter_dir::DirectoryAdapter;
        use crate::adapter_pdf::PdfAdapter;
        use crate::adapter_web::WebAdapter;

        Ok(Self {
            adapters: vec![
                Box::new(DirectoryAdapter::from_config(&config.sources)?),
                Box::new(WebAdapter::from_config(&config.sources)?),
                Box::new(PdfAdapter::from_config(&config.sources)?),
            ],
        })
    }

    pub fn find(&self, kind: SourceKind) -> Option<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.kind() == kind)
            .map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_set_resolves_all_kinds() {
        let set = AdapterSet::from_config(&Config::default()).unwrap();
        assert_eq!(set.len(), 3);
        for kind in [SourceKind::DirectoryFile, SourceKind::Web, SourceKind::Pdf] {
            let adapter = set.find(kind).unwrap();
            assert_eq!(adapter.kind(), kind);
        }
    }
}
