//! Directory source adapter.
//!
//! Recurses over files matching a configured extension allow-list and
//! yields one [`Document`] per file. A single unreadable file fails
//! independently and lands in the report's failure list; the batch is
//! never aborted.

use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::adapter::{IngestFailure, IngestReport, SourceAdapter};
use crate::config::SourcesConfig;
use crate::error::{ContextError, Result};
use crate::models::{Document, ExtractionStatus, SourceKind};

pub struct DirectoryAdapter {
    extensions: Vec<String>,
    exclude: GlobSet,
    max_depth: usize,
}

impl DirectoryAdapter {
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude: build_globset(&default_excludes)?,
            max_depth: config.max_depth,
        })
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|ext| ext == &e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SourceAdapter for DirectoryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DirectoryFile
    }

    async fn ingest(&self, locator: &str) -> Result<IngestReport> {
        let root = Path::new(locator);
        if !root.is_dir() {
            return Err(ContextError::Ingestion {
                origin: locator.to_string(),
                reason: "directory does not exist".to_string(),
            });
        }

        let mut walker = WalkDir::new(root);
        if self.max_depth > 0 {
            walker = walker.max_depth(self.max_depth);
        }

        let mut paths = Vec::new();
        let mut report = IngestReport::default();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let origin = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| locator.to_string());
                    report.failures.push(IngestFailure {
                        origin: origin.clone(),
                        error: ContextError::Ingestion {
                            origin,
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.exclude.is_match(relative) {
                continue;
            }
            if !self.wants(path) {
                continue;
            }
            paths.push(path.to_path_buf());
        }

        // Deterministic ordering across runs.
        paths.sort();

        for path in paths {
            let origin = path.display().to_string();
            match std::fs::read_to_string(&path) {
                Ok(body) => {
                    let status = if body.trim().is_empty() {
                        ExtractionStatus::Empty
                    } else {
                        ExtractionStatus::Complete
                    };
                    report.documents.push(Document {
                        id: Uuid::new_v4().to_string(),
                        kind: SourceKind::DirectoryFile,
                        origin,
                        body,
                        fetched_at: Utc::now(),
                        status,
                    });
                }
                Err(e) => {
                    report.failures.push(IngestFailure {
                        origin: origin.clone(),
                        error: ContextError::Ingestion {
                            origin,
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        tracing::debug!(
            ok = report.ok_count(),
            failed = report.failed_count(),
            root = locator,
            "directory scan complete"
        );
        Ok(report)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| ContextError::Config(format!("bad exclude glob '{}': {}", pattern, e)))?,
        );
    }
    builder
        .build()
        .map_err(|e| ContextError::Config(format!("exclude globs: {}", e)))
}
