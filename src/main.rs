//! # context-forge CLI (`cforge`)
//!
//! The `cforge` binary is the primary interface for context-forge. It
//! provides commands for building a retrieval index from heterogeneous
//! sources, querying it, summarizing sources, running bounded agent tasks,
//! and starting the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! cforge --config ./config/forge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cforge build-context directory --path ./docs` | Index a directory tree |
//! | `cforge build-context web --url https://…` | Index a web page |
//! | `cforge build-context pdf --path ./spec.pdf` | Index a PDF (path or URL) |
//! | `cforge query "<question>"` | Answer a question over the index |
//! | `cforge summarize directory --path ./docs` | Summarize a source |
//! | `cforge agent run "<task>"` | Run a bounded agent task |
//! | `cforge serve` | Start the HTTP API server |
//!
//! The exit code is non-zero when a fatal error occurred or when any item
//! in an ingestion batch failed.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use context_forge::adapter::{AdapterSet, SourceAdapter};
use context_forge::chunk::ChunkParams;
use context_forge::config::{self, Config};
use context_forge::embed::{Embedder, EmbeddingCache, OllamaBackend, RetryPolicy};
use context_forge::models::{QueryFilters, SourceKind};
use context_forge::orchestrate::{AskOptions, OllamaGenerator, Orchestrator};
use context_forge::pipeline;
use context_forge::retrieve::Retriever;
use context_forge::server::{self, AppState};

/// context-forge — build retrieval-augmented context for local LLM
/// workflows.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; defaults are used when the file does not exist.
#[derive(Parser)]
#[command(
    name = "cforge",
    about = "context-forge — a retrieval-augmented context builder for local LLM workflows",
    version,
    long_about = "context-forge ingests PDFs, web pages, and local directories into a \
    vector index, then assembles budget-constrained context blocks for question \
    answering, summarization, and bounded agent tasks against a local generation backend."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest a source and add it to the vector index.
    ///
    /// Re-ingesting the same locator supersedes its previous entries.
    /// The index snapshot is rewritten after a successful build.
    BuildContext {
        #[command(subcommand)]
        source: BuildSource,
    },

    /// Answer a question over the indexed context.
    Query {
        /// The question to answer.
        text: String,

        /// Maximum number of passages to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Token budget for the assembled context block.
        #[arg(long)]
        budget: Option<usize>,

        /// Only use passages from this source kind (directory, web, pdf).
        #[arg(long)]
        kind: Option<String>,

        /// Only use passages whose origin starts with this prefix.
        #[arg(long)]
        origin_prefix: Option<String>,

        /// Deadline in seconds for retrieval and generation calls.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Ingest a source and summarize it in reading order.
    Summarize {
        #[command(subcommand)]
        source: SummarizeSource,
    },

    /// Run agent tasks over the indexed context.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Start the HTTP API server.
    ///
    /// Endpoints map 1:1 to the CLI subcommands and return
    /// `{result, sources, error}` JSON envelopes.
    Serve,
}

/// Sources accepted by `build-context`.
#[derive(Subcommand)]
enum BuildSource {
    /// Recurse over a local directory, one document per matching file.
    Directory {
        /// Root directory to ingest.
        #[arg(long)]
        path: PathBuf,

        /// Override the configured chunk size (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the configured chunk overlap (characters).
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Fetch and index a single web page.
    Web {
        /// Page URL.
        #[arg(long)]
        url: String,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Extract and index a PDF from a local path or a URL.
    Pdf {
        /// Local PDF file.
        #[arg(long, conflicts_with = "url")]
        path: Option<PathBuf>,

        /// Remote PDF URL.
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },
}

/// Sources accepted by `summarize`.
#[derive(Subcommand)]
enum SummarizeSource {
    /// Summarize a single web page.
    Web {
        #[arg(long)]
        url: String,

        /// Token budget for the context fed to the summarizer.
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Summarize the files of a local directory.
    Directory {
        #[arg(long)]
        path: PathBuf,

        #[arg(long)]
        budget: Option<usize>,
    },
}

/// Agent subcommands.
#[derive(Subcommand)]
enum AgentAction {
    /// Run one bounded agent task and print its step trace.
    Run {
        /// The task description.
        task: String,

        /// Step ceiling before the task fails.
        #[arg(long)]
        max_steps: Option<usize>,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        budget: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    let state = build_state(cfg)?;

    match cli.command {
        Commands::BuildContext { source } => {
            let (kind, locator, chunk_size, overlap) = match source {
                BuildSource::Directory {
                    path,
                    chunk_size,
                    overlap,
                } => (
                    SourceKind::DirectoryFile,
                    path.display().to_string(),
                    chunk_size,
                    overlap,
                ),
                BuildSource::Web {
                    url,
                    chunk_size,
                    overlap,
                } => (SourceKind::Web, url, chunk_size, overlap),
                BuildSource::Pdf {
                    path,
                    url,
                    chunk_size,
                    overlap,
                } => {
                    let locator = match (path, url) {
                        (Some(p), None) => p.display().to_string(),
                        (None, Some(u)) => u,
                        _ => anyhow::bail!("pdf source requires exactly one of --path or --url"),
                    };
                    (SourceKind::Pdf, locator, chunk_size, overlap)
                }
            };
            run_build(&state, kind, &locator, chunk_size, overlap).await?;
        }
        Commands::Query {
            text,
            top_k,
            budget,
            kind,
            origin_prefix,
            timeout_secs,
        } => {
            let opts = ask_options(&state, top_k, budget, kind, origin_prefix, timeout_secs)?;
            let output = state.orchestrator.answer(&text, &opts).await?;
            println!("{}", output.text.trim());
            print_sources(&output.sources);
        }
        Commands::Summarize { source } => {
            let (kind, locator, budget) = match source {
                SummarizeSource::Web { url, budget } => (SourceKind::Web, url, budget),
                SummarizeSource::Directory { path, budget } => {
                    (SourceKind::DirectoryFile, path.display().to_string(), budget)
                }
            };
            run_summarize(&state, kind, &locator, budget).await?;
        }
        Commands::Agent { action } => match action {
            AgentAction::Run {
                task,
                max_steps,
                top_k,
                budget,
            } => {
                let opts = ask_options(&state, top_k, budget, None, None, None)?;
                let max_steps = max_steps.unwrap_or(state.config.agent.max_steps);
                let outcome = state.orchestrator.run_agent(&task, max_steps, &opts).await?;

                for step in &outcome.steps {
                    println!("step {}: {}", step.step, step.action);
                    println!("  {}", step.observation.replace('\n', "\n  "));
                }
                println!();
                println!("{}", outcome.answer.trim());
                print_sources(&outcome.sources);
            }
        },
        Commands::Serve => {
            server::run_server(state).await?;
        }
    }

    Ok(())
}

/// Wire the adapters, embedder gateway, index, and orchestrator from
/// configuration. All process-wide state lives in this explicitly
/// constructed bundle.
fn build_state(cfg: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(cfg);
    let adapters = Arc::new(AdapterSet::from_config(&config)?);

    let backend = OllamaBackend::new(&config.embedding)?;
    let mut embedder = Embedder::new(
        Box::new(backend),
        config.embedding.batch_size,
        RetryPolicy::from_config(&config.embedding),
    );
    if config.embedding.cache {
        embedder = embedder.with_cache(EmbeddingCache::new());
    }
    let embedder = Arc::new(embedder);

    let index = Arc::new(pipeline::open_index(&config).with_context(|| {
        format!(
            "failed to open index snapshot {}",
            config.index.snapshot.display()
        )
    })?);

    let retriever = Arc::new(Retriever::new(embedder.clone(), index.clone()));
    let generator = Arc::new(OllamaGenerator::new(&config.generation)?);
    let orchestrator = Arc::new(Orchestrator::new(retriever, generator));

    Ok(AppState {
        config,
        adapters,
        embedder,
        index,
        orchestrator,
    })
}

async fn run_build(
    state: &AppState,
    kind: SourceKind,
    locator: &str,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> anyhow::Result<()> {
    let params = ChunkParams::new(
        chunk_size.unwrap_or(state.config.chunking.chunk_size),
        overlap.unwrap_or(state.config.chunking.overlap),
    )?;

    let outcome = pipeline::build_context(
        &state.adapters,
        &state.embedder,
        &state.index,
        kind,
        locator,
        &params,
    )
    .await?;
    state.index.persist(&state.config.index.snapshot)?;

    let stats = state.index.stats();
    println!("build-context {}", kind);
    println!("  documents indexed: {}", outcome.documents_indexed);
    if outcome.documents_empty > 0 {
        println!("  documents empty:   {}", outcome.documents_empty);
    }
    println!("  chunks indexed:    {}", outcome.chunks_indexed);
    for failure in &outcome.failures {
        println!("  failed: {}", failure.error);
    }
    println!(
        "  index: {} entries / {} documents ({}, {} dims)",
        stats.entries, stats.documents, stats.model, stats.dims
    );
    println!("  snapshot: {}", state.config.index.snapshot.display());

    if outcome.has_failures() {
        anyhow::bail!(
            "{} of {} source item(s) failed during ingestion",
            outcome.failures.len(),
            outcome.failures.len() + outcome.documents_indexed + outcome.documents_empty
        );
    }
    println!("ok");
    Ok(())
}

async fn run_summarize(
    state: &AppState,
    kind: SourceKind,
    locator: &str,
    budget: Option<usize>,
) -> anyhow::Result<()> {
    let adapter = state
        .adapters
        .find(kind)
        .ok_or_else(|| anyhow::anyhow!("no adapter for source kind '{}'", kind))?;
    let report = adapter.ingest(locator).await?;
    if report.documents.is_empty() {
        anyhow::bail!("nothing to summarize at '{}'", locator);
    }

    let params = ChunkParams::new(
        state.config.chunking.chunk_size,
        state.config.chunking.overlap,
    )?;
    let budget = budget.unwrap_or(state.config.retrieval.token_budget);
    let block = pipeline::sequential_block(&report.documents, &params, budget);

    let timeout = match state.config.generation.timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let output = state.orchestrator.summarize_block(&block, timeout).await?;

    println!("{}", output.text.trim());
    print_sources(&output.sources);

    if report.has_failures() {
        for failure in &report.failures {
            println!("failed: {}", failure.error);
        }
        anyhow::bail!("{} source item(s) failed during ingestion", report.failed_count());
    }
    Ok(())
}

fn ask_options(
    state: &AppState,
    top_k: Option<usize>,
    budget: Option<usize>,
    kind: Option<String>,
    origin_prefix: Option<String>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<AskOptions> {
    let mut opts = AskOptions::new(
        top_k.unwrap_or(state.config.retrieval.top_k),
        budget.unwrap_or(state.config.retrieval.token_budget),
    );
    opts.filters = QueryFilters {
        kind: match kind.as_deref() {
            None => None,
            Some("directory") | Some("directory_file") => Some(SourceKind::DirectoryFile),
            Some("web") => Some(SourceKind::Web),
            Some("pdf") => Some(SourceKind::Pdf),
            Some(other) => anyhow::bail!(
                "unknown source kind '{}'; expected directory, web, or pdf",
                other
            ),
        },
        origin_prefix,
    };
    let timeout = timeout_secs.unwrap_or(state.config.retrieval.timeout_secs);
    if timeout > 0 {
        opts.timeout = Some(Duration::from_secs(timeout));
    }
    Ok(opts)
}

fn print_sources(sources: &[String]) {
    if !sources.is_empty() {
        println!();
        println!("sources:");
        for source in sources {
            println!("  {}", source);
        }
    }
}
