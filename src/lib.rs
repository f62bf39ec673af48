//! # context-forge
//!
//! A retrieval-augmented context builder for local LLM workflows.
//!
//! context-forge ingests heterogeneous sources (PDFs, web pages, local
//! directories) into a vector index and assembles budget-constrained
//! context blocks for question answering, summarization, and bounded agent
//! tasks against a local generation backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Adapters   │──▶│   Pipeline   │──▶│  Vector   │
//! │ dir/web/pdf  │   │ chunk+embed  │   │  index    │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                             │
//!                         ┌───────────────────┤
//!                         ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │ (cforge) │       │   API    │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **Adapters** ([`adapter`]) normalize each source into
//!    [`models::Document`]s with provenance; per-item failures are
//!    collected, never silently dropped.
//! 2. The **chunker** ([`chunk`]) splits bodies into bounded, overlapping
//!    [`models::Chunk`]s on paragraph/sentence boundaries.
//! 3. The **embedder gateway** ([`embed`]) batches, caches, and retries
//!    calls to the embedding backend, preserving input order.
//! 4. The **vector index** ([`index`]) stores normalized vectors with
//!    denormalized provenance and serves deterministic cosine search.
//! 5. The **retriever** ([`retrieve`]) deduplicates overlapping passages
//!    and greedily packs hits under a token budget.
//! 6. The **assembler** ([`assemble`]) orders and formats passages into a
//!    prompt-ready [`models::ContextBlock`].
//! 7. The **orchestrator** ([`orchestrate`]) issues single-shot generation
//!    or summarization calls, or drives the bounded agent loop.
//!
//! ## Quick Start
//!
//! ```bash
//! cforge build-context directory --path ./docs
//! cforge query "how does the retry policy work"
//! cforge summarize web --url https://example.com/post
//! cforge agent run "find where timeouts are configured"
//! cforge serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`adapter`] | Source adapter trait and registry |
//! | [`adapter_dir`] | Directory adapter |
//! | [`adapter_web`] | Web page adapter |
//! | [`adapter_pdf`] | PDF adapter |
//! | [`chunk`] | Boundary-preferring chunker |
//! | [`embed`] | Embedding backends and gateway |
//! | [`index`] | Vector index with snapshot persistence |
//! | [`retrieve`] | Budgeted retrieval |
//! | [`assemble`] | Context assembly |
//! | [`orchestrate`] | Generation, summarization, agent loop |
//! | [`pipeline`] | Build pipeline |
//! | [`server`] | HTTP API server |

pub mod adapter;
pub mod adapter_dir;
pub mod adapter_pdf;
pub mod adapter_web;
pub mod assemble;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod error;
pub mod index;
pub mod models;
pub mod orchestrate;
pub mod pipeline;
pub mod retrieve;
pub mod server;
