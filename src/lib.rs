//! # notes-recall
//!
//! Local, incremental semantic indexing and retrieval over a workspace's
//! notes, task lists, logs and session transcripts.
//!
//! Documents are split into overlapping line-addressed chunks, embedded
//! through a pluggable provider and persisted as a content-addressed index.
//! Rebuilds reuse everything that did not change, using git when available
//! and file stamps otherwise.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │ Collector │──▶│ Chunker │──▶│ Builder  │──▶│ index.json│
//! │ globs+git │   │  lines  │   │ reuse+emb│   │ meta.json │
//! └───────────┘   └─────────┘   └────┬─────┘   └─────┬─────┘
//!                                    │               │
//!                              ┌─────┴─────┐   ┌─────▼─────┐
//!                              │   Jobs    │   │  Search   │
//!                              │ FIFO queue│   │  cosine   │
//!                              └───────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`collect`] | Document discovery |
//! | [`chunk`] | Line-addressed chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`codec`] | Vector ⇄ text encoding |
//! | [`git`] | Change detection via git |
//! | [`store`] | Index persistence |
//! | [`builder`] | Incremental index build |
//! | [`freshness`] | Up-to-date check |
//! | [`search`] | Similarity search |
//! | [`jobs`] | Build job queue |
//! | [`progress`] | Build progress events and reporters |

pub mod builder;
pub mod chunk;
pub mod codec;
pub mod collect;
pub mod config;
pub mod embedding;
pub mod error;
pub mod freshness;
pub mod git;
pub mod jobs;
pub mod models;
pub mod progress;
pub mod search;
pub mod store;
