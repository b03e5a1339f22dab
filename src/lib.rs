//! # Doc Harness
//!
//! Incremental ingestion of versioned documentation trees into a searchable
//! vector index.
//!
//! Raw reStructuredText sources are normalized to markdown, split into
//! header-aware overlapping chunks, embedded, and stored per release. A
//! fingerprint cache of the raw tree drives incremental updates: only added,
//! modified and removed files are touched, and the cache only advances when
//! a whole batch succeeds.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ raw tree  │──▶│  Change   │──▶│       Ingestor       │──▶│   SQLite   │
//! │ versions/ │   │  Detector │   │ normalize→chunk→embed│   │ doc_chunks │
//! └───────────┘   └─────┬─────┘   └──────────┬───────────┘   └─────┬──────┘
//!                       │ snapshot           │ commit / rollback   │
//!                       ▼                    ▼                     ▼
//!                 ┌───────────────────────────────┐          ┌──────────┐
//!                 │          Cache Store          │          │  search  │
//!                 └───────────────────────────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dh init                          # create database
//! dh convert --index               # normalize every source, then bulk index
//! dh update                        # first run records a baseline
//! dh update                        # later runs index what changed
//! dh search "confirm a quotation" --version 17.0
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`layout`] | Release tree layout, versions, document URLs |
//! | [`fingerprint`] | Content hashing |
//! | [`cache`] | Fingerprint snapshot with atomic replace and rollback |
//! | [`changes`] | Change detection against the last snapshot |
//! | [`normalize`] | Source to markdown conversion |
//! | [`chunk`] | Header-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Index store trait and backends |
//! | [`ingest`] | Per-file pipeline and batch commit/rollback |
//! | [`update`] | Incremental update command |
//! | [`bulk`] | Resumable full index |
//! | [`ledger`] | Progress ledger for bulk runs |
//! | [`search`] | Query-time read path |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bulk;
pub mod cache;
pub mod changes;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod layout;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod retry;
pub mod search;
pub mod services;
pub mod status;
pub mod store;
pub mod update;
