//! # Syncdex
//!
//! A connector-driven sync engine that keeps a vector store up to date with
//! external data sources.
//!
//! Connectors authenticate against a source (Google Drive today), enumerate
//! items changed since the last sync, and stream text chunks into a pipeline
//! that cleans, filters, embeds, and persists them. A scheduler owns the
//! whole thing: it checks staleness on a fixed period, takes a per-connector
//! lock so at most one sync per connector is ever in flight, and reconciles
//! durable connector state when the sync ends.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  chunks   ┌─────────────┐  vectors  ┌─────────────┐
//! │ Connector  │──────────▶│  Pipeline    │──────────▶│ VectorStore │
//! │ (producer) │  mpsc     │ clean+embed │           │ mem/weaviate│
//! └─────▲──────┘           └──────▲──────┘           └──────▲──────┘
//!       │                         │                         │
//!       └───────────┬─────────────┘                         │
//!                   │        spawn + race                   │
//!              ┌────┴────┐   lock / unlock / state          │
//!              │  Syncer │───────────────────────────────────┘
//!              └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types (connector state, documents, chunks) |
//! | [`connector`] | Connector trait and the closed registry |
//! | [`connector_drive`] | Google Drive connector |
//! | [`credentials`] | Credential storage and OAuth exchange |
//! | [`text`] | Whitespace cleaning and chunk splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | Chunk consumer (clean, filter, embed, persist) |
//! | [`store`] | Vector store trait with memory and Weaviate backends |
//! | [`syncer`] | Scheduler, locking, and sync orchestration |
//! | [`retry`] | Shared exponential backoff |
//! | [`error`] | Error taxonomy |

pub mod config;
pub mod connector;
pub mod connector_drive;
pub mod credentials;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod syncer;
pub mod text;
