//! Agent-memory persistence for Mnemos.
//!
//! One logical storage contract over two backends:
//! - **Postgres + pgvector** (sqlx pool) for networked deployments
//! - **Embedded SQLite** (rusqlite) for single-process use, on disk or in memory
//!
//! Callers build a [`StorageAdapter`], which connects, runs the
//! [`MigrationService`] over the core schema and any plugin schemas, and
//! hands out typed stores (agents, entities, memories, rooms, tasks, ...).

pub mod adapter;
pub mod cascade;
pub mod config;
pub mod connection;
pub mod merge;
pub mod migration;
pub mod schema;
pub mod stores;

pub use adapter::{StorageAdapter, StorageAdapterBuilder};
pub use connection::{BackendKind, ConnectionManager};
pub use migration::{MigrationReport, MigrationService};
pub use stores::memory::EmbeddingDimension;
