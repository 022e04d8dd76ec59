//! The storage facade callers hold: one connection manager, the schema
//! registry it was migrated with, and typed store handles over both.

use crate::connection::{self, BackendKind, ConnectionManager};
use crate::migration::{MigrationReport, MigrationService};
use crate::schema::TableDef;
use crate::stores::memory::EmbeddingDimension;
use crate::stores::{
    AgentStore, CacheStore, ComponentStore, EntityStore, LogStore, MemoryStore,
    RelationshipStore, TaskStore, WorldStore,
};
use mnemos_types::config::StorageConfig;
use mnemos_types::error::StoreResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Collects plugin schemas before the adapter connects.
pub struct StorageAdapterBuilder {
    config: StorageConfig,
    migrations: MigrationService,
}

impl StorageAdapterBuilder {
    /// Register a plugin schema module. A name registered twice keeps its
    /// first definition.
    pub fn register_schema(mut self, name: impl Into<String>, tables: Vec<TableDef>) -> Self {
        self.migrations.register_schema(name, tables);
        self
    }

    /// Connect, migrate every registered module and apply the configured
    /// embedding width. Any migration failure aborts and closes the
    /// connection.
    pub async fn init(self) -> StoreResult<StorageAdapter> {
        let db = connection::connect(&self.config).await?;
        let report = match self.migrations.run(db.as_ref()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Migration failed, closing connection");
                db.close().await;
                return Err(e);
            }
        };
        let adapter = StorageAdapter {
            db,
            dimension: EmbeddingDimension::default(),
            migrations: Mutex::new(self.migrations),
            report,
        };
        if let Some(width) = self.config.embedding_dimension {
            if let Err(e) = adapter.memories().ensure_embedding_dimension(width).await {
                adapter.close().await;
                return Err(e);
            }
        }
        info!(
            backend = %adapter.backend(),
            applied = adapter.report.applied.len(),
            reconciled = adapter.report.reconciled.len(),
            skipped = adapter.report.skipped.len(),
            "Storage ready"
        );
        Ok(adapter)
    }
}

/// A migrated database plus typed stores over it.
pub struct StorageAdapter {
    db: Arc<dyn ConnectionManager>,
    dimension: EmbeddingDimension,
    migrations: Mutex<MigrationService>,
    report: MigrationReport,
}

impl StorageAdapter {
    /// A builder holding the core schema.
    pub fn builder(config: StorageConfig) -> StorageAdapterBuilder {
        StorageAdapterBuilder {
            config,
            migrations: MigrationService::with_core(),
        }
    }

    /// Connect and migrate the core schema only.
    pub async fn init(config: StorageConfig) -> StoreResult<Self> {
        Self::builder(config).init().await
    }

    pub fn backend(&self) -> BackendKind {
        self.db.backend()
    }

    /// The report of the startup migration.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    /// Register a plugin schema after startup and migrate it right away.
    /// Already-applied modules are skipped.
    pub async fn register_schema(
        &self,
        name: impl Into<String>,
        tables: Vec<TableDef>,
    ) -> StoreResult<MigrationReport> {
        let mut migrations = self.migrations.lock().await;
        migrations.register_schema(name, tables);
        migrations.run(self.db.as_ref()).await
    }

    /// Whether the backend answers and the adapter is open.
    pub async fn is_ready(&self) -> bool {
        !self.db.is_closed() && self.db.health_check().await
    }

    /// Release every connection. Idempotent.
    pub async fn close(&self) {
        if !self.db.is_closed() {
            self.db.close().await;
            info!(backend = %self.backend(), "Storage closed");
        }
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> Arc<dyn ConnectionManager> {
        self.db.clone()
    }

    pub fn agents(&self) -> AgentStore {
        AgentStore::new(self.db.clone())
    }

    pub fn entities(&self) -> EntityStore {
        EntityStore::new(self.db.clone())
    }

    pub fn relationships(&self) -> RelationshipStore {
        RelationshipStore::new(self.db.clone())
    }

    pub fn components(&self) -> ComponentStore {
        ComponentStore::new(self.db.clone())
    }

    /// Memory handles share the adapter's active embedding width.
    pub fn memories(&self) -> MemoryStore {
        MemoryStore::with_dimension(self.db.clone(), self.dimension.clone())
    }

    pub fn worlds(&self) -> WorldStore {
        WorldStore::new(self.db.clone())
    }

    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.db.clone())
    }

    pub fn cache(&self) -> CacheStore {
        CacheStore::new(self.db.clone())
    }

    pub fn logs(&self) -> LogStore {
        LogStore::new(self.db.clone())
    }

    /// Shorthand for `memories().ensure_embedding_dimension(width)`.
    pub async fn ensure_embedding_dimension(&self, width: usize) -> StoreResult<()> {
        self.memories().ensure_embedding_dimension(width).await
    }
}
