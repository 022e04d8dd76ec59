//! Storage configuration: backend selection, pool sizing, retry and deadlines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Data directory value that selects an in-memory embedded database.
pub const IN_MEMORY: &str = ":memory:";

/// File name of the embedded database inside the data directory.
pub const EMBEDDED_DB_FILE: &str = "mnemos.db";

/// Top-level storage configuration.
///
/// Exactly one backend is selected: a Postgres connection string wins over a
/// data directory, and when neither is set the default data directory is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Connection string for the networked backend.
    pub postgres_url: Option<String>,
    /// Data directory for the embedded backend (`":memory:"` for in-memory).
    pub data_dir: Option<PathBuf>,
    /// Deadline applied to every backend statement, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Embedding width to establish at startup, if any.
    pub embedding_dimension: Option<usize>,
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            data_dir: None,
            operation_timeout_ms: 30_000,
            embedding_dimension: None,
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Configuration for an in-memory embedded database.
    pub fn in_memory() -> Self {
        Self {
            data_dir: Some(PathBuf::from(IN_MEMORY)),
            ..Default::default()
        }
    }

    /// Configuration for an embedded database rooted at `dir`.
    pub fn embedded(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Configuration for the networked backend.
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            postgres_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Resolve which backend this configuration selects.
    pub fn backend(&self) -> BackendSelection {
        if let Some(url) = self.postgres_url.as_ref().filter(|u| !u.trim().is_empty()) {
            return BackendSelection::Postgres { url: url.clone() };
        }
        match &self.data_dir {
            Some(dir) if dir.as_os_str() == IN_MEMORY => BackendSelection::InMemory,
            Some(dir) => BackendSelection::Embedded {
                data_dir: dir.clone(),
            },
            None => BackendSelection::Embedded {
                data_dir: default_data_dir(),
            },
        }
    }
}

/// Resolved backend choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    /// Networked relational engine reached through a connection string.
    Postgres {
        /// Connection string.
        url: String,
    },
    /// Embedded single-process engine persisted under a data directory.
    Embedded {
        /// Directory holding the database file.
        data_dir: PathBuf,
    },
    /// Embedded engine kept entirely in memory.
    InMemory,
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long an acquire may wait before it counts as pool exhaustion.
    pub acquire_timeout_secs: u64,
    /// Idle connections are closed after this long.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Minimum delay between retries in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: 0.2,
        }
    }
}

/// Default data directory: `~/.mnemos/data`, or `./.mnemos/data` without a home.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemos")
        .join("data")
}
