//! Agent-scoped key/value cache with optional expiry.

use crate::connection::ConnectionManager;
use crate::sql_params;
use chrono::{DateTime, Duration, Utc};
use mnemos_types::error::StoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct CacheStore {
    db: Arc<dyn ConnectionManager>,
}

impl CacheStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// The value under `key`; `None` when missing or expired.
    pub async fn get_cache(&self, agent_id: Uuid, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                "SELECT value, expires_at FROM cache WHERE key = $1 AND agent_id = $2",
                &sql_params![key, agent_id],
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        if let Some(expires_at) = row.opt_timestamp("expires_at")? {
            if expires_at <= Utc::now() {
                debug!(key, "cache entry expired");
                return Ok(None);
            }
        }
        Ok(Some(row.json("value")?))
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub async fn set_cache(&self, agent_id: Uuid, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        self.upsert(agent_id, key, value, None).await
    }

    /// Like [`set_cache`](Self::set_cache), expiring after `ttl`.
    pub async fn set_cache_with_ttl(
        &self,
        agent_id: Uuid,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.upsert(agent_id, key, value, Some(Utc::now() + ttl)).await
    }

    /// Idempotent.
    pub async fn delete_cache(&self, agent_id: Uuid, key: &str) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "DELETE FROM cache WHERE key = $1 AND agent_id = $2",
                &sql_params![key, agent_id],
            )
            .await?;
        Ok(())
    }

    /// Typed read; a stored value that does not deserialize is an error.
    pub async fn get_cache_as<T: DeserializeOwned>(&self, agent_id: Uuid, key: &str) -> StoreResult<Option<T>> {
        match self.get_cache(agent_id, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_cache_as<T: Serialize>(&self, agent_id: Uuid, key: &str, value: &T) -> StoreResult<()> {
        self.set_cache(agent_id, key, &serde_json::to_value(value)?).await
    }

    async fn upsert(
        &self,
        agent_id: Uuid,
        key: &str,
        value: &serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "INSERT INTO cache (key, agent_id, value, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (key, agent_id) DO UPDATE SET value = excluded.value, \
                 created_at = excluded.created_at, expires_at = excluded.expires_at",
                &sql_params![key, agent_id, value, Utc::now(), expires_at],
            )
            .await?;
        Ok(())
    }
}
