//! Agent records: the root of every ownership chain.

use super::{require_text, string_list, RejectConflict};
use crate::cascade;
use crate::connection::{ConnectionManager, Row};
use crate::merge::merge_json;
use crate::sql_params;
use chrono::Utc;
use mnemos_types::agent::{Agent, AgentUpdate, DeleteOutcome};
use mnemos_types::error::StoreResult;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const AGENT_COLUMNS: &str =
    "id, name, username, system, bio, plugins, settings, enabled, created_at, updated_at";

#[derive(Clone)]
pub struct AgentStore {
    db: Arc<dyn ConnectionManager>,
}

impl AgentStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Insert an agent. Returns `false` when the id or the name is taken.
    pub async fn create_agent(&self, agent: &Agent) -> StoreResult<bool> {
        require_text("agent name", &agent.name)?;
        let mut session = self.db.acquire().await?;
        let created = session
            .execute(
                &format!("INSERT INTO agents ({AGENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"),
                &sql_params![
                    agent.id,
                    agent.name.as_str(),
                    agent.username.as_deref(),
                    agent.system.as_deref(),
                    serde_json::to_value(&agent.bio)?,
                    serde_json::to_value(&agent.plugins)?,
                    &agent.settings,
                    agent.enabled,
                    agent.created_at,
                    agent.updated_at,
                ],
            )
            .await
            .rejected_on_conflict("create_agent")?;
        match created {
            Some(_) => {
                info!(agent_id = %agent.id, name = %agent.name, "Agent created");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"),
                &sql_params![id],
            )
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    /// Every agent, oldest first.
    pub async fn get_agents(&self) -> StoreResult<Vec<Agent>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at, name"),
                &[],
            )
            .await?;
        rows.iter().map(agent_from_row).collect()
    }

    pub async fn count_agents(&self) -> StoreResult<u64> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional("SELECT COUNT(*) AS count FROM agents", &[])
            .await?;
        Ok(row.map(|r| r.i64("count")).transpose()?.unwrap_or(0) as u64)
    }

    /// Apply a partial update. `settings` is merged into the stored settings
    /// (null deletes a key); other present fields replace. Updating an
    /// unknown agent succeeds without effect. Returns `false` when the new
    /// name is taken by another agent.
    pub async fn update_agent(&self, id: Uuid, update: &AgentUpdate) -> StoreResult<bool> {
        if let Some(name) = &update.name {
            require_text("agent name", name)?;
        }
        let mut tx = self.db.begin().await?;
        let row = tx
            .fetch_optional(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"),
                &sql_params![id],
            )
            .await?;
        let Some(row) = row else {
            debug!(agent_id = %id, "update_agent: no such agent");
            tx.commit().await?;
            return Ok(true);
        };
        let mut agent = agent_from_row(&row)?;

        if let Some(name) = &update.name {
            agent.name = name.clone();
        }
        if let Some(username) = &update.username {
            agent.username = username.clone();
        }
        if let Some(system) = &update.system {
            agent.system = system.clone();
        }
        if let Some(bio) = &update.bio {
            agent.bio = bio.clone();
        }
        if let Some(plugins) = &update.plugins {
            agent.plugins = plugins.clone();
        }
        if let Some(enabled) = update.enabled {
            agent.enabled = enabled;
        }
        if let Some(partial) = &update.settings {
            agent.settings = merge_json(&agent.settings, partial);
        }

        let updated = tx
            .execute(
                "UPDATE agents SET name = $2, username = $3, system = $4, bio = $5, plugins = $6, \
                 settings = $7, enabled = $8, updated_at = $9 WHERE id = $1",
                &sql_params![
                    id,
                    agent.name.as_str(),
                    agent.username.as_deref(),
                    agent.system.as_deref(),
                    serde_json::to_value(&agent.bio)?,
                    serde_json::to_value(&agent.plugins)?,
                    &agent.settings,
                    agent.enabled,
                    Utc::now(),
                ],
            )
            .await
            .rejected_on_conflict("update_agent")?;
        if updated.is_none() {
            return Ok(false);
        }
        tx.commit().await?;
        debug!(agent_id = %id, "Agent updated");
        Ok(true)
    }

    /// Remove the agent and everything it owns.
    pub async fn delete_agent(&self, id: Uuid) -> StoreResult<DeleteOutcome> {
        cascade::delete_agent(self.db.as_ref(), id).await
    }
}

fn agent_from_row(row: &Row) -> StoreResult<Agent> {
    Ok(Agent {
        id: row.uuid("id")?,
        name: row.text("name")?,
        username: row.opt_text("username")?,
        system: row.opt_text("system")?,
        bio: string_list(row.json("bio")?)?,
        plugins: string_list(row.json("plugins")?)?,
        settings: row.json("settings")?,
        enabled: row.bool("enabled")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
    })
}
