//! Agent records: the root of every ownership chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent ID.
    pub id: Uuid,
    /// Display name, unique across the database.
    pub name: String,
    /// Optional handle on external platforms.
    pub username: Option<String>,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Biography lines.
    pub bio: Vec<String>,
    /// Plugin names enabled for this agent.
    pub plugins: Vec<String>,
    /// Arbitrary nested settings; the target of the settings-merge.
    pub settings: serde_json::Value,
    /// Whether the agent is enabled.
    pub enabled: bool,
    /// When this agent was created.
    pub created_at: DateTime<Utc>,
    /// When this agent was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new enabled agent with a random ID and empty settings.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            username: None,
            system: None,
            bio: Vec::new(),
            plugins: Vec::new(),
            settings: serde_json::Value::Object(Default::default()),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by `update_agent`.
///
/// `None` leaves a field untouched. `settings` is merged into the stored
/// settings (null deletes a key, objects merge, arrays replace).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    /// New name.
    pub name: Option<String>,
    /// New username; `Some(None)` clears it.
    pub username: Option<Option<String>>,
    /// New system prompt; `Some(None)` clears it.
    pub system: Option<Option<String>>,
    /// Replacement biography.
    pub bio: Option<Vec<String>>,
    /// Replacement plugin list.
    pub plugins: Option<Vec<String>>,
    /// Partial settings object to merge.
    pub settings: Option<serde_json::Value>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

impl AgentUpdate {
    /// An update that only merges settings.
    pub fn settings(partial: serde_json::Value) -> Self {
        Self {
            settings: Some(partial),
            ..Default::default()
        }
    }
}

/// Result of deleting an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The agent and its whole ownership closure were removed.
    Deleted(CascadeReport),
    /// No agent with that ID existed.
    NotFound,
}

impl DeleteOutcome {
    /// Whether anything was deleted.
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted(_))
    }
}

/// Rows removed per table by a cascade deletion, in deletion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// `(table, rows removed)` pairs.
    pub removed: Vec<(String, u64)>,
}

impl CascadeReport {
    /// Total rows removed across every table.
    pub fn total(&self) -> u64 {
        self.removed.iter().map(|(_, n)| n).sum()
    }

    /// Rows removed from one table.
    pub fn rows_for(&self, table: &str) -> u64 {
        self.removed
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| n)
            .sum()
    }
}
