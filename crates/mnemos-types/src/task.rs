//! Auxiliary records: scheduled tasks and audit logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of deferred or scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Task name (worker key).
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Room the task belongs to.
    pub room_id: Option<Uuid>,
    /// World the task belongs to.
    pub world_id: Option<Uuid>,
    /// Entity the task is about.
    pub entity_id: Option<Uuid>,
    /// Tags.
    pub tags: Vec<String>,
    /// Free-form metadata (schedule, options, ...).
    pub metadata: serde_json::Value,
    /// When this task was created.
    pub created_at: DateTime<Utc>,
    /// When this task was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create an unscoped task with a random ID.
    pub fn new(agent_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            name: name.into(),
            description: None,
            room_id: None,
            world_id: None,
            entity_id: None,
            tags: Vec::new(),
            metadata: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this task carries every tag in `tags`.
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

/// Partial update applied by `update_task`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New room; `Some(None)` clears it.
    pub room_id: Option<Option<Uuid>>,
    /// New world; `Some(None)` clears it.
    pub world_id: Option<Option<Uuid>>,
    /// New entity; `Some(None)` clears it.
    pub entity_id: Option<Option<Uuid>>,
    /// Replacement tags.
    pub tags: Option<Vec<String>>,
    /// Partial metadata, merged into the stored metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Filters for `get_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Restrict to one agent.
    pub agent_id: Option<Uuid>,
    /// Restrict to one room.
    pub room_id: Option<Uuid>,
    /// Restrict to one entity.
    pub entity_id: Option<Uuid>,
    /// Tasks must carry every one of these tags.
    pub tags: Vec<String>,
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique log ID.
    pub id: Uuid,
    /// Entity the record is about.
    pub entity_id: Uuid,
    /// Room the record happened in.
    pub room_id: Option<Uuid>,
    /// Record type.
    #[serde(rename = "type")]
    pub log_type: String,
    /// Body.
    pub body: serde_json::Value,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Create a log record with a random ID.
    pub fn new(
        entity_id: Uuid,
        room_id: Option<Uuid>,
        log_type: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            room_id,
            log_type: log_type.into(),
            body,
            created_at: Utc::now(),
        }
    }
}

/// Filters for `get_logs`, newest first.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Restrict to one entity.
    pub entity_id: Option<Uuid>,
    /// Restrict to one room.
    pub room_id: Option<Uuid>,
    /// Restrict to one record type.
    pub log_type: Option<String>,
    /// Maximum number of records.
    pub count: Option<usize>,
    /// Records to skip.
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_all_tags() {
        let mut task = Task::new(Uuid::new_v4(), "follow-up");
        task.tags = vec!["queue".into(), "repeat".into()];
        assert!(task.has_all_tags(&["queue".into()]));
        assert!(task.has_all_tags(&[]));
        assert!(!task.has_all_tags(&["queue".into(), "urgent".into()]));
    }
}
