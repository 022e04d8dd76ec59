//! Identity graph records: entities, relationships and components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An addressable identity (person, bot, object) owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity ID.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Display names; never empty, no empty alias.
    pub names: Vec<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// When this entity was created.
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Create an entity with a random ID and empty metadata.
    pub fn new(agent_id: Uuid, names: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            names,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// Whether any alias equals `name` exactly.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Whether any alias contains `query`, ignoring case.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.names
            .iter()
            .any(|n| n.to_lowercase().contains(&needle))
    }
}

/// A directed edge between two entities. Unique per (source, target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique relationship ID.
    pub id: Uuid,
    /// Entity the edge starts from.
    pub source_entity_id: Uuid,
    /// Entity the edge points to.
    pub target_entity_id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Tag set.
    pub tags: Vec<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// When this relationship was created.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create an untagged relationship with a random ID.
    pub fn new(agent_id: Uuid, source_entity_id: Uuid, target_entity_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_entity_id,
            target_entity_id,
            agent_id,
            tags: Vec::new(),
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// Builder-style tag setter.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Whether this relationship shares at least one tag with `tags`.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// A typed fact attached to an entity.
///
/// The lookup key is `(entity_id, component_type, world_id, source_entity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique component ID.
    pub id: Uuid,
    /// Entity the fact is about.
    pub entity_id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Room scope.
    pub room_id: Option<Uuid>,
    /// World scope.
    pub world_id: Option<Uuid>,
    /// Entity that asserted the fact.
    pub source_entity_id: Option<Uuid>,
    /// Component type name.
    #[serde(rename = "type")]
    pub component_type: String,
    /// Payload.
    pub data: serde_json::Value,
    /// When this component was created.
    pub created_at: DateTime<Utc>,
}

impl Component {
    /// Create an unscoped component with a random ID.
    pub fn new(
        agent_id: Uuid,
        entity_id: Uuid,
        component_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            agent_id,
            room_id: None,
            world_id: None,
            source_entity_id: None,
            component_type: component_type.into(),
            data,
            created_at: Utc::now(),
        }
    }
}
