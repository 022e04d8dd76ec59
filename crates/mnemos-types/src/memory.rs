//! Memory records, embeddings and query parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Embedding widths the store keeps a physical column for.
pub const SUPPORTED_DIMENSIONS: [usize; 6] = [384, 512, 768, 1024, 1536, 3072];

/// Content of a memory: text plus arbitrary structured payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    /// Text body.
    #[serde(default)]
    pub text: String,
    /// Any additional structured fields.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl MemoryContent {
    /// Content with only a text body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: Default::default(),
        }
    }
}

/// Memory metadata: kind and source plus free-form fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Memory kind (message, document, fragment, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Where this memory came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Any additional fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A stored content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique memory ID, global across partitions.
    pub id: Uuid,
    /// Entity that produced the memory.
    pub entity_id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Room the memory belongs to.
    pub room_id: Uuid,
    /// World the memory belongs to.
    pub world_id: Option<Uuid>,
    /// Content.
    pub content: MemoryContent,
    /// Optional embedding vector.
    pub embedding: Option<Vec<f32>>,
    /// Logical partition ("table") the memory was written to.
    pub partition: String,
    /// Uniqueness flag.
    pub unique: bool,
    /// Metadata.
    pub metadata: MemoryMetadata,
    /// When this memory was created.
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a text memory with a random ID.
    pub fn new(
        agent_id: Uuid,
        entity_id: Uuid,
        room_id: Uuid,
        content: MemoryContent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            agent_id,
            room_id,
            world_id: None,
            content,
            embedding: None,
            partition: String::new(),
            unique: false,
            metadata: MemoryMetadata::default(),
            created_at: Utc::now(),
        }
    }

    /// Builder-style embedding setter.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Partial update applied by `update_memory`.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    /// Memory to update.
    pub id: Uuid,
    /// Replacement content.
    pub content: Option<MemoryContent>,
    /// Replacement metadata.
    pub metadata: Option<MemoryMetadata>,
    /// Replacement embedding.
    pub embedding: Option<Vec<f32>>,
}

/// Filters for `get_memories`.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Partition to read.
    pub partition: String,
    /// Restrict to one room.
    pub room_id: Option<Uuid>,
    /// Restrict to one world.
    pub world_id: Option<Uuid>,
    /// Restrict to one entity.
    pub entity_id: Option<Uuid>,
    /// Restrict to one agent.
    pub agent_id: Option<Uuid>,
    /// Only unique memories when `Some(true)`.
    pub unique: Option<bool>,
    /// Only memories created at or after this time.
    pub start: Option<DateTime<Utc>>,
    /// Only memories created at or before this time.
    pub end: Option<DateTime<Utc>>,
    /// Maximum number of memories returned.
    pub count: Option<usize>,
}

impl MemoryQuery {
    /// Query a partition of one room.
    pub fn room(partition: impl Into<String>, room_id: Uuid) -> Self {
        Self {
            partition: partition.into(),
            room_id: Some(room_id),
            ..Default::default()
        }
    }

    /// Builder-style count limit.
    pub fn limit(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// Parameters for embedding similarity search.
#[derive(Debug, Clone)]
pub struct MemorySearch {
    /// Partition to search.
    pub partition: String,
    /// Query vector; its length must equal the active width.
    pub embedding: Vec<f32>,
    /// Minimum cosine similarity.
    pub match_threshold: f32,
    /// Maximum number of results.
    pub count: usize,
    /// Restrict to one room.
    pub room_id: Option<Uuid>,
    /// Restrict to one world.
    pub world_id: Option<Uuid>,
    /// Restrict to one entity.
    pub entity_id: Option<Uuid>,
    /// Restrict to one agent.
    pub agent_id: Option<Uuid>,
    /// Only unique memories when true.
    pub unique_only: bool,
}

/// A memory ranked by similarity.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The memory.
    pub memory: Memory,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
}
