//! Memory records and their embeddings.
//!
//! A memory lives in `memories`; its vector lives in a 1:1 `embeddings` row
//! with one physical column per supported width. Only the column of the
//! active width is read or written, so every embedding in a deployment has
//! that width. Similarity ranking is computed here rather than in SQL, so
//! both backends rank identically.

use super::{require_text, RejectConflict};
use crate::connection::{placeholders, ConnectionManager, Row, Session, SqlParam};
use crate::schema::factory::SchemaFactory;
use crate::schema::tables::dimension_column;
use crate::sql_params;
use mnemos_types::error::{StoreError, StoreResult};
use mnemos_types::memory::{
    Memory, MemoryQuery, MemorySearch, MemoryUpdate, ScoredMemory, SUPPORTED_DIMENSIONS,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MEMORY_COLUMNS: &str = r#"m.id, m.type, m.content, m.entity_id, m.agent_id, m.room_id, m.world_id, m."unique", m.metadata, m.created_at"#;

/// Active embedding width shared by every handle of one adapter; unset
/// until `ensure_embedding_dimension` runs.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingDimension(Arc<AtomicUsize>);

impl EmbeddingDimension {
    pub fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            width => Some(width),
        }
    }

    fn set(&self, width: usize) {
        self.0.store(width, Ordering::SeqCst);
    }
}

/// Content records, partitioned by a logical table name.
#[derive(Clone)]
pub struct MemoryStore {
    db: Arc<dyn ConnectionManager>,
    factory: SchemaFactory,
    dimension: EmbeddingDimension,
}

impl MemoryStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self::with_dimension(db, EmbeddingDimension::default())
    }

    /// A store sharing `dimension` with other handles.
    pub fn with_dimension(db: Arc<dyn ConnectionManager>, dimension: EmbeddingDimension) -> Self {
        let factory = SchemaFactory::new(db.backend());
        Self {
            db,
            factory,
            dimension,
        }
    }

    /// Select the active embedding width. Must run before any memory with
    /// an embedding of that width is created.
    pub async fn ensure_embedding_dimension(&self, width: usize) -> StoreResult<()> {
        if !SUPPORTED_DIMENSIONS.contains(&width) {
            return Err(StoreError::Validation(format!(
                "unsupported embedding dimension {width} (supported: {SUPPORTED_DIMENSIONS:?})"
            )));
        }
        let previous = self.dimension.get();
        self.dimension.set(width);
        if previous != Some(width) {
            info!(width, column = %dimension_column(width), "Embedding dimension set");
        }
        Ok(())
    }

    pub fn embedding_dimension(&self) -> Option<usize> {
        self.dimension.get()
    }

    /// Insert a memory into `partition`. Returns `None` when the id is taken
    /// or an owner reference is dangling.
    pub async fn create_memory(&self, memory: &Memory, partition: &str) -> StoreResult<Option<Uuid>> {
        require_text("memory partition", partition)?;
        let column = match &memory.embedding {
            Some(embedding) => Some(self.embedding_column(embedding)?),
            None => None,
        };

        let mut tx = self.db.begin().await?;
        let inserted = tx
            .execute(
                r#"INSERT INTO memories (id, type, content, entity_id, agent_id, room_id, world_id, "unique", metadata, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
                &sql_params![
                    memory.id,
                    partition,
                    SqlParam::json(&memory.content)?,
                    memory.entity_id,
                    memory.agent_id,
                    memory.room_id,
                    memory.world_id,
                    memory.unique,
                    SqlParam::json(&memory.metadata)?,
                    memory.created_at,
                ],
            )
            .await
            .rejected_on_conflict("create_memory")?;
        if inserted.is_none() {
            return Ok(None);
        }
        if let (Some(column), Some(embedding)) = (column, &memory.embedding) {
            self.insert_embedding(tx.as_mut(), memory.id, &column, embedding)
                .await?;
        }
        tx.commit().await?;
        debug!(memory_id = %memory.id, partition, "Memory created");
        Ok(Some(memory.id))
    }

    pub async fn get_memory_by_id(&self, id: Uuid) -> StoreResult<Option<Memory>> {
        Ok(self.get_memories_by_ids(&[id], None).await?.into_iter().next())
    }

    /// Memories of a partition matching every set filter, newest first.
    pub async fn get_memories(&self, query: &MemoryQuery) -> StoreResult<Vec<Memory>> {
        require_text("memory partition", &query.partition)?;
        let mut filter = Filter::new("m.type = $1", sql_params![query.partition.as_str()]);
        filter.eq_opt("m.room_id", query.room_id);
        filter.eq_opt("m.world_id", query.world_id);
        filter.eq_opt("m.entity_id", query.entity_id);
        filter.eq_opt("m.agent_id", query.agent_id);
        if let Some(unique) = query.unique {
            filter.push(r#"m."unique" = "#, unique);
        }
        if let Some(start) = query.start {
            filter.push("m.created_at >= ", start);
        }
        if let Some(end) = query.end {
            filter.push("m.created_at <= ", end);
        }
        self.select(filter, query.count).await
    }

    /// Memories by id, optionally restricted to one partition.
    pub async fn get_memories_by_ids(
        &self,
        ids: &[Uuid],
        partition: Option<&str>,
    ) -> StoreResult<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = Filter::new(
            &format!("m.id IN ({})", placeholders(1, ids.len())),
            ids.iter().map(|id| SqlParam::from(*id)).collect(),
        );
        if let Some(partition) = partition {
            filter.push("m.type = ", partition);
        }
        self.select(filter, None).await
    }

    /// Memories of a partition across several rooms, newest first.
    pub async fn get_memories_by_room_ids(
        &self,
        partition: &str,
        room_ids: &[Uuid],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Memory>> {
        require_text("memory partition", partition)?;
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = sql_params![partition];
        params.extend(room_ids.iter().map(|id| SqlParam::from(*id)));
        let filter = Filter::new(
            &format!(
                "m.type = $1 AND m.room_id IN ({})",
                placeholders(2, room_ids.len())
            ),
            params,
        );
        self.select(filter, limit).await
    }

    /// Memories of a world, newest first.
    pub async fn get_memories_by_world_id(
        &self,
        world_id: Uuid,
        partition: Option<&str>,
        count: Option<usize>,
    ) -> StoreResult<Vec<Memory>> {
        let mut filter = Filter::new("m.world_id = $1", sql_params![world_id]);
        if let Some(partition) = partition {
            filter.push("m.type = ", partition);
        }
        self.select(filter, count).await
    }

    /// Memories whose embedding is at least `match_threshold` cosine-similar
    /// to the query vector, best first.
    pub async fn search_memories(&self, search: &MemorySearch) -> StoreResult<Vec<ScoredMemory>> {
        require_text("memory partition", &search.partition)?;
        let column = self.embedding_column(&search.embedding)?;
        let mut filter = Filter::new("m.type = $1", sql_params![search.partition.as_str()]);
        filter.eq_opt("m.room_id", search.room_id);
        filter.eq_opt("m.world_id", search.world_id);
        filter.eq_opt("m.entity_id", search.entity_id);
        filter.eq_opt("m.agent_id", search.agent_id);
        if search.unique_only {
            filter.push(r#"m."unique" = "#, true);
        }
        filter.clause(&format!("e.{column} IS NOT NULL"));

        let candidates = self.select(filter, None).await?;
        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter_map(|memory| {
                let similarity = cosine_similarity(&search.embedding, memory.embedding.as_deref()?);
                (similarity >= search.match_threshold).then_some(ScoredMemory { memory, similarity })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(search.count);
        debug!(partition = %search.partition, hits = scored.len(), "Memory search");
        Ok(scored)
    }

    /// Replace content, metadata and/or embedding. An unknown id is a no-op.
    pub async fn update_memory(&self, update: &MemoryUpdate) -> StoreResult<()> {
        let column = match &update.embedding {
            Some(embedding) => Some(self.embedding_column(embedding)?),
            None => None,
        };
        let mut tx = self.db.begin().await?;
        let exists = tx
            .fetch_optional("SELECT id FROM memories WHERE id = $1", &sql_params![update.id])
            .await?;
        if exists.is_none() {
            debug!(memory_id = %update.id, "update_memory: no such memory");
            return tx.commit().await;
        }
        if let Some(content) = &update.content {
            tx.execute(
                "UPDATE memories SET content = $2 WHERE id = $1",
                &sql_params![update.id, SqlParam::json(content)?],
            )
            .await?;
        }
        if let Some(metadata) = &update.metadata {
            tx.execute(
                "UPDATE memories SET metadata = $2 WHERE id = $1",
                &sql_params![update.id, SqlParam::json(metadata)?],
            )
            .await?;
        }
        if let (Some(column), Some(embedding)) = (column, &update.embedding) {
            let updated = tx
                .execute(
                    &format!(
                        "UPDATE embeddings SET {column} = {} WHERE memory_id = $1",
                        self.factory.vector_param(2)
                    ),
                    &sql_params![update.id, embedding.as_slice()],
                )
                .await?;
            if updated == 0 {
                self.insert_embedding(tx.as_mut(), update.id, &column, embedding)
                    .await?;
            }
        }
        tx.commit().await
    }

    /// Delete a memory and its embedding. Idempotent.
    pub async fn delete_memory(&self, id: Uuid) -> StoreResult<()> {
        self.delete_many_memories(&[id]).await.map(|_| ())
    }

    /// Delete memories by id; returns how many existed.
    pub async fn delete_many_memories(&self, ids: &[Uuid]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let params: Vec<SqlParam> = ids.iter().map(|id| SqlParam::from(*id)).collect();
        let list = placeholders(1, ids.len());
        let mut tx = self.db.begin().await?;
        tx.execute(
            &format!("DELETE FROM embeddings WHERE memory_id IN ({list})"),
            &params,
        )
        .await?;
        let removed = tx
            .execute(&format!("DELETE FROM memories WHERE id IN ({list})"), &params)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Delete every memory of a partition in one room.
    pub async fn delete_all_memories(&self, room_id: Uuid, partition: &str) -> StoreResult<u64> {
        let params = sql_params![room_id, partition];
        let mut tx = self.db.begin().await?;
        tx.execute(
            "DELETE FROM embeddings WHERE memory_id IN \
             (SELECT id FROM memories WHERE room_id = $1 AND type = $2)",
            &params,
        )
        .await?;
        let removed = tx
            .execute(
                "DELETE FROM memories WHERE room_id = $1 AND type = $2",
                &params,
            )
            .await?;
        tx.commit().await?;
        info!(room_id = %room_id, partition, removed, "Memories cleared");
        Ok(removed)
    }

    /// Number of memories in a room, optionally restricted to unique ones
    /// and to one partition.
    pub async fn count_memories(
        &self,
        room_id: Uuid,
        unique_only: bool,
        partition: Option<&str>,
    ) -> StoreResult<u64> {
        let mut filter = Filter::new("room_id = $1", sql_params![room_id]);
        if unique_only {
            filter.push(r#""unique" = "#, true);
        }
        if let Some(partition) = partition {
            filter.push("type = ", partition);
        }
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!("SELECT COUNT(*) AS count FROM memories WHERE {}", filter.sql),
                &filter.params,
            )
            .await?;
        Ok(row.map(|r| r.i64("count")).transpose()?.unwrap_or(0) as u64)
    }

    /// Physical column for `embedding`, checking it against the active width.
    fn embedding_column(&self, embedding: &[f32]) -> StoreResult<String> {
        let Some(width) = self.dimension.get() else {
            return Err(StoreError::Validation(
                "embedding dimension not set; call ensure_embedding_dimension first".to_string(),
            ));
        };
        if embedding.len() != width {
            return Err(StoreError::Validation(format!(
                "embedding has {} dimensions, expected {width}",
                embedding.len()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::Validation(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(dimension_column(width))
    }

    async fn insert_embedding(
        &self,
        session: &mut dyn Session,
        memory_id: Uuid,
        column: &str,
        embedding: &[f32],
    ) -> StoreResult<()> {
        session
            .execute(
                &format!(
                    "INSERT INTO embeddings (id, memory_id, created_at, {column}) VALUES ($1, $2, $3, {})",
                    self.factory.vector_param(4)
                ),
                &sql_params![Uuid::new_v4(), memory_id, chrono::Utc::now(), embedding],
            )
            .await?;
        Ok(())
    }

    async fn select(&self, filter: Filter, limit: Option<usize>) -> StoreResult<Vec<Memory>> {
        let embedding = match self.dimension.get() {
            Some(width) => self
                .factory
                .vector_select(&format!("e.{}", dimension_column(width)), "embedding"),
            None => "NULL AS embedding".to_string(),
        };
        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS}, {embedding} FROM memories m \
             LEFT JOIN embeddings e ON e.memory_id = m.id \
             WHERE {} ORDER BY m.created_at DESC",
            filter.sql
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut session = self.db.acquire().await?;
        let rows = session.fetch_all(&sql, &filter.params).await?;
        rows.iter().map(memory_from_row).collect()
    }
}

/// A WHERE clause under construction with its numbered parameters.
struct Filter {
    sql: String,
    params: Vec<SqlParam>,
}

impl Filter {
    fn new(sql: &str, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.to_string(),
            params,
        }
    }

    /// Append `AND {lhs}$n` binding `value` as parameter `n`.
    fn push(&mut self, lhs: &str, value: impl Into<SqlParam>) {
        self.params.push(value.into());
        self.sql
            .push_str(&format!(" AND {lhs}${}", self.params.len()));
    }

    fn eq_opt(&mut self, column: &str, value: Option<Uuid>) {
        if let Some(value) = value {
            self.push(&format!("{column} = "), value);
        }
    }

    fn clause(&mut self, sql: &str) {
        self.sql.push_str(" AND ");
        self.sql.push_str(sql);
    }
}

fn memory_from_row(row: &Row) -> StoreResult<Memory> {
    Ok(Memory {
        id: row.uuid("id")?,
        entity_id: row.uuid("entity_id")?,
        agent_id: row.uuid("agent_id")?,
        room_id: row.uuid("room_id")?,
        world_id: row.opt_uuid("world_id")?,
        content: row.json_as("content")?,
        embedding: row.vector("embedding")?,
        partition: row.text("type")?,
        unique: row.bool("unique")?,
        metadata: row.json_as("metadata")?,
        created_at: row.timestamp("created_at")?,
    })
}

/// Cosine similarity; 0 for mismatched, empty or zero-norm vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
