//! Typed facts attached to entities.
//!
//! The lookup key `(entity, type, world, source entity)` contains nullable
//! parts; the `uq_components_key` index compares them null-safely, so a
//! missing world or source counts as one value.

use super::{require_text, RejectConflict};
use crate::connection::{ConnectionManager, Row, SqlParam};
use crate::merge::merge_json;
use crate::sql_params;
use mnemos_types::entity::Component;
use mnemos_types::error::StoreResult;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const COMPONENT_COLUMNS: &str =
    "id, entity_id, agent_id, room_id, world_id, source_entity_id, type, data, created_at";

const KEY_FILTER: &str = "entity_id = $1 AND type = $2 \
     AND world_id IS NOT DISTINCT FROM $3 AND source_entity_id IS NOT DISTINCT FROM $4";

#[derive(Clone)]
pub struct ComponentStore {
    db: Arc<dyn ConnectionManager>,
}

impl ComponentStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Insert a component. Returns `false` when its lookup key or id is
    /// already taken, or an owner reference is dangling.
    pub async fn create_component(&self, component: &Component) -> StoreResult<bool> {
        require_text("component type", &component.component_type)?;
        let mut session = self.db.acquire().await?;
        let inserted = session
            .execute(
                &format!("INSERT INTO components ({COMPONENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"),
                &sql_params![
                    component.id,
                    component.entity_id,
                    component.agent_id,
                    component.room_id,
                    component.world_id,
                    component.source_entity_id,
                    component.component_type.as_str(),
                    &component.data,
                    component.created_at,
                ],
            )
            .await
            .rejected_on_conflict("create_component")?;
        if inserted.is_none() {
            debug!(entity_id = %component.entity_id, component_type = %component.component_type, "Component not created");
        }
        Ok(inserted.is_some())
    }

    /// The component for an exact lookup key; `None` world or source match
    /// only components without one.
    pub async fn get_component(
        &self,
        entity_id: Uuid,
        component_type: &str,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> StoreResult<Option<Component>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE {KEY_FILTER}"),
                &key_params(entity_id, component_type, world_id, source_entity_id),
            )
            .await?;
        row.as_ref().map(component_from_row).transpose()
    }

    /// Every component of an entity, optionally narrowed by world and source.
    pub async fn get_components(
        &self,
        entity_id: Uuid,
        world_id: Option<Uuid>,
        source_entity_id: Option<Uuid>,
    ) -> StoreResult<Vec<Component>> {
        let mut sql = format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE entity_id = $1");
        let mut params = sql_params![entity_id];
        if let Some(world_id) = world_id {
            params.push(SqlParam::from(world_id));
            sql.push_str(&format!(" AND world_id = ${}", params.len()));
        }
        if let Some(source_entity_id) = source_entity_id {
            params.push(SqlParam::from(source_entity_id));
            sql.push_str(&format!(" AND source_entity_id = ${}", params.len()));
        }
        sql.push_str(" ORDER BY created_at");

        let mut session = self.db.acquire().await?;
        let rows = session.fetch_all(&sql, &params).await?;
        rows.iter().map(component_from_row).collect()
    }

    /// Replace the payload and room scope. An unknown id is a no-op.
    pub async fn update_component(&self, component: &Component) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "UPDATE components SET data = $2, room_id = $3 WHERE id = $1",
                &sql_params![component.id, &component.data, component.room_id],
            )
            .await?;
        Ok(())
    }

    /// Merge `partial` into the stored payload (null deletes a key).
    pub async fn merge_component_data(&self, id: Uuid, partial: &serde_json::Value) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        let row = tx
            .fetch_optional("SELECT data FROM components WHERE id = $1", &sql_params![id])
            .await?;
        let Some(row) = row else {
            debug!(component_id = %id, "merge_component_data: no such component");
            return tx.commit().await;
        };
        let merged = merge_json(&row.json("data")?, partial);
        tx.execute(
            "UPDATE components SET data = $2 WHERE id = $1",
            &sql_params![id, merged],
        )
        .await?;
        tx.commit().await
    }

    /// Idempotent.
    pub async fn delete_component(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute("DELETE FROM components WHERE id = $1", &sql_params![id])
            .await?;
        Ok(())
    }
}

fn key_params(
    entity_id: Uuid,
    component_type: &str,
    world_id: Option<Uuid>,
    source_entity_id: Option<Uuid>,
) -> Vec<SqlParam> {
    sql_params![entity_id, component_type, world_id, source_entity_id]
}

fn component_from_row(row: &Row) -> StoreResult<Component> {
    Ok(Component {
        id: row.uuid("id")?,
        entity_id: row.uuid("entity_id")?,
        agent_id: row.uuid("agent_id")?,
        room_id: row.opt_uuid("room_id")?,
        world_id: row.opt_uuid("world_id")?,
        source_entity_id: row.opt_uuid("source_entity_id")?,
        component_type: row.text("type")?,
        data: row.json("data")?,
        created_at: row.timestamp("created_at")?,
    })
}
