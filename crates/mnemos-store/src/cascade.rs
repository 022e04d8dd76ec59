//! Agent deletion: removes the agent's whole ownership closure.
//!
//! Steps run leaves first inside one transaction, each as a DELETE with
//! subselects over the agent's worlds, rooms and entities, so completeness
//! does not depend on the backend honoring `ON DELETE CASCADE`. Records of
//! other agents that point into the closure (a foreign participant in one
//! of the agent's rooms, a relationship targeting one of its entities) go
//! with it.

use crate::connection::{ConnectionManager, SqlParam};
use mnemos_types::agent::{CascadeReport, DeleteOutcome};
use mnemos_types::error::StoreResult;
use tracing::{debug, info};
use uuid::Uuid;

const ENTITIES: &str = "SELECT id FROM entities WHERE agent_id = $1";
const WORLDS: &str = "SELECT id FROM worlds WHERE agent_id = $1";

fn rooms() -> String {
    format!("SELECT id FROM rooms WHERE agent_id = $1 OR world_id IN ({WORLDS})")
}

fn memories() -> String {
    format!(
        "SELECT id FROM memories WHERE agent_id = $1 OR entity_id IN ({ENTITIES}) \
         OR room_id IN ({}) OR world_id IN ({WORLDS})",
        rooms()
    )
}

/// `(table, WHERE clause)` in deletion order.
fn steps() -> Vec<(&'static str, String)> {
    let rooms = rooms();
    vec![
        (
            "tasks",
            format!(
                "agent_id = $1 OR room_id IN ({rooms}) OR world_id IN ({WORLDS}) \
                 OR entity_id IN ({ENTITIES})"
            ),
        ),
        ("cache", "agent_id = $1".to_string()),
        (
            "logs",
            format!("entity_id IN ({ENTITIES}) OR room_id IN ({rooms})"),
        ),
        (
            "components",
            format!(
                "agent_id = $1 OR entity_id IN ({ENTITIES}) OR source_entity_id IN ({ENTITIES}) \
                 OR room_id IN ({rooms}) OR world_id IN ({WORLDS})"
            ),
        ),
        (
            "relationships",
            format!(
                "agent_id = $1 OR source_entity_id IN ({ENTITIES}) OR target_entity_id IN ({ENTITIES})"
            ),
        ),
        ("embeddings", format!("memory_id IN ({})", memories())),
        ("memories", format!("id IN ({})", memories())),
        (
            "participants",
            format!("agent_id = $1 OR entity_id IN ({ENTITIES}) OR room_id IN ({rooms})"),
        ),
        ("rooms", format!("id IN ({rooms})")),
        ("worlds", "agent_id = $1".to_string()),
        ("entities", "agent_id = $1".to_string()),
        ("agents", "id = $1".to_string()),
    ]
}

/// Delete agent `id` and everything it owns, all or nothing.
pub async fn delete_agent(db: &dyn ConnectionManager, id: Uuid) -> StoreResult<DeleteOutcome> {
    let params = [SqlParam::from(id)];
    let mut tx = db.begin().await?;
    let exists = tx
        .fetch_optional("SELECT id FROM agents WHERE id = $1", &params)
        .await?;
    if exists.is_none() {
        debug!(agent_id = %id, "delete_agent: no such agent");
        tx.commit().await?;
        return Ok(DeleteOutcome::NotFound);
    }

    let mut report = CascadeReport::default();
    for (table, filter) in steps() {
        let removed = tx
            .execute(&format!("DELETE FROM {table} WHERE {filter}"), &params)
            .await?;
        debug!(agent_id = %id, table, removed, "cascade step");
        report.removed.push((table.to_string(), removed));
    }
    tx.commit().await?;
    info!(agent_id = %id, rows = report.total(), "Agent deleted");
    Ok(DeleteOutcome::Deleted(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{migrated_db, seed, Owners};
    use crate::stores::{
        AgentStore, CacheStore, ComponentStore, EntityStore, LogStore, MemoryStore,
        RelationshipStore, TaskStore, WorldStore,
    };
    use mnemos_types::entity::{Component, Relationship};
    use mnemos_types::memory::{Memory, MemoryContent};
    use mnemos_types::task::{LogEntry, Task};
    use serde_json::json;
    use std::sync::Arc;

    async fn populate(db: &Arc<dyn ConnectionManager>, owners: &Owners) {
        let memories = MemoryStore::new(db.clone());
        memories.ensure_embedding_dimension(384).await.unwrap();
        let memory = Memory::new(
            owners.agent.id,
            owners.entity.id,
            owners.room.id,
            MemoryContent::text("remember me"),
        )
        .with_embedding(vec![0.5; 384]);
        assert!(memories.create_memory(&memory, "messages").await.unwrap().is_some());

        WorldStore::new(db.clone())
            .add_participants(&[owners.entity.id], owners.room.id)
            .await
            .unwrap();
        let mut component = Component::new(owners.agent.id, owners.entity.id, "profile", json!({}));
        component.world_id = Some(owners.world.id);
        assert!(ComponentStore::new(db.clone())
            .create_component(&component)
            .await
            .unwrap());
        let mut task = Task::new(owners.agent.id, "digest");
        task.room_id = Some(owners.room.id);
        TaskStore::new(db.clone()).create_task(&task).await.unwrap();
        CacheStore::new(db.clone())
            .set_cache(owners.agent.id, "k", &json!(1))
            .await
            .unwrap();
        assert!(LogStore::new(db.clone())
            .log(&LogEntry::new(owners.entity.id, Some(owners.room.id), "action", json!({})))
            .await
            .unwrap());
    }

    async fn count(db: &Arc<dyn ConnectionManager>, table: &str) -> i64 {
        let mut session = db.acquire().await.unwrap();
        let row = session
            .fetch_optional(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
            .await
            .unwrap()
            .unwrap();
        row.i64("n").unwrap()
    }

    #[tokio::test]
    async fn test_cascade_removes_whole_closure_only() {
        let db = migrated_db().await;
        let doomed = seed(&db, "doomed").await;
        let kept = seed(&db, "kept").await;
        populate(&db, &doomed).await;
        populate(&db, &kept).await;

        // Cross-agent references into the doomed closure.
        WorldStore::new(db.clone())
            .add_participants(&[kept.entity.id], doomed.room.id)
            .await
            .unwrap();
        assert!(RelationshipStore::new(db.clone())
            .create_relationship(&Relationship::new(kept.agent.id, kept.entity.id, doomed.entity.id))
            .await
            .unwrap());

        let before: Vec<i64> = {
            let mut counts = Vec::new();
            for (table, _) in steps() {
                counts.push(count(&db, table).await);
            }
            counts
        };

        let outcome = delete_agent(db.as_ref(), doomed.agent.id).await.unwrap();
        let DeleteOutcome::Deleted(report) = outcome else {
            panic!("expected deletion");
        };
        assert_eq!(report.rows_for("agents"), 1);
        assert_eq!(report.rows_for("memories"), 1);
        assert_eq!(report.rows_for("embeddings"), 1);
        assert_eq!(report.rows_for("participants"), 2);
        assert_eq!(report.rows_for("relationships"), 1);

        for ((table, _), before) in steps().into_iter().zip(before) {
            let removed = report.rows_for(table) as i64;
            assert_eq!(count(&db, table).await, before - removed, "{table}");
        }

        // The surviving agent keeps every record of its own.
        let agents = AgentStore::new(db.clone());
        assert!(agents.get_agent(doomed.agent.id).await.unwrap().is_none());
        assert!(agents.get_agent(kept.agent.id).await.unwrap().is_some());
        assert!(EntityStore::new(db.clone())
            .get_entity_by_id(kept.entity.id)
            .await
            .unwrap()
            .is_some());
        let worlds = WorldStore::new(db.clone());
        assert_eq!(
            worlds.get_rooms_for_participant(kept.entity.id).await.unwrap(),
            vec![kept.room.id]
        );
        assert_eq!(
            MemoryStore::new(db.clone())
                .count_memories(kept.room.id, false, None)
                .await
                .unwrap(),
            1
        );
        assert_eq!(count(&db, "tasks").await, 1);
        assert_eq!(count(&db, "cache").await, 1);
        assert_eq!(count(&db, "logs").await, 1);
        assert_eq!(count(&db, "components").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let db = migrated_db().await;
        let owners = seed(&db, "only").await;
        assert_eq!(
            delete_agent(db.as_ref(), Uuid::new_v4()).await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert!(delete_agent(db.as_ref(), owners.agent.id)
            .await
            .unwrap()
            .is_deleted());
        assert_eq!(
            delete_agent(db.as_ref(), owners.agent.id).await.unwrap(),
            DeleteOutcome::NotFound
        );
    }
}
