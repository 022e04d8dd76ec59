//! Entities: addressable identities with one or more names.

use super::{string_list, RejectConflict};
use crate::connection::{placeholders, ConnectionManager, Row, SqlParam};
use crate::merge::merge_json;
use crate::sql_params;
use chrono::Utc;
use mnemos_types::entity::Entity;
use mnemos_types::error::{StoreError, StoreResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const ENTITY_COLUMNS: &str = "e.id, e.agent_id, e.names, e.metadata, e.created_at";

#[derive(Clone)]
pub struct EntityStore {
    db: Arc<dyn ConnectionManager>,
}

impl EntityStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Insert a batch of entities, all or nothing. Returns `false` when any
    /// id repeats inside the batch or already exists.
    pub async fn create_entities(&self, entities: &[Entity]) -> StoreResult<bool> {
        for entity in entities {
            validate_names(&entity.names)?;
        }
        let unique: HashSet<Uuid> = entities.iter().map(|e| e.id).collect();
        if unique.len() != entities.len() {
            debug!("create_entities: duplicate id inside batch");
            return Ok(false);
        }
        if entities.is_empty() {
            return Ok(true);
        }

        let mut tx = self.db.begin().await?;
        for entity in entities {
            let inserted = tx
                .execute(
                    "INSERT INTO entities (id, agent_id, names, metadata, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &sql_params![
                        entity.id,
                        entity.agent_id,
                        serde_json::to_value(&entity.names)?,
                        &entity.metadata,
                        entity.created_at,
                        entity.created_at,
                    ],
                )
                .await
                .rejected_on_conflict("create_entities")?;
            if inserted.is_none() {
                return Ok(false);
            }
        }
        tx.commit().await?;
        info!(count = entities.len(), "Entities created");
        Ok(true)
    }

    pub async fn get_entity_by_id(&self, id: Uuid) -> StoreResult<Option<Entity>> {
        Ok(self.get_entities_by_ids(&[id]).await?.into_iter().next())
    }

    /// Entities with the given ids; unknown ids are skipped.
    pub async fn get_entities_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<SqlParam> = ids.iter().map(|id| SqlParam::from(*id)).collect();
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id IN ({}) ORDER BY e.created_at",
                    placeholders(1, ids.len())
                ),
                &params,
            )
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    /// Entities of `agent_id` carrying any of `names` exactly as an alias.
    pub async fn get_entities_by_names(
        &self,
        names: &[String],
        agent_id: Uuid,
    ) -> StoreResult<Vec<Entity>> {
        Ok(self
            .agent_entities(agent_id)
            .await?
            .into_iter()
            .filter(|e| names.iter().any(|n| e.has_name(n)))
            .collect())
    }

    /// Case-insensitive substring search over every alias, bounded by
    /// `limit`. An empty query matches every entity of the agent.
    pub async fn search_entities_by_name(
        &self,
        query: &str,
        agent_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        Ok(self
            .agent_entities(agent_id)
            .await?
            .into_iter()
            .filter(|e| e.matches_query(query))
            .take(limit)
            .collect())
    }

    /// Entities participating in a room.
    pub async fn get_entities_for_room(&self, room_id: Uuid) -> StoreResult<Vec<Entity>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities e \
                     JOIN participants p ON p.entity_id = e.id \
                     WHERE p.room_id = $1 ORDER BY p.created_at"
                ),
                &sql_params![room_id],
            )
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    /// Replace names and metadata. An unknown id is a no-op.
    pub async fn update_entity(&self, entity: &Entity) -> StoreResult<()> {
        validate_names(&entity.names)?;
        let mut session = self.db.acquire().await?;
        let updated = session
            .execute(
                "UPDATE entities SET names = $2, metadata = $3, updated_at = $4 WHERE id = $1",
                &sql_params![
                    entity.id,
                    serde_json::to_value(&entity.names)?,
                    &entity.metadata,
                    Utc::now(),
                ],
            )
            .await?;
        if updated == 0 {
            debug!(entity_id = %entity.id, "update_entity: no such entity");
        }
        Ok(())
    }

    /// Merge `partial` into the stored metadata (null deletes a key).
    pub async fn merge_entity_metadata(&self, id: Uuid, partial: &serde_json::Value) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        let row = tx
            .fetch_optional("SELECT metadata FROM entities WHERE id = $1", &sql_params![id])
            .await?;
        let Some(row) = row else {
            debug!(entity_id = %id, "merge_entity_metadata: no such entity");
            return tx.commit().await;
        };
        let merged = merge_json(&row.json("metadata")?, partial);
        tx.execute(
            "UPDATE entities SET metadata = $2, updated_at = $3 WHERE id = $1",
            &sql_params![id, merged, Utc::now()],
        )
        .await?;
        tx.commit().await
    }

    /// Delete an entity and the records hanging off it. Idempotent.
    pub async fn delete_entity(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        let removed = session
            .execute("DELETE FROM entities WHERE id = $1", &sql_params![id])
            .await?;
        debug!(entity_id = %id, removed, "Entity deleted");
        Ok(())
    }

    async fn agent_entities(&self, agent_id: Uuid) -> StoreResult<Vec<Entity>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.agent_id = $1 ORDER BY e.created_at, e.id"
                ),
                &sql_params![agent_id],
            )
            .await?;
        rows.iter().map(entity_from_row).collect()
    }
}

fn validate_names(names: &[String]) -> StoreResult<()> {
    if names.is_empty() {
        return Err(StoreError::Validation("entity needs at least one name".into()));
    }
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(StoreError::Validation("entity names must not be empty".into()));
    }
    Ok(())
}

fn entity_from_row(row: &Row) -> StoreResult<Entity> {
    Ok(Entity {
        id: row.uuid("id")?,
        agent_id: row.uuid("agent_id")?,
        names: string_list(row.json("names")?)?,
        metadata: row.json("metadata")?,
        created_at: row.timestamp("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{migrated_db, seed};
    use crate::stores::WorldStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_by_id() {
        let db = migrated_db().await;
        let owners = seed(&db, "round").await;
        let store = EntityStore::new(db);

        let mut entity = Entity::new(owners.agent.id, vec!["Alice".into(), "al".into()]);
        entity.metadata = json!({"discord": {"id": "123"}});
        assert!(store.create_entities(&[entity.clone()]).await.unwrap());

        let fetched = store.get_entity_by_id(entity.id).await.unwrap().unwrap();
        assert_eq!(fetched.names, entity.names);
        assert_eq!(fetched.metadata, entity.metadata);
        assert_eq!(fetched.agent_id, owners.agent.id);

        let many = store
            .get_entities_by_ids(&[entity.id, owners.entity.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(store.get_entities_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let db = migrated_db().await;
        let owners = seed(&db, "batch").await;
        let store = EntityStore::new(db);

        let fresh = Entity::new(owners.agent.id, vec!["fresh".into()]);
        let clash = owners.entity.clone();
        assert!(!store.create_entities(&[fresh.clone(), clash]).await.unwrap());
        assert!(store.get_entity_by_id(fresh.id).await.unwrap().is_none());

        let twice = Entity::new(owners.agent.id, vec!["twice".into()]);
        assert!(!store
            .create_entities(&[twice.clone(), twice.clone()])
            .await
            .unwrap());
        assert!(store.get_entity_by_id(twice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_names_are_rejected_before_io() {
        let db = migrated_db().await;
        let store = EntityStore::new(db);
        let nameless = Entity::new(Uuid::new_v4(), vec![]);
        assert!(matches!(
            store.create_entities(&[nameless]).await,
            Err(StoreError::Validation(_))
        ));
        let blank = Entity::new(Uuid::new_v4(), vec!["ok".into(), "".into()]);
        assert!(matches!(
            store.create_entities(&[blank]).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dangling_agent_is_rejected() {
        let store = EntityStore::new(migrated_db().await);
        let orphan = Entity::new(Uuid::new_v4(), vec!["orphan".into()]);
        assert!(!store.create_entities(&[orphan]).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_bounded() {
        let db = migrated_db().await;
        let owners = seed(&db, "search").await;
        let store = EntityStore::new(db);

        let upper = Entity::new(owners.agent.id, vec!["UPPERCASE NAME".into()]);
        let other = Entity::new(owners.agent.id, vec!["someone".into(), "Upper Deck".into()]);
        store
            .create_entities(&[upper.clone(), other.clone()])
            .await
            .unwrap();

        let found = store
            .search_entities_by_name("uppercase", owners.agent.id, 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, upper.id);

        let both = store
            .search_entities_by_name("UPPER", owners.agent.id, 10)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        let bounded = store
            .search_entities_by_name("", owners.agent.id, 2)
            .await
            .unwrap();
        assert_eq!(bounded.len(), 2);
        let all = store
            .search_entities_by_name("", owners.agent.id, 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let elsewhere = store
            .search_entities_by_name("", Uuid::new_v4(), 100)
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_names_is_exact() {
        let db = migrated_db().await;
        let owners = seed(&db, "names").await;
        let store = EntityStore::new(db);
        let bob = Entity::new(owners.agent.id, vec!["Bob".into(), "bobby".into()]);
        store.create_entities(&[bob.clone()]).await.unwrap();

        let found = store
            .get_entities_by_names(&["bobby".into()], owners.agent.id)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store
            .get_entities_by_names(&["bob".into()], owners.agent.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_and_unknown_is_noop() {
        let db = migrated_db().await;
        let owners = seed(&db, "update").await;
        let store = EntityStore::new(db);

        let mut entity = owners.entity.clone();
        entity.names = vec!["renamed".into()];
        entity.metadata = json!({"fresh": true});
        store.update_entity(&entity).await.unwrap();
        let fetched = store.get_entity_by_id(entity.id).await.unwrap().unwrap();
        assert_eq!(fetched.names, vec!["renamed"]);
        assert_eq!(fetched.metadata, json!({"fresh": true}));

        let ghost = Entity::new(owners.agent.id, vec!["ghost".into()]);
        store.update_entity(&ghost).await.unwrap();
        assert!(store.get_entity_by_id(ghost.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_metadata() {
        let db = migrated_db().await;
        let owners = seed(&db, "merge").await;
        let store = EntityStore::new(db);
        let mut entity = Entity::new(owners.agent.id, vec!["m".into()]);
        entity.metadata = json!({"a": 1, "b": {"c": 2}});
        store.create_entities(&[entity.clone()]).await.unwrap();

        store
            .merge_entity_metadata(entity.id, &json!({"a": null, "b": {"d": 3}}))
            .await
            .unwrap();
        let fetched = store.get_entity_by_id(entity.id).await.unwrap().unwrap();
        assert_eq!(fetched.metadata, json!({"b": {"c": 2, "d": 3}}));
        store
            .merge_entity_metadata(Uuid::new_v4(), &json!({"a": 1}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let db = migrated_db().await;
        let owners = seed(&db, "delete").await;
        let store = EntityStore::new(db);
        store.delete_entity(owners.entity.id).await.unwrap();
        store.delete_entity(owners.entity.id).await.unwrap();
        assert!(store.get_entity_by_id(owners.entity.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entities_for_room() {
        let db = migrated_db().await;
        let owners = seed(&db, "room").await;
        let worlds = WorldStore::new(db.clone());
        worlds
            .add_participants(&[owners.entity.id], owners.room.id)
            .await
            .unwrap();
        let store = EntityStore::new(db);
        let members = store.get_entities_for_room(owners.room.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, owners.entity.id);
    }
}
