//! Directed, tagged edges between entities, unique per (source, target).

use super::RejectConflict;
use crate::connection::{ConnectionManager, Row};
use crate::sql_params;
use mnemos_types::entity::Relationship;
use mnemos_types::error::StoreResult;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const RELATIONSHIP_COLUMNS: &str =
    "id, source_entity_id, target_entity_id, agent_id, tags, metadata, created_at";

#[derive(Clone)]
pub struct RelationshipStore {
    db: Arc<dyn ConnectionManager>,
}

impl RelationshipStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Insert a relationship, or replace tags and metadata of the one already
    /// stored for the same (source, target) pair; the stored id and creation
    /// time are kept. Returns `false` for a self-loop or an unknown endpoint.
    pub async fn create_relationship(&self, relationship: &Relationship) -> StoreResult<bool> {
        let mut session = self.db.acquire().await?;
        let written = session
            .execute(
                &format!(
                    "INSERT INTO relationships ({RELATIONSHIP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT (source_entity_id, target_entity_id) \
                     DO UPDATE SET tags = excluded.tags, metadata = excluded.metadata"
                ),
                &sql_params![
                    relationship.id,
                    relationship.source_entity_id,
                    relationship.target_entity_id,
                    relationship.agent_id,
                    &relationship.tags,
                    &relationship.metadata,
                    relationship.created_at,
                ],
            )
            .await
            .rejected_on_conflict("create_relationship")?;
        Ok(written.is_some_and(|rows| rows > 0))
    }

    pub async fn get_relationship(
        &self,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
    ) -> StoreResult<Option<Relationship>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
                     WHERE source_entity_id = $1 AND target_entity_id = $2"
                ),
                &sql_params![source_entity_id, target_entity_id],
            )
            .await?;
        row.as_ref().map(relationship_from_row).transpose()
    }

    /// Relationships touching `entity_id` in either direction. A non-empty
    /// `tags` keeps only relationships sharing at least one tag.
    pub async fn get_relationships(
        &self,
        entity_id: Uuid,
        tags: &[String],
    ) -> StoreResult<Vec<Relationship>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
                     WHERE source_entity_id = $1 OR target_entity_id = $1 ORDER BY created_at"
                ),
                &sql_params![entity_id],
            )
            .await?;
        let mut relationships = rows
            .iter()
            .map(relationship_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        if !tags.is_empty() {
            relationships.retain(|r| r.has_any_tag(tags));
        }
        Ok(relationships)
    }

    /// Replace tags and metadata of the relationship for the record's
    /// (source, target) pair. An unknown pair is a no-op.
    pub async fn update_relationship(&self, relationship: &Relationship) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        let updated = session
            .execute(
                "UPDATE relationships SET tags = $3, metadata = $4 \
                 WHERE source_entity_id = $1 AND target_entity_id = $2",
                &sql_params![
                    relationship.source_entity_id,
                    relationship.target_entity_id,
                    &relationship.tags,
                    &relationship.metadata,
                ],
            )
            .await?;
        if updated == 0 {
            debug!(
                source = %relationship.source_entity_id,
                target = %relationship.target_entity_id,
                "update_relationship: no such pair"
            );
        }
        Ok(())
    }
}

fn relationship_from_row(row: &Row) -> StoreResult<Relationship> {
    Ok(Relationship {
        id: row.uuid("id")?,
        source_entity_id: row.uuid("source_entity_id")?,
        target_entity_id: row.uuid("target_entity_id")?,
        agent_id: row.uuid("agent_id")?,
        tags: row.text_array("tags")?,
        metadata: row.json("metadata")?,
        created_at: row.timestamp("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{migrated_db, seed};
    use crate::stores::EntityStore;
    use mnemos_types::entity::Entity;
    use serde_json::json;

    async fn two_entities() -> (RelationshipStore, Uuid, Uuid, Uuid) {
        let db = migrated_db().await;
        let owners = seed(&db, "rel").await;
        let other = Entity::new(owners.agent.id, vec!["other".into()]);
        EntityStore::new(db.clone())
            .create_entities(&[other.clone()])
            .await
            .unwrap();
        (
            RelationshipStore::new(db),
            owners.agent.id,
            owners.entity.id,
            other.id,
        )
    }

    #[tokio::test]
    async fn test_recreating_pair_updates_it() {
        let (store, agent, a, b) = two_entities().await;
        let first = Relationship::new(agent, a, b).with_tags(&["friend"]);
        assert!(store.create_relationship(&first).await.unwrap());

        let mut again = Relationship::new(agent, a, b).with_tags(&["enemy"]);
        again.metadata = json!({"since": "yesterday"});
        assert!(store.create_relationship(&again).await.unwrap());

        let stored = store.get_relationship(a, b).await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.tags, vec!["enemy"]);
        assert_eq!(stored.metadata, json!({"since": "yesterday"}));
        assert_eq!(store.get_relationships(a, &[]).await.unwrap().len(), 1);

        let reverse = Relationship::new(agent, b, a);
        assert!(store.create_relationship(&reverse).await.unwrap());
        assert_eq!(store.get_relationships(a, &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_self_loop_is_rejected() {
        let (store, agent, a, _) = two_entities().await;
        assert!(!store
            .create_relationship(&Relationship::new(agent, a, a).with_tags(&["me"]))
            .await
            .unwrap());
        assert!(store.get_relationship(a, a).await.unwrap().is_none());
        assert!(store.get_relationships(a, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_rejected() {
        let (store, agent, a, _) = two_entities().await;
        let ghost = Uuid::new_v4();
        assert!(!store
            .create_relationship(&Relationship::new(agent, a, ghost))
            .await
            .unwrap());
        assert!(store.get_relationship(a, ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_filter_is_intersection() {
        let (store, agent, a, b) = two_entities().await;
        store
            .create_relationship(&Relationship::new(agent, a, b).with_tags(&["friend", "colleague"]))
            .await
            .unwrap();
        store
            .create_relationship(&Relationship::new(agent, b, a).with_tags(&["rival"]))
            .await
            .unwrap();

        assert_eq!(store.get_relationships(a, &[]).await.unwrap().len(), 2);
        let friends = store
            .get_relationships(a, &["colleague".into(), "boss".into()])
            .await
            .unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].target_entity_id, b);
        assert!(store
            .get_relationships(a, &["stranger".into()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_by_pair() {
        let (store, agent, a, b) = two_entities().await;
        let rel = Relationship::new(agent, a, b).with_tags(&["friend"]);
        store.create_relationship(&rel).await.unwrap();

        let mut changed = rel.clone();
        changed.id = Uuid::new_v4();
        changed.tags = vec!["best-friend".into()];
        changed.metadata = json!({"since": 2020});
        store.update_relationship(&changed).await.unwrap();

        let fetched = store.get_relationship(a, b).await.unwrap().unwrap();
        assert_eq!(fetched.id, rel.id);
        assert_eq!(fetched.tags, vec!["best-friend"]);
        assert_eq!(fetched.metadata["since"], 2020);

        let ghost = Relationship::new(agent, b, a);
        store.update_relationship(&ghost).await.unwrap();
        assert!(store.get_relationship(b, a).await.unwrap().is_none());
    }
}
