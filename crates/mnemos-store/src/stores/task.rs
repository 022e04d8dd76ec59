//! Deferred and scheduled work items.

use super::{require_text, RejectConflict};
use crate::connection::{ConnectionManager, Row, SqlParam};
use crate::merge::merge_json;
use crate::sql_params;
use chrono::Utc;
use mnemos_types::error::StoreResult;
use mnemos_types::task::{Task, TaskQuery, TaskUpdate};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, name, description, agent_id, room_id, world_id, entity_id, tags, \
     metadata, created_at, updated_at";

#[derive(Clone)]
pub struct TaskStore {
    db: Arc<dyn ConnectionManager>,
}

impl TaskStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Insert a task. Returns `None` when the id is taken or an owner
    /// reference is dangling.
    pub async fn create_task(&self, task: &Task) -> StoreResult<Option<Uuid>> {
        require_text("task name", &task.name)?;
        let mut session = self.db.acquire().await?;
        let created = session
            .execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"),
                &sql_params![
                    task.id,
                    task.name.as_str(),
                    task.description.as_deref(),
                    task.agent_id,
                    task.room_id,
                    task.world_id,
                    task.entity_id,
                    &task.tags,
                    &task.metadata,
                    task.created_at,
                    task.updated_at,
                ],
            )
            .await
            .rejected_on_conflict("create_task")?;
        Ok(created.map(|_| task.id))
    }

    pub async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"),
                &sql_params![id],
            )
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Tasks matching every set filter; a task must carry all requested tags.
    pub async fn get_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut params: Vec<SqlParam> = Vec::new();
        for (column, value) in [
            ("agent_id", query.agent_id),
            ("room_id", query.room_id),
            ("entity_id", query.entity_id),
        ] {
            if let Some(value) = value {
                params.push(SqlParam::from(value));
                sql.push_str(&format!(" AND {column} = ${}", params.len()));
            }
        }
        sql.push_str(" ORDER BY created_at");

        let mut session = self.db.acquire().await?;
        let rows = session.fetch_all(&sql, &params).await?;
        let mut tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        tasks.retain(|t| t.has_all_tags(&query.tags));
        Ok(tasks)
    }

    pub async fn get_tasks_by_name(&self, name: &str) -> StoreResult<Vec<Task>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE name = $1 ORDER BY created_at"),
                &sql_params![name],
            )
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Apply a partial update; metadata is merged, other present fields
    /// replace. An unknown id is a no-op.
    pub async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> StoreResult<()> {
        if let Some(name) = &update.name {
            require_text("task name", name)?;
        }
        let mut tx = self.db.begin().await?;
        let row = tx
            .fetch_optional(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"),
                &sql_params![id],
            )
            .await?;
        let Some(row) = row else {
            debug!(task_id = %id, "update_task: no such task");
            return tx.commit().await;
        };
        let mut task = task_from_row(&row)?;

        if let Some(name) = &update.name {
            task.name = name.clone();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        if let Some(room_id) = update.room_id {
            task.room_id = room_id;
        }
        if let Some(world_id) = update.world_id {
            task.world_id = world_id;
        }
        if let Some(entity_id) = update.entity_id {
            task.entity_id = entity_id;
        }
        if let Some(tags) = &update.tags {
            task.tags = tags.clone();
        }
        if let Some(partial) = &update.metadata {
            task.metadata = merge_json(&task.metadata, partial);
        }

        tx.execute(
            "UPDATE tasks SET name = $2, description = $3, room_id = $4, world_id = $5, \
             entity_id = $6, tags = $7, metadata = $8, updated_at = $9 WHERE id = $1",
            &sql_params![
                id,
                task.name.as_str(),
                task.description.as_deref(),
                task.room_id,
                task.world_id,
                task.entity_id,
                &task.tags,
                &task.metadata,
                Utc::now(),
            ],
        )
        .await?;
        tx.commit().await
    }

    /// Idempotent.
    pub async fn delete_task(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute("DELETE FROM tasks WHERE id = $1", &sql_params![id])
            .await?;
        Ok(())
    }
}

fn task_from_row(row: &Row) -> StoreResult<Task> {
    Ok(Task {
        id: row.uuid("id")?,
        agent_id: row.uuid("agent_id")?,
        name: row.text("name")?,
        description: row.opt_text("description")?,
        room_id: row.opt_uuid("room_id")?,
        world_id: row.opt_uuid("world_id")?,
        entity_id: row.opt_uuid("entity_id")?,
        tags: row.text_array("tags")?,
        metadata: row.json("metadata")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{migrated_db, seed, Owners};
    use serde_json::json;

    async fn setup() -> (TaskStore, Owners) {
        let db = migrated_db().await;
        let owners = seed(&db, "tasks").await;
        (TaskStore::new(db), owners)
    }

    fn tagged(owners: &Owners, name: &str, tags: &[&str]) -> Task {
        let mut task = Task::new(owners.agent.id, name);
        task.room_id = Some(owners.room.id);
        task.tags = tags.iter().map(|t| t.to_string()).collect();
        task
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (store, owners) = setup().await;
        let mut task = tagged(&owners, "follow-up", &["queue"]);
        task.description = Some("ping later".into());
        task.metadata = json!({"updateInterval": 60000});
        assert_eq!(store.create_task(&task).await.unwrap(), Some(task.id));
        assert_eq!(store.create_task(&task).await.unwrap(), None);

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.description.as_deref(), Some("ping later"));
        assert_eq!(fetched.tags, vec!["queue"]);
        assert_eq!(fetched.metadata["updateInterval"], 60000);

        store.delete_task(task.id).await.unwrap();
        store.delete_task(task.id).await.unwrap();
        assert!(store.get_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_filter_requires_every_tag() {
        let (store, owners) = setup().await;
        store
            .create_task(&tagged(&owners, "a", &["queue", "repeat"]))
            .await
            .unwrap();
        store
            .create_task(&tagged(&owners, "b", &["queue"]))
            .await
            .unwrap();
        store
            .create_task(&Task::new(owners.agent.id, "unscoped"))
            .await
            .unwrap();

        let in_room = TaskQuery {
            room_id: Some(owners.room.id),
            ..Default::default()
        };
        assert_eq!(store.get_tasks(&in_room).await.unwrap().len(), 2);

        let repeating = TaskQuery {
            room_id: Some(owners.room.id),
            tags: vec!["queue".into(), "repeat".into()],
            ..Default::default()
        };
        let found = store.get_tasks(&repeating).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");

        let by_agent = TaskQuery {
            agent_id: Some(owners.agent.id),
            ..Default::default()
        };
        assert_eq!(store.get_tasks(&by_agent).await.unwrap().len(), 3);
        assert_eq!(store.get_tasks_by_name("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_update_merges_metadata() {
        let (store, owners) = setup().await;
        let mut task = tagged(&owners, "digest", &["daily"]);
        task.description = Some("send digest".into());
        task.metadata = json!({"interval": 10, "options": {"a": 1, "b": 2}});
        store.create_task(&task).await.unwrap();

        let update = TaskUpdate {
            description: Some(None),
            room_id: Some(None),
            metadata: Some(json!({"options": {"a": null}, "lastRun": 5})),
            ..Default::default()
        };
        store.update_task(task.id, &update).await.unwrap();

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "digest");
        assert_eq!(fetched.description, None);
        assert_eq!(fetched.room_id, None);
        assert_eq!(fetched.tags, vec!["daily"]);
        assert_eq!(
            fetched.metadata,
            json!({"interval": 10, "lastRun": 5, "options": {"b": 2}})
        );

        store
            .update_task(Uuid::new_v4(), &TaskUpdate::default())
            .await
            .unwrap();
    }
}
