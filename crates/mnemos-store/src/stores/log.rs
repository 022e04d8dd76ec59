//! Append-only audit log.

use super::{require_text, RejectConflict};
use crate::connection::{ConnectionManager, Row, SqlParam};
use crate::sql_params;
use mnemos_types::error::StoreResult;
use mnemos_types::task::{LogEntry, LogQuery};
use std::sync::Arc;
use uuid::Uuid;

const LOG_COLUMNS: &str = "id, entity_id, room_id, type, body, created_at";

#[derive(Clone)]
pub struct LogStore {
    db: Arc<dyn ConnectionManager>,
}

impl LogStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    /// Append a record. Returns `false` when the id is taken or the entity
    /// or room is unknown.
    pub async fn log(&self, entry: &LogEntry) -> StoreResult<bool> {
        require_text("log type", &entry.log_type)?;
        let mut session = self.db.acquire().await?;
        let created = session
            .execute(
                &format!("INSERT INTO logs ({LOG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"),
                &sql_params![
                    entry.id,
                    entry.entity_id,
                    entry.room_id,
                    entry.log_type.as_str(),
                    &entry.body,
                    entry.created_at,
                ],
            )
            .await
            .rejected_on_conflict("log")?;
        Ok(created.is_some())
    }

    /// Records matching every set filter, newest first.
    pub async fn get_logs(&self, query: &LogQuery) -> StoreResult<Vec<LogEntry>> {
        let mut sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE 1 = 1");
        let mut params: Vec<SqlParam> = Vec::new();
        if let Some(entity_id) = query.entity_id {
            params.push(entity_id.into());
            sql.push_str(&format!(" AND entity_id = ${}", params.len()));
        }
        if let Some(room_id) = query.room_id {
            params.push(room_id.into());
            sql.push_str(&format!(" AND room_id = ${}", params.len()));
        }
        if let Some(log_type) = &query.log_type {
            params.push(log_type.into());
            sql.push_str(&format!(" AND type = ${}", params.len()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        match (query.count, query.offset) {
            (Some(count), Some(offset)) => sql.push_str(&format!(" LIMIT {count} OFFSET {offset}")),
            (Some(count), None) => sql.push_str(&format!(" LIMIT {count}")),
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {offset}", i64::MAX)),
            (None, None) => {}
        }

        let mut session = self.db.acquire().await?;
        let rows = session.fetch_all(&sql, &params).await?;
        rows.iter().map(log_from_row).collect()
    }

    /// Idempotent.
    pub async fn delete_log(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute("DELETE FROM logs WHERE id = $1", &sql_params![id])
            .await?;
        Ok(())
    }
}

fn log_from_row(row: &Row) -> StoreResult<LogEntry> {
    Ok(LogEntry {
        id: row.uuid("id")?,
        entity_id: row.uuid("entity_id")?,
        room_id: row.opt_uuid("room_id")?,
        log_type: row.text("type")?,
        body: row.json("body")?,
        created_at: row.timestamp("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{migrated_db, seed, Owners};
    use chrono::{Duration, Utc};
    use serde_json::json;

    async fn setup() -> (LogStore, Owners) {
        let db = migrated_db().await;
        let owners = seed(&db, "logs").await;
        (LogStore::new(db), owners)
    }

    #[tokio::test]
    async fn test_filtered_reads_newest_first() {
        let (store, owners) = setup().await;
        let now = Utc::now();
        for i in 0..5 {
            let kind = if i % 2 == 0 { "action" } else { "evaluator" };
            let mut entry = LogEntry::new(owners.entity.id, Some(owners.room.id), kind, json!({"n": i}));
            entry.created_at = now + Duration::seconds(i);
            assert!(store.log(&entry).await.unwrap());
        }

        let all = store
            .get_logs(&LogQuery {
                room_id: Some(owners.room.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let order: Vec<i64> = all.iter().map(|l| l.body["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![4, 3, 2, 1, 0]);

        let actions = store
            .get_logs(&LogQuery {
                entity_id: Some(owners.entity.id),
                log_type: Some("action".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(actions.len(), 3);

        let page = store
            .get_logs(&LogQuery {
                room_id: Some(owners.room.id),
                count: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        let order: Vec<i64> = page.iter().map(|l| l.body["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 2]);

        let tail = store
            .get_logs(&LogQuery {
                offset: Some(4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, owners) = setup().await;
        let entry = LogEntry::new(owners.entity.id, None, "action", json!({}));
        store.log(&entry).await.unwrap();
        store.delete_log(entry.id).await.unwrap();
        store.delete_log(entry.id).await.unwrap();
        store.delete_log(Uuid::new_v4()).await.unwrap();
        assert!(store.get_logs(&LogQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entity_is_rejected() {
        let (store, _) = setup().await;
        let entry = LogEntry::new(Uuid::new_v4(), None, "action", json!({}));
        assert!(!store.log(&entry).await.unwrap());
    }
}
