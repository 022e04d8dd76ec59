//! Networked backend: a sqlx connection pool against Postgres + pgvector.

use super::retry::retry_transient;
use super::{BackendKind, ConnectionManager, Row, Session, SqlParam, SqlType, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use mnemos_types::config::{RetryPolicy, StorageConfig};
use mnemos_types::error::{StoreError, StoreResult};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo, ValueRef};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection manager for Postgres.
pub struct PostgresManager {
    pool: PgPool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PostgresManager {
    /// Build the pool and verify the server is reachable.
    pub async fn connect(url: &str, config: &StorageConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.pool.max_connections,
            "Connecting to PostgreSQL"
        );
        let options = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.pool.idle_timeout_secs));

        let pool = retry_transient(&config.retry, || {
            let options = options.clone();
            async move { options.connect(url).await.map_err(classify) }
        })
        .await?;

        info!("Connected to PostgreSQL");
        Ok(Self {
            pool,
            timeout: Duration::from_millis(config.operation_timeout_ms),
            retry: config.retry.clone(),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn open_session(&self, transactional: bool) -> StoreResult<Box<dyn Session>> {
        let handle = if transactional {
            PgHandle::Tx(with_deadline(self.timeout, self.pool.begin()).await?)
        } else {
            PgHandle::Conn(with_deadline(self.timeout, self.pool.acquire()).await?)
        };
        Ok(Box::new(PgSession {
            handle,
            timeout: self.timeout,
        }))
    }
}

#[async_trait]
impl ConnectionManager for PostgresManager {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn acquire(&self) -> StoreResult<Box<dyn Session>> {
        retry_transient(&self.retry, || self.open_session(false)).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn Session>> {
        retry_transient(&self.retry, || self.open_session(true)).await
    }

    async fn health_check(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        match self.acquire().await {
            Ok(mut session) => session.fetch_all("SELECT 1 AS ok", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("PostgreSQL pool closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

enum PgHandle {
    Conn(PoolConnection<Postgres>),
    Tx(Transaction<'static, Postgres>),
}

/// A pooled connection, optionally inside a transaction. Dropping an
/// uncommitted transaction rolls it back before the connection is reused.
pub struct PgSession {
    handle: PgHandle,
    timeout: Duration,
}

impl PgSession {
    fn conn(&mut self) -> &mut PgConnection {
        match &mut self.handle {
            PgHandle::Conn(c) => &mut **c,
            PgHandle::Tx(t) => &mut **t,
        }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64> {
        let timeout = self.timeout;
        let query = bind_all(sqlx::query(sql), params);
        let result = with_deadline(timeout, query.execute(self.conn())).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<Vec<Row>> {
        let timeout = self.timeout;
        let query = bind_all(sqlx::query(sql), params);
        let rows = with_deadline(timeout, query.fetch_all(self.conn())).await?;
        let columns: Arc<[String]> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
                .into(),
            None => return Ok(Vec::new()),
        };
        rows.iter().map(|r| decode_row(r, &columns)).collect()
    }

    async fn execute_script(&mut self, sql: &str) -> StoreResult<()> {
        let timeout = self.timeout;
        // A bare `&str` runs through the simple query protocol, so one call
        // may carry several statements.
        with_deadline(timeout, sqlx::Executor::execute(self.conn(), sql)).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let timeout = self.timeout;
        match self.handle {
            PgHandle::Tx(tx) => with_deadline(timeout, tx.commit()).await,
            PgHandle::Conn(_) => Ok(()),
        }
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Null(ty) => match ty {
                SqlType::Bool => query.bind(None::<bool>),
                SqlType::Int => query.bind(None::<i64>),
                SqlType::Real => query.bind(None::<f64>),
                SqlType::Text | SqlType::Vector => query.bind(None::<String>),
                SqlType::Uuid => query.bind(None::<Uuid>),
                SqlType::Json => query.bind(None::<serde_json::Value>),
                SqlType::Timestamp => query.bind(None::<DateTime<Utc>>),
                SqlType::TextArray => query.bind(None::<Vec<String>>),
            },
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Uuid(u) => query.bind(*u),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Timestamp(t) => query.bind(*t),
            SqlParam::TextArray(v) => query.bind(v.clone()),
            // pgvector parses its text form; the SQL casts the parameter.
            SqlParam::Vector(v) => query.bind(vector_literal(v)),
        };
    }
    query
}

/// pgvector text form: `[1,2.5,3]`.
pub(crate) fn vector_literal(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn decode_row(row: &PgRow, columns: &Arc<[String]>) -> StoreResult<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(i).map_err(classify)?.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let value = match column.type_info().name() {
            "BOOL" => SqlValue::Bool(row.try_get(i).map_err(classify)?),
            "INT2" => SqlValue::Int(i64::from(row.try_get::<i16, _>(i).map_err(classify)?)),
            "INT4" => SqlValue::Int(i64::from(row.try_get::<i32, _>(i).map_err(classify)?)),
            "INT8" => SqlValue::Int(row.try_get(i).map_err(classify)?),
            "FLOAT4" => SqlValue::Real(f64::from(row.try_get::<f32, _>(i).map_err(classify)?)),
            "FLOAT8" => SqlValue::Real(row.try_get(i).map_err(classify)?),
            "UUID" => SqlValue::Uuid(row.try_get(i).map_err(classify)?),
            "JSON" | "JSONB" => SqlValue::Json(row.try_get(i).map_err(classify)?),
            "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get(i).map_err(classify)?),
            "TIMESTAMP" => SqlValue::Timestamp(
                row.try_get::<NaiveDateTime, _>(i)
                    .map_err(classify)?
                    .and_utc(),
            ),
            "TEXT[]" | "VARCHAR[]" => SqlValue::TextArray(row.try_get(i).map_err(classify)?),
            _ => SqlValue::Text(row.try_get(i).map_err(classify)?),
        };
        values.push(value);
    }
    Ok(Row::new(columns.clone(), values))
}

async fn with_deadline<F, T>(timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(classify),
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "statement deadline exceeded");
            Err(StoreError::Timeout(timeout.as_millis() as u64))
        }
    }
}

/// Map a sqlx error onto the storage error taxonomy.
pub(crate) fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("23") {
                StoreError::Conflict(db.message().to_string())
            } else if code.starts_with("08") || code == "53300" || code == "57P01" {
                StoreError::Transient(db.message().to_string())
            } else {
                StoreError::Database(format!("{} ({code})", db.message()))
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(err.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        _ => StoreError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!classify(sqlx::Error::PoolClosed).is_transient());
    }
}
