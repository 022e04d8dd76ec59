//! Embedded backend: a single SQLite connection behind an async mutex.

use super::retry::retry_transient;
use super::{BackendKind, ConnectionManager, Row, Session, SqlParam, SqlValue};
use async_trait::async_trait;
use mnemos_types::config::{RetryPolicy, StorageConfig, EMBEDDED_DB_FILE};
use mnemos_types::error::{StoreError, StoreResult};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Connection manager for the embedded engine.
///
/// The engine is single-writer, so the "pool" is one connection; sessions
/// hold the mutex for their whole lifetime, which serializes transactions.
pub struct SqliteManager {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
    timeout: Duration,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl SqliteManager {
    /// Open (or create) the database file inside `data_dir`.
    pub fn open(data_dir: &Path, config: &StorageConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(EMBEDDED_DB_FILE);
        let conn = Connection::open(&path).map_err(classify)?;
        let timeout = Duration::from_millis(config.operation_timeout_ms);
        configure(&conn, timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(classify)?;
        info!(path = %path.display(), "Opened embedded database");
        Ok(Self::from_connection(conn, Some(path), config))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(config: &StorageConfig) -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        configure(&conn, Duration::from_millis(config.operation_timeout_ms))?;
        debug!("Opened in-memory embedded database");
        Ok(Self::from_connection(conn, None, config))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
            timeout: Duration::from_millis(config.operation_timeout_ms),
            retry: config.retry.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Path of the database file; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn lock(&self) -> StoreResult<OwnedMutexGuard<Option<Connection>>> {
        let guard = tokio::time::timeout(self.timeout, self.conn.clone().lock_owned())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout.as_millis() as u64))?;
        if guard.is_none() {
            return Err(StoreError::Database("embedded database is closed".into()));
        }
        Ok(guard)
    }

    async fn open_session(&self, transactional: bool) -> StoreResult<Box<dyn Session>> {
        let guard = self.lock().await?;
        let mut session = SqliteSession {
            guard,
            in_tx: false,
            timeout: self.timeout,
        };
        if transactional {
            session.connection()?.execute_batch("BEGIN IMMEDIATE").map_err(classify)?;
            session.in_tx = true;
        }
        Ok(Box::new(session))
    }
}

fn configure(conn: &Connection, timeout: Duration) -> StoreResult<()> {
    conn.busy_timeout(timeout).map_err(classify)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(classify)?;
    Ok(())
}

#[async_trait]
impl ConnectionManager for SqliteManager {
    fn backend(&self) -> BackendKind {
        BackendKind::Embedded
    }

    async fn acquire(&self) -> StoreResult<Box<dyn Session>> {
        retry_transient(&self.retry, || self.open_session(false)).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn Session>> {
        retry_transient(&self.retry, || self.open_session(true)).await
    }

    async fn health_check(&self) -> bool {
        match self.acquire().await {
            Ok(mut session) => session.fetch_all("SELECT 1 AS ok", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Error closing embedded database: {e}");
            }
        }
        info!("Embedded database closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A session holding the embedded connection.
pub struct SqliteSession {
    guard: OwnedMutexGuard<Option<Connection>>,
    in_tx: bool,
    timeout: Duration,
}

impl SqliteSession {
    fn connection(&self) -> StoreResult<&Connection> {
        self.guard
            .as_ref()
            .ok_or_else(|| StoreError::Database("embedded database is closed".into()))
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.in_tx {
            if let Some(conn) = self.guard.as_ref() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!("Rollback failed: {e}");
                } else {
                    debug!("Rolled back uncommitted transaction");
                }
            }
        }
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64> {
        let sql = rewrite_placeholders(sql);
        let values: Vec<Value> = params.iter().map(to_value).collect::<StoreResult<_>>()?;
        let changed = with_deadline(self.connection()?, self.timeout, |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(values.iter()))
        })?;
        Ok(changed as u64)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<Vec<Row>> {
        let sql = rewrite_placeholders(sql);
        let values: Vec<Value> = params.iter().map(to_value).collect::<StoreResult<_>>()?;
        with_deadline(self.connection()?, self.timeout, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
                .into();
            let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut decoded = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    decoded.push(match row.get_ref(i)? {
                        ValueRef::Null => SqlValue::Null,
                        ValueRef::Integer(v) => SqlValue::Int(v),
                        ValueRef::Real(v) => SqlValue::Real(v),
                        ValueRef::Text(t) | ValueRef::Blob(t) => {
                            SqlValue::Text(String::from_utf8_lossy(t).into_owned())
                        }
                    });
                }
                out.push(Row::new(columns.clone(), decoded));
            }
            Ok(out)
        })
    }

    async fn execute_script(&mut self, sql: &str) -> StoreResult<()> {
        with_deadline(self.connection()?, self.timeout, |conn| conn.execute_batch(sql))
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if self.in_tx {
            self.connection()?.execute_batch("COMMIT").map_err(classify)?;
            self.in_tx = false;
        }
        Ok(())
    }
}

/// VM instructions between deadline checks.
const DEADLINE_CHECK_STEPS: i32 = 1_000;

/// Run `op` on `conn`, letting the engine interrupt it once `timeout` has
/// elapsed. An interrupted statement is undone and reported as `Timeout`.
fn with_deadline<T>(
    conn: &Connection,
    timeout: Duration,
    op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> StoreResult<T> {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(DEADLINE_CHECK_STEPS, Some(move || Instant::now() >= deadline));
    let result = op(conn);
    conn.progress_handler(DEADLINE_CHECK_STEPS, None::<fn() -> bool>);
    result.map_err(|e| match e.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "statement deadline exceeded");
            StoreError::Timeout(timeout.as_millis() as u64)
        }
        _ => classify(e),
    })
}

/// Rewrite `$N` placeholders into SQLite's `?N`.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            out.push('?');
        } else {
            out.push(c);
        }
    }
    out
}

/// Physical representation of a parameter: UUIDs as text, JSON and arrays
/// as JSON text, timestamps as epoch milliseconds, booleans as 0/1.
fn to_value(param: &SqlParam) -> StoreResult<Value> {
    Ok(match param {
        SqlParam::Null(_) => Value::Null,
        SqlParam::Bool(b) => Value::Integer(i64::from(*b)),
        SqlParam::Int(i) => Value::Integer(*i),
        SqlParam::Real(f) => Value::Real(*f),
        SqlParam::Text(s) => Value::Text(s.clone()),
        SqlParam::Uuid(u) => Value::Text(u.to_string()),
        SqlParam::Json(v) => Value::Text(serde_json::to_string(v)?),
        SqlParam::Timestamp(t) => Value::Integer(t.timestamp_millis()),
        SqlParam::TextArray(v) => Value::Text(serde_json::to_string(v)?),
        SqlParam::Vector(v) => Value::Text(serde_json::to_string(v)?),
    })
}

/// Map a rusqlite error onto the storage error taxonomy.
pub(crate) fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict(err.to_string()),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}
