//! Connection managers and the row/parameter model both backends share.
//!
//! Stores talk to a [`ConnectionManager`] through [`Session`]s. SQL is
//! written once with `$N` placeholders; the embedded backend rewrites them.
//! Parameters are typed so a NULL still carries its column type, and rows
//! come back as [`Row`]s whose accessors normalize the physical
//! representation (native UUID vs. text, JSONB vs. JSON text, TIMESTAMPTZ
//! vs. epoch milliseconds) into the logical value.

pub mod postgres;
pub mod retry;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mnemos_types::config::{BackendSelection, StorageConfig};
use mnemos_types::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The two physical backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Networked Postgres with the pgvector extension.
    Postgres,
    /// Embedded single-process SQLite.
    Embedded,
}

impl BackendKind {
    /// Short name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Embedded => "embedded",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical type of a bound parameter, kept for typed NULLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bool,
    Int,
    Real,
    Text,
    Uuid,
    Json,
    Timestamp,
    TextArray,
    Vector,
}

/// A value bound to a `$N` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null(SqlType),
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
    Vector(Vec<f32>),
}

impl SqlParam {
    /// A JSON parameter from any serializable value.
    pub fn json<T: serde::Serialize>(value: &T) -> StoreResult<Self> {
        Ok(SqlParam::Json(serde_json::to_value(value)?))
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Real(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<&String> for SqlParam {
    fn from(v: &String) -> Self {
        SqlParam::Text(v.clone())
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<Option<String>> for SqlParam {
    fn from(v: Option<String>) -> Self {
        v.map_or(SqlParam::Null(SqlType::Text), SqlParam::Text)
    }
}

impl From<Option<&str>> for SqlParam {
    fn from(v: Option<&str>) -> Self {
        v.map_or(SqlParam::Null(SqlType::Text), |s| SqlParam::Text(s.to_string()))
    }
}

impl From<Uuid> for SqlParam {
    fn from(v: Uuid) -> Self {
        SqlParam::Uuid(v)
    }
}

impl From<Option<Uuid>> for SqlParam {
    fn from(v: Option<Uuid>) -> Self {
        v.map_or(SqlParam::Null(SqlType::Uuid), SqlParam::Uuid)
    }
}

impl From<serde_json::Value> for SqlParam {
    fn from(v: serde_json::Value) -> Self {
        SqlParam::Json(v)
    }
}

impl From<&serde_json::Value> for SqlParam {
    fn from(v: &serde_json::Value) -> Self {
        SqlParam::Json(v.clone())
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(v)
    }
}

impl From<Option<DateTime<Utc>>> for SqlParam {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        v.map_or(SqlParam::Null(SqlType::Timestamp), SqlParam::Timestamp)
    }
}

impl From<Vec<String>> for SqlParam {
    fn from(v: Vec<String>) -> Self {
        SqlParam::TextArray(v)
    }
}

impl From<&[String]> for SqlParam {
    fn from(v: &[String]) -> Self {
        SqlParam::TextArray(v.to_vec())
    }
}

impl From<&Vec<String>> for SqlParam {
    fn from(v: &Vec<String>) -> Self {
        SqlParam::TextArray(v.clone())
    }
}

impl From<&[f32]> for SqlParam {
    fn from(v: &[f32]) -> Self {
        SqlParam::Vector(v.to_vec())
    }
}

/// Build a `Vec<SqlParam>` from heterogeneous values.
#[macro_export]
macro_rules! sql_params {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::connection::SqlParam::from($value)),*]
    };
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
}

/// One result row with named columns.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

fn decode_error(column: &str, expected: &str, got: &SqlValue) -> StoreError {
    StoreError::Database(format!(
        "column '{column}': expected {expected}, got {got:?}"
    ))
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> StoreResult<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| StoreError::Database(format!("result has no column '{column}'")))
    }

    pub fn is_null(&self, column: &str) -> StoreResult<bool> {
        Ok(matches!(self.value(column)?, SqlValue::Null))
    }

    pub fn uuid(&self, column: &str) -> StoreResult<Uuid> {
        self.opt_uuid(column)?
            .ok_or_else(|| StoreError::Database(format!("column '{column}' is NULL")))
    }

    pub fn opt_uuid(&self, column: &str) -> StoreResult<Option<Uuid>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Uuid(u) => Ok(Some(*u)),
            SqlValue::Text(s) => Uuid::parse_str(s)
                .map(Some)
                .map_err(|e| StoreError::Database(format!("column '{column}': {e}"))),
            other => Err(decode_error(column, "uuid", other)),
        }
    }

    pub fn text(&self, column: &str) -> StoreResult<String> {
        self.opt_text(column)?
            .ok_or_else(|| StoreError::Database(format!("column '{column}' is NULL")))
    }

    pub fn opt_text(&self, column: &str) -> StoreResult<Option<String>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Uuid(u) => Ok(Some(u.to_string())),
            other => Err(decode_error(column, "text", other)),
        }
    }

    pub fn bool(&self, column: &str) -> StoreResult<bool> {
        match self.value(column)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(i) => Ok(*i != 0),
            other => Err(decode_error(column, "boolean", other)),
        }
    }

    pub fn i64(&self, column: &str) -> StoreResult<i64> {
        match self.value(column)? {
            SqlValue::Int(i) => Ok(*i),
            SqlValue::Real(f) => Ok(*f as i64),
            other => Err(decode_error(column, "integer", other)),
        }
    }

    /// JSON column; NULL reads as `Value::Null`.
    pub fn json(&self, column: &str) -> StoreResult<serde_json::Value> {
        match self.value(column)? {
            SqlValue::Null => Ok(serde_json::Value::Null),
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(s) => Ok(serde_json::from_str(s)?),
            other => Err(decode_error(column, "json", other)),
        }
    }

    /// JSON column deserialized into `T`.
    pub fn json_as<T: DeserializeOwned>(&self, column: &str) -> StoreResult<T> {
        Ok(serde_json::from_value(self.json(column)?)?)
    }

    pub fn timestamp(&self, column: &str) -> StoreResult<DateTime<Utc>> {
        self.opt_timestamp(column)?
            .ok_or_else(|| StoreError::Database(format!("column '{column}' is NULL")))
    }

    pub fn opt_timestamp(&self, column: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(t) => Ok(Some(*t)),
            SqlValue::Int(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .map(Some)
                .ok_or_else(|| StoreError::Database(format!("column '{column}': bad epoch {ms}"))),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| StoreError::Database(format!("column '{column}': {e}"))),
            other => Err(decode_error(column, "timestamp", other)),
        }
    }

    /// Text-array column; NULL reads as empty.
    pub fn text_array(&self, column: &str) -> StoreResult<Vec<String>> {
        match self.value(column)? {
            SqlValue::Null => Ok(Vec::new()),
            SqlValue::TextArray(v) => Ok(v.clone()),
            SqlValue::Text(s) => Ok(serde_json::from_str(s)?),
            SqlValue::Json(v) => Ok(serde_json::from_value(v.clone())?),
            other => Err(decode_error(column, "text array", other)),
        }
    }

    /// Vector column in its text form (`[1,2,3]`); NULL reads as `None`.
    pub fn vector(&self, column: &str) -> StoreResult<Option<Vec<f32>>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(serde_json::from_str(s)?)),
            SqlValue::Json(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            other => Err(decode_error(column, "vector", other)),
        }
    }
}

/// `$start, $start+1, ...` for an `IN (...)` list of `count` values.
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A borrowed connection, optionally inside a transaction.
///
/// Dropping a transactional session without calling [`Session::commit`]
/// rolls it back.
#[async_trait]
pub trait Session: Send {
    /// Run one statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64>;

    /// Run a query and collect every row.
    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<Vec<Row>>;

    /// Run a query and return its first row, if any.
    async fn fetch_optional(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Run parameterless SQL that may contain several statements (DDL).
    async fn execute_script(&mut self, sql: &str) -> StoreResult<()>;

    /// Commit the transaction; a no-op outside a transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Owns the pool (or handle) of one backend.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Borrow a connection in autocommit mode.
    async fn acquire(&self) -> StoreResult<Box<dyn Session>>;

    /// Borrow a connection and open a transaction on it.
    async fn begin(&self) -> StoreResult<Box<dyn Session>>;

    /// Whether a trivial round-trip succeeds.
    async fn health_check(&self) -> bool;

    /// Release every connection. Later acquires fail.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Open the connection manager selected by `config`.
pub async fn connect(config: &StorageConfig) -> StoreResult<Arc<dyn ConnectionManager>> {
    match config.backend() {
        BackendSelection::Postgres { url } => {
            let manager = postgres::PostgresManager::connect(&url, config).await?;
            Ok(Arc::new(manager))
        }
        BackendSelection::Embedded { data_dir } => {
            let manager = sqlite::SqliteManager::open(&data_dir, config)?;
            Ok(Arc::new(manager))
        }
        BackendSelection::InMemory => {
            let manager = sqlite::SqliteManager::open_in_memory(config)?;
            Ok(Arc::new(manager))
        }
    }
}
