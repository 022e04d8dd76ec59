//! Turns logical table descriptions into DDL for one backend.
//!
//! Postgres gets native types (`UUID`, `JSONB`, `TIMESTAMPTZ`, `TEXT[]`,
//! pgvector's `vector(n)`). SQLite stores UUIDs as text, JSON, arrays and
//! vectors as JSON text, and timestamps as epoch milliseconds. Anything a
//! backend cannot express is reported as [`StoreError::Unsupported`]; the
//! factory never drops a constraint silently.

use super::{ColumnDef, ColumnType, DefaultValue, IndexDef, IndexMethod, TableDef};
use crate::connection::BackendKind;
use mnemos_types::error::{StoreError, StoreResult};

/// Widest vector pgvector stores.
pub const MAX_VECTOR_WIDTH: usize = 16_000;

/// Widest vector pgvector can index with HNSW.
pub const MAX_HNSW_WIDTH: usize = 2_000;

/// Stand-in for NULL uuids in null-safe unique keys.
const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Name of the bookkeeping table the migration service writes.
pub const JOURNAL_TABLE: &str = "__mnemos_migrations";

#[derive(Debug, Clone, Copy)]
pub struct SchemaFactory {
    backend: BackendKind,
}

impl SchemaFactory {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    fn unsupported(&self, feature: impl Into<String>) -> StoreError {
        StoreError::Unsupported {
            backend: self.backend.to_string(),
            feature: feature.into(),
        }
    }

    /// Physical type of a logical column type.
    pub fn column_type_sql(&self, column_type: &ColumnType) -> StoreResult<String> {
        if let ColumnType::Vector(width) = column_type {
            if *width == 0 || *width > MAX_VECTOR_WIDTH {
                return Err(StoreError::Validation(format!(
                    "vector width {width} outside 1..={MAX_VECTOR_WIDTH}"
                )));
            }
        }
        let sql = match (self.backend, column_type) {
            (BackendKind::Postgres, ColumnType::Uuid) => "UUID".to_string(),
            (BackendKind::Postgres, ColumnType::Text) => "TEXT".to_string(),
            (BackendKind::Postgres, ColumnType::Json) => "JSONB".to_string(),
            (BackendKind::Postgres, ColumnType::Boolean) => "BOOLEAN".to_string(),
            (BackendKind::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ".to_string(),
            (BackendKind::Postgres, ColumnType::Integer) => "BIGINT".to_string(),
            (BackendKind::Postgres, ColumnType::TextArray) => "TEXT[]".to_string(),
            (BackendKind::Postgres, ColumnType::Vector(width)) => format!("vector({width})"),
            (BackendKind::Embedded, ColumnType::Boolean)
            | (BackendKind::Embedded, ColumnType::Timestamp)
            | (BackendKind::Embedded, ColumnType::Integer) => "INTEGER".to_string(),
            (BackendKind::Embedded, _) => "TEXT".to_string(),
        };
        Ok(sql)
    }

    /// Physical default expression.
    pub fn default_sql(&self, default: &DefaultValue, column_type: &ColumnType) -> StoreResult<String> {
        let pg = self.backend == BackendKind::Postgres;
        let sql = match default {
            DefaultValue::RandomUuid => {
                if *column_type != ColumnType::Uuid {
                    return Err(StoreError::Validation(
                        "random uuid default on a non-uuid column".into(),
                    ));
                }
                if !pg {
                    return Err(self.unsupported("server-side random uuid default"));
                }
                "gen_random_uuid()".to_string()
            }
            DefaultValue::Now => {
                if *column_type != ColumnType::Timestamp {
                    return Err(StoreError::Validation(
                        "now() default on a non-timestamp column".into(),
                    ));
                }
                if pg {
                    "now()".to_string()
                } else {
                    "(CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER))".to_string()
                }
            }
            DefaultValue::Bool(b) => match (pg, b) {
                (true, true) => "true".to_string(),
                (true, false) => "false".to_string(),
                (false, b) => i64::from(*b).to_string(),
            },
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::EmptyObject => match column_type {
                ColumnType::Json if pg => "'{}'::jsonb".to_string(),
                ColumnType::Json => "'{}'".to_string(),
                other => {
                    return Err(StoreError::Validation(format!(
                        "empty object default on {other:?} column"
                    )))
                }
            },
            DefaultValue::EmptyArray => match column_type {
                ColumnType::Json if pg => "'[]'::jsonb".to_string(),
                ColumnType::TextArray if pg => "'{}'::text[]".to_string(),
                ColumnType::Json | ColumnType::TextArray => "'[]'".to_string(),
                other => {
                    return Err(StoreError::Validation(format!(
                        "empty array default on {other:?} column"
                    )))
                }
            },
        };
        Ok(sql)
    }

    /// Column definition inside `CREATE TABLE` / `ADD COLUMN`.
    pub fn column_sql(&self, column: &ColumnDef) -> StoreResult<String> {
        let mut sql = format!(
            "{} {}",
            quote_ident(&column.name)?,
            self.column_type_sql(&column.column_type)?
        );
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.default_sql(default, &column.column_type)?);
        }
        Ok(sql)
    }

    pub fn create_table_sql(&self, table: &TableDef) -> StoreResult<String> {
        if table.columns.is_empty() {
            return Err(StoreError::Validation(format!(
                "table '{}' has no columns",
                table.name
            )));
        }
        let has_column_key = table.columns.iter().any(|c| c.primary_key);
        if has_column_key && !table.primary_key.is_empty() {
            return Err(StoreError::Validation(format!(
                "table '{}' declares two primary keys",
                table.name
            )));
        }

        let mut parts = Vec::new();
        for column in &table.columns {
            parts.push(format!("    {}", self.column_sql(column)?));
        }
        if !table.primary_key.is_empty() {
            parts.push(format!(
                "    PRIMARY KEY ({})",
                column_list(table, &table.primary_key)?
            ));
        }
        for unique in &table.unique {
            parts.push(format!(
                "    CONSTRAINT {} UNIQUE ({})",
                quote_ident(&format!("{}_{}_unique", table.name, unique.join("_")))?,
                column_list(table, unique)?
            ));
        }
        for check in &table.checks {
            parts.push(format!(
                "    CONSTRAINT {} CHECK ({})",
                quote_ident(&check.name)?,
                check.expression
            ));
        }
        for fk in &table.foreign_keys {
            if fk.columns.len() != fk.referenced_columns.len() {
                return Err(StoreError::Validation(format!(
                    "foreign key on '{}' pairs {} columns with {}",
                    table.name,
                    fk.columns.len(),
                    fk.referenced_columns.len()
                )));
            }
            let referenced = fk
                .referenced_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<StoreResult<Vec<_>>>()?;
            parts.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                column_list(table, &fk.columns)?,
                quote_ident(&fk.references)?,
                referenced.join(", "),
                fk.on_delete.as_sql()
            ));
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(&table.name)?,
            parts.join(",\n")
        ))
    }

    pub fn create_index_sql(&self, table: &TableDef, index: &IndexDef) -> StoreResult<String> {
        let columns = column_list(table, &index.columns)?;
        match index.method {
            IndexMethod::Default => Ok(format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                quote_ident(&index.name)?,
                quote_ident(&table.name)?,
                columns
            )),
            IndexMethod::NullSafeUnique => {
                let mut keys = Vec::with_capacity(index.columns.len());
                for name in &index.columns {
                    keys.push(self.null_safe_key(table, name)?);
                }
                Ok(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&index.name)?,
                    quote_ident(&table.name)?,
                    keys.join(", ")
                ))
            }
            IndexMethod::Hnsw => {
                if self.backend != BackendKind::Postgres {
                    return Err(self.unsupported(format!("hnsw index '{}'", index.name)));
                }
                let [column] = index.columns.as_slice() else {
                    return Err(StoreError::Validation(format!(
                        "hnsw index '{}' must cover exactly one column",
                        index.name
                    )));
                };
                match table.get_column(column).map(|c| &c.column_type) {
                    Some(ColumnType::Vector(width)) if *width <= MAX_HNSW_WIDTH => {}
                    Some(ColumnType::Vector(width)) => {
                        return Err(self.unsupported(format!(
                            "hnsw index on vector({width}), limit {MAX_HNSW_WIDTH}"
                        )))
                    }
                    _ => {
                        return Err(StoreError::Validation(format!(
                            "hnsw index '{}' on non-vector column '{column}'",
                            index.name
                        )))
                    }
                }
                Ok(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw ({} vector_cosine_ops)",
                    quote_ident(&index.name)?,
                    quote_ident(&table.name)?,
                    columns
                ))
            }
        }
    }

    /// Index key for `column`: the column itself when NOT NULL, otherwise
    /// `COALESCE(column, sentinel)`. Only uuid and text keys have a sentinel.
    fn null_safe_key(&self, table: &TableDef, name: &str) -> StoreResult<String> {
        let Some(column) = table.get_column(name) else {
            return Err(StoreError::Validation(format!(
                "table '{}' has no column '{name}'",
                table.name
            )));
        };
        let quoted = quote_ident(name)?;
        if !column.nullable || column.primary_key {
            return Ok(quoted);
        }
        let sentinel = match (self.backend, &column.column_type) {
            (BackendKind::Postgres, ColumnType::Uuid) => format!("'{NIL_UUID}'::uuid"),
            (BackendKind::Embedded, ColumnType::Uuid) => format!("'{NIL_UUID}'"),
            (_, ColumnType::Text) => "''".to_string(),
            (_, other) => {
                return Err(self.unsupported(format!(
                    "null-safe unique key over {other:?} column '{name}'"
                )))
            }
        };
        Ok(format!("COALESCE({quoted}, {sentinel})"))
    }

    /// `CREATE TABLE` followed by the table's indexes.
    pub fn table_statements(&self, table: &TableDef) -> StoreResult<Vec<String>> {
        let mut statements = vec![self.create_table_sql(table)?];
        for index in &table.indexes {
            statements.push(self.create_index_sql(table, index)?);
        }
        Ok(statements)
    }

    /// `ALTER TABLE ... ADD COLUMN` for additive reconciliation.
    pub fn add_column_sql(&self, table: &str, column: &ColumnDef) -> StoreResult<String> {
        if column.primary_key || column.unique {
            return Err(self.unsupported(format!(
                "adding key column '{}' to existing table '{table}'",
                column.name
            )));
        }
        if !column.nullable && column.default.is_none() {
            return Err(StoreError::Migration(format!(
                "cannot add NOT NULL column '{}' without default to existing table '{table}'",
                column.name
            )));
        }
        if self.backend == BackendKind::Embedded && column.default == Some(DefaultValue::Now) {
            return Err(self.unsupported(format!(
                "adding column '{}' with a non-constant default",
                column.name
            )));
        }
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table)?,
            self.column_sql(column)?
        ))
    }

    /// Statements that must run before any table is created.
    pub fn prelude(&self, needs_vectors: bool) -> Vec<&'static str> {
        match self.backend {
            BackendKind::Postgres if needs_vectors => vec!["CREATE EXTENSION IF NOT EXISTS vector"],
            _ => Vec::new(),
        }
    }

    /// Placeholder for a vector parameter.
    pub fn vector_param(&self, index: usize) -> String {
        match self.backend {
            BackendKind::Postgres => format!("${index}::vector"),
            BackendKind::Embedded => format!("${index}"),
        }
    }

    /// Select-list item reading a vector column in its text form.
    pub fn vector_select(&self, expr: &str, alias: &str) -> String {
        match self.backend {
            BackendKind::Postgres => format!("{expr}::text AS {alias}"),
            BackendKind::Embedded => format!("{expr} AS {alias}"),
        }
    }

    /// Query listing user tables; one `name` column.
    pub fn list_tables_sql(&self) -> &'static str {
        match self.backend {
            BackendKind::Postgres => {
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'"
            }
            BackendKind::Embedded => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            }
        }
    }

    /// Query listing the columns of table `$1`; one `name` column.
    pub fn list_columns_sql(&self) -> &'static str {
        match self.backend {
            BackendKind::Postgres => {
                "SELECT column_name::text AS name FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
            BackendKind::Embedded => "SELECT name FROM pragma_table_info($1)",
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// Double-quote an identifier after checking it is a plain name.
pub fn quote_ident(name: &str) -> StoreResult<String> {
    if !is_identifier(name) {
        return Err(StoreError::Validation(format!("invalid identifier '{name}'")));
    }
    Ok(format!("\"{name}\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_list(table: &TableDef, columns: &[String]) -> StoreResult<String> {
    if columns.is_empty() {
        return Err(StoreError::Validation(format!(
            "empty column list on table '{}'",
            table.name
        )));
    }
    let mut quoted = Vec::with_capacity(columns.len());
    for column in columns {
        if table.get_column(column).is_none() {
            return Err(StoreError::Validation(format!(
                "table '{}' has no column '{column}'",
                table.name
            )));
        }
        quoted.push(quote_ident(column)?);
    }
    Ok(quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{created_at, json, text, text_array, uuid, vector};

    fn pg() -> SchemaFactory {
        SchemaFactory::new(BackendKind::Postgres)
    }

    fn embedded() -> SchemaFactory {
        SchemaFactory::new(BackendKind::Embedded)
    }

    fn sample() -> TableDef {
        TableDef::new("notes")
            .column(uuid("id").primary_key())
            .column(uuid("agent_id").not_null())
            .column(json("body").not_null().default(DefaultValue::EmptyObject))
            .column(text_array("tags").not_null().default(DefaultValue::EmptyArray))
            .column(vector("embedding", 384))
            .column(created_at("created_at"))
            .unique(&["agent_id", "body"])
            .check("notes_body_check", "body IS NOT NULL")
            .references("agent_id", "agents")
            .index("idx_notes_agent", &["agent_id"])
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(pg().column_type_sql(&ColumnType::Vector(768)).unwrap(), "vector(768)");
        assert_eq!(embedded().column_type_sql(&ColumnType::Vector(768)).unwrap(), "TEXT");
        assert_eq!(pg().column_type_sql(&ColumnType::Json).unwrap(), "JSONB");
        assert_eq!(embedded().column_type_sql(&ColumnType::Timestamp).unwrap(), "INTEGER");
        assert!(pg().column_type_sql(&ColumnType::Vector(0)).is_err());
    }

    #[test]
    fn test_postgres_table() {
        let sql = pg().create_table_sql(&sample()).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"notes\""));
        assert!(sql.contains("\"id\" UUID PRIMARY KEY"));
        assert!(sql.contains("\"body\" JSONB NOT NULL DEFAULT '{}'::jsonb"));
        assert!(sql.contains("\"tags\" TEXT[] NOT NULL DEFAULT '{}'::text[]"));
        assert!(sql.contains("\"embedding\" vector(384)"));
        assert!(sql.contains("DEFAULT now()"));
        assert!(sql.contains("CONSTRAINT \"notes_agent_id_body_unique\" UNIQUE (\"agent_id\", \"body\")"));
        assert!(sql.contains("CONSTRAINT \"notes_body_check\" CHECK (body IS NOT NULL)"));
        assert!(sql.contains(
            "FOREIGN KEY (\"agent_id\") REFERENCES \"agents\" (\"id\") ON DELETE CASCADE"
        ));
    }

    #[test]
    fn test_embedded_table() {
        let sql = embedded().create_table_sql(&sample()).unwrap();
        assert!(sql.contains("\"id\" TEXT PRIMARY KEY"));
        assert!(sql.contains("\"body\" TEXT NOT NULL DEFAULT '{}'"));
        assert!(sql.contains("\"tags\" TEXT NOT NULL DEFAULT '[]'"));
        assert!(sql.contains("\"embedding\" TEXT"));
        assert!(sql.contains("julianday('now')"));
        assert!(sql.contains("CHECK (body IS NOT NULL)"));
    }

    #[test]
    fn test_random_uuid_default_is_unsupported_on_embedded() {
        let column = uuid("id").primary_key().default(DefaultValue::RandomUuid);
        assert!(pg().column_sql(&column).unwrap().contains("gen_random_uuid()"));
        let err = embedded().column_sql(&column).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
    }

    #[test]
    fn test_hnsw_index() {
        let table = sample().vector_index("idx_notes_embedding", "embedding");
        let index = &table.indexes[1];
        assert_eq!(
            pg().create_index_sql(&table, index).unwrap(),
            "CREATE INDEX IF NOT EXISTS \"idx_notes_embedding\" ON \"notes\" USING hnsw (\"embedding\" vector_cosine_ops)"
        );
        assert!(matches!(
            embedded().create_index_sql(&table, index),
            Err(StoreError::Unsupported { .. })
        ));

        let wide = TableDef::new("wide")
            .column(uuid("id").primary_key())
            .column(vector("v", 3072))
            .vector_index("idx_wide_v", "v");
        assert!(matches!(
            pg().create_index_sql(&wide, &wide.indexes[0]),
            Err(StoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_null_safe_unique_index() {
        let table = TableDef::new("facts")
            .column(uuid("id").primary_key())
            .column(uuid("entity_id").not_null())
            .column(uuid("world_id"))
            .column(text("kind"))
            .column(json("data"))
            .null_safe_unique_index("uq_facts_key", &["entity_id", "world_id", "kind"]);
        let index = &table.indexes[0];
        assert_eq!(
            pg().create_index_sql(&table, index).unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uq_facts_key\" ON \"facts\" (\"entity_id\", \
             COALESCE(\"world_id\", '00000000-0000-0000-0000-000000000000'::uuid), COALESCE(\"kind\", ''))"
        );
        assert_eq!(
            embedded().create_index_sql(&table, index).unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uq_facts_key\" ON \"facts\" (\"entity_id\", \
             COALESCE(\"world_id\", '00000000-0000-0000-0000-000000000000'), COALESCE(\"kind\", ''))"
        );

        let over_json = table.clone().null_safe_unique_index("uq_facts_data", &["data"]);
        assert!(matches!(
            pg().create_index_sql(&over_json, &over_json.indexes[1]),
            Err(StoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_unknown_column_in_constraint_is_rejected() {
        let table = TableDef::new("t")
            .column(uuid("id").primary_key())
            .unique(&["missing"]);
        assert!(matches!(
            pg().create_table_sql(&table),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_identifiers_are_validated() {
        assert_eq!(quote_ident("unique").unwrap(), "\"unique\"");
        assert!(quote_ident("bad name").is_err());
        assert!(quote_ident("x\"; DROP TABLE agents; --").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn test_add_column() {
        let nullable = text("nickname");
        assert_eq!(
            embedded().add_column_sql("entities", &nullable).unwrap(),
            "ALTER TABLE \"entities\" ADD COLUMN \"nickname\" TEXT"
        );
        let required = text("nickname").not_null();
        assert!(matches!(
            pg().add_column_sql("entities", &required),
            Err(StoreError::Migration(_))
        ));
        let stamped = created_at("seen_at");
        assert!(pg().add_column_sql("entities", &stamped).is_ok());
        assert!(matches!(
            embedded().add_column_sql("entities", &stamped),
            Err(StoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_query_helpers() {
        assert_eq!(pg().vector_param(4), "$4::vector");
        assert_eq!(embedded().vector_param(4), "$4");
        assert_eq!(pg().vector_select("e.dim_384", "dim_384"), "e.dim_384::text AS dim_384");
        assert_eq!(pg().prelude(true), vec!["CREATE EXTENSION IF NOT EXISTS vector"]);
        assert!(pg().prelude(false).is_empty());
        assert!(embedded().prelude(true).is_empty());
    }
}
