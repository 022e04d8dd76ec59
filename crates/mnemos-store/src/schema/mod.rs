//! Backend-agnostic table descriptions.
//!
//! Core tables and plugin tables are both written against these types and
//! turned into DDL by [`factory::SchemaFactory`] for the selected backend.

pub mod factory;
pub mod tables;

use std::collections::BTreeSet;

/// Logical column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Json,
    Boolean,
    Timestamp,
    Integer,
    TextArray,
    /// Fixed-width float vector.
    Vector(usize),
}

/// Logical column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Server-generated random UUID.
    RandomUuid,
    /// Current time at insert.
    Now,
    Bool(bool),
    Integer(i64),
    Text(String),
    EmptyObject,
    EmptyArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Single-column primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }
}

pub fn uuid(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Uuid)
}

pub fn text(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Text)
}

pub fn json(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Json)
}

pub fn boolean(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Boolean)
}

pub fn timestamp(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Timestamp)
}

pub fn integer(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Integer)
}

pub fn text_array(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::TextArray)
}

pub fn vector(name: &str, width: usize) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Vector(width))
}

/// `created_at`-style column: NOT NULL, defaulting to now.
pub fn created_at(name: &str) -> ColumnDef {
    timestamp(name).not_null().default(DefaultValue::Now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub references: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMethod {
    /// The engine's default (B-tree).
    Default,
    /// Approximate nearest-neighbour index over a vector column (cosine).
    Hnsw,
    /// Unique B-tree index in which NULLs compare equal: nullable columns
    /// are indexed through `COALESCE` to a sentinel.
    NullSafeUnique,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub method: IndexMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckDef {
    pub name: String,
    pub expression: String,
}

/// One logical table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Composite primary key; empty when a column carries the key.
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
    pub checks: Vec<CheckDef>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDef>,
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            checks: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = owned(columns);
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique.push(owned(columns));
        self
    }

    pub fn check(mut self, name: &str, expression: &str) -> Self {
        self.checks.push(CheckDef {
            name: name.to_string(),
            expression: expression.to_string(),
        });
        self
    }

    pub fn foreign_key(
        mut self,
        columns: &[&str],
        references: &str,
        referenced_columns: &[&str],
        on_delete: OnDelete,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns: owned(columns),
            references: references.to_string(),
            referenced_columns: owned(referenced_columns),
            on_delete,
        });
        self
    }

    /// `column REFERENCES table(id) ON DELETE CASCADE`.
    pub fn references(self, column: &str, table: &str) -> Self {
        self.foreign_key(&[column], table, &["id"], OnDelete::Cascade)
    }

    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: owned(columns),
            unique: false,
            method: IndexMethod::Default,
        });
        self
    }

    pub fn unique_index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: owned(columns),
            unique: true,
            method: IndexMethod::Default,
        });
        self
    }

    /// A unique index treating NULL as one value, for keys with optional parts.
    pub fn null_safe_unique_index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: owned(columns),
            unique: true,
            method: IndexMethod::NullSafeUnique,
        });
        self
    }

    pub fn vector_index(mut self, name: &str, column: &str) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: vec![column.to_string()],
            unique: false,
            method: IndexMethod::Hnsw,
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Tables this one references, excluding itself.
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }

    pub fn has_vector_columns(&self) -> bool {
        self.columns
            .iter()
            .any(|c| matches!(c.column_type, ColumnType::Vector(_)))
    }
}

/// A named set of tables contributed by the core or a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaModule {
    pub name: String,
    pub tables: Vec<TableDef>,
}

impl SchemaModule {
    pub fn new(name: impl Into<String>, tables: Vec<TableDef>) -> Self {
        Self {
            name: name.into(),
            tables,
        }
    }

    pub fn owns(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }
}
