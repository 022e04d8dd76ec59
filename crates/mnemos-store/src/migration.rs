//! Schema registry and idempotent migration runner.
//!
//! Modules (the core plus any plugin) register their tables by name. The
//! runner orders modules by foreign-key references, renders every statement
//! up front, and applies each module in its own transaction. A journal
//! table records a checksum of each module's DDL so unchanged modules are
//! skipped and changed ones are reconciled additively.

use crate::connection::{ConnectionManager, Session};
use crate::schema::factory::{SchemaFactory, JOURNAL_TABLE};
use crate::schema::tables::{core_tables, CORE_MODULE};
use crate::schema::{created_at, text, SchemaModule, TableDef};
use crate::sql_params;
use chrono::{DateTime, Utc};
use mnemos_types::error::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// What a migration run did, by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Modules applied for the first time.
    pub applied: Vec<String>,
    /// Modules whose definition changed and were reconciled.
    pub reconciled: Vec<String>,
    /// Modules already up to date.
    pub skipped: Vec<String>,
}

/// A journal row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedModule {
    pub module: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// One module in application order, its tables in dependency order.
#[derive(Debug)]
pub struct PlannedModule<'a> {
    pub module: &'a SchemaModule,
    pub tables: Vec<&'a TableDef>,
}

/// Registry of schema modules.
#[derive(Debug, Clone, Default)]
pub struct MigrationService {
    modules: Vec<SchemaModule>,
}

impl MigrationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the core module.
    pub fn with_core() -> Self {
        let mut service = Self::new();
        service.register_schema(CORE_MODULE, core_tables());
        service
    }

    /// Register a module. A name already registered is ignored and `false`
    /// is returned; the first registration wins.
    pub fn register_schema(&mut self, name: impl Into<String>, tables: Vec<TableDef>) -> bool {
        let name = name.into();
        if self.modules.iter().any(|m| m.name == name) {
            debug!(module = %name, "Schema module already registered, ignoring");
            return false;
        }
        debug!(module = %name, tables = tables.len(), "Registered schema module");
        self.modules.push(SchemaModule::new(name, tables));
        true
    }

    pub fn modules(&self) -> &[SchemaModule] {
        &self.modules
    }

    /// Resolve application order, or fail on a dangling reference, a table
    /// claimed twice, or a reference cycle.
    pub fn plan(&self) -> StoreResult<Vec<PlannedModule<'_>>> {
        let mut owners: HashMap<&str, usize> = HashMap::new();
        let mut tables: HashMap<&str, &TableDef> = HashMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            for table in &module.tables {
                if let Some(&other) = owners.get(table.name.as_str()) {
                    return Err(StoreError::Migration(format!(
                        "table '{}' registered by both '{}' and '{}'",
                        table.name, self.modules[other].name, module.name
                    )));
                }
                owners.insert(&table.name, i);
                tables.insert(&table.name, table);
            }
        }

        let mut module_deps = vec![BTreeSet::new(); self.modules.len()];
        for (i, module) in self.modules.iter().enumerate() {
            for table in &module.tables {
                for fk in &table.foreign_keys {
                    let Some(&owner) = owners.get(fk.references.as_str()) else {
                        return Err(StoreError::Migration(format!(
                            "table '{}' in module '{}' references unknown table '{}'",
                            table.name, module.name, fk.references
                        )));
                    };
                    let target = tables[fk.references.as_str()];
                    if let Some(missing) = fk
                        .referenced_columns
                        .iter()
                        .find(|c| target.get_column(c).is_none())
                    {
                        return Err(StoreError::Migration(format!(
                            "table '{}' references missing column '{}.{missing}'",
                            table.name, fk.references
                        )));
                    }
                    if owner != i {
                        module_deps[i].insert(owner);
                    }
                }
            }
        }

        let order = stable_topo_sort(&module_deps).map_err(|cycle| {
            let names: Vec<&str> = cycle.iter().map(|&i| self.modules[i].name.as_str()).collect();
            StoreError::Migration(format!(
                "foreign-key cycle between schema modules: {}",
                names.join(", ")
            ))
        })?;

        order
            .into_iter()
            .map(|i| {
                let module = &self.modules[i];
                Ok(PlannedModule {
                    module,
                    tables: order_tables(module)?,
                })
            })
            .collect()
    }

    /// Apply every registered module against `db`.
    pub async fn run(&self, db: &dyn ConnectionManager) -> StoreResult<MigrationReport> {
        let factory = SchemaFactory::new(db.backend());
        let plan = self.plan()?;

        // Render everything first so a backend feature gap aborts before any
        // change is made.
        let mut rendered = Vec::with_capacity(plan.len());
        for step in &plan {
            let mut statements = Vec::new();
            for table in &step.tables {
                statements.extend(factory.table_statements(table)?);
            }
            let checksum = checksum(&statements);
            rendered.push((step, statements, checksum));
        }
        let needs_vectors = plan
            .iter()
            .flat_map(|s| s.tables.iter())
            .any(|t| t.has_vector_columns());

        {
            let mut session = db.acquire().await?;
            for statement in factory.prelude(needs_vectors) {
                session
                    .execute_script(statement)
                    .await
                    .map_err(|e| fatal("prelude", e))?;
            }
            for statement in factory.table_statements(&journal_table())? {
                session
                    .execute_script(&statement)
                    .await
                    .map_err(|e| fatal(JOURNAL_TABLE, e))?;
            }
        }

        let mut report = MigrationReport::default();
        for (step, statements, checksum) in rendered {
            let name = step.module.name.as_str();
            let mut tx = db.begin().await?;
            let recorded = tx
                .fetch_optional(
                    &format!("SELECT checksum FROM {JOURNAL_TABLE} WHERE module = $1"),
                    &sql_params![name],
                )
                .await?;

            match recorded {
                None => {
                    for statement in &statements {
                        tx.execute_script(statement)
                            .await
                            .map_err(|e| fatal(name, e))?;
                    }
                    tx.execute(
                        &format!(
                            "INSERT INTO {JOURNAL_TABLE} (module, checksum, applied_at) VALUES ($1, $2, $3)"
                        ),
                        &sql_params![name, checksum.as_str(), Utc::now()],
                    )
                    .await?;
                    tx.commit().await?;
                    info!(module = name, tables = step.tables.len(), "Applied schema module");
                    report.applied.push(name.to_string());
                }
                Some(row) if row.text("checksum")? == checksum => {
                    tx.commit().await?;
                    debug!(module = name, "Schema module up to date");
                    report.skipped.push(name.to_string());
                }
                Some(_) => {
                    reconcile(&factory, tx.as_mut(), step)
                        .await
                        .map_err(|e| fatal(name, e))?;
                    tx.execute(
                        &format!(
                            "UPDATE {JOURNAL_TABLE} SET checksum = $2, applied_at = $3 WHERE module = $1"
                        ),
                        &sql_params![name, checksum.as_str(), Utc::now()],
                    )
                    .await?;
                    tx.commit().await?;
                    info!(module = name, "Reconciled changed schema module");
                    report.reconciled.push(name.to_string());
                }
            }
        }
        Ok(report)
    }
}

fn journal_table() -> TableDef {
    TableDef::new(JOURNAL_TABLE)
        .column(text("module").primary_key())
        .column(text("checksum").not_null())
        .column(created_at("applied_at"))
}

/// Journal contents, oldest first. Empty before the first migration.
pub async fn applied_modules(db: &dyn ConnectionManager) -> StoreResult<Vec<AppliedModule>> {
    if !existing_tables(db).await?.contains(JOURNAL_TABLE) {
        return Ok(Vec::new());
    }
    let mut session = db.acquire().await?;
    let rows = session
        .fetch_all(
            &format!("SELECT module, checksum, applied_at FROM {JOURNAL_TABLE} ORDER BY applied_at, module"),
            &[],
        )
        .await?;
    rows.iter()
        .map(|row| {
            Ok(AppliedModule {
                module: row.text("module")?,
                checksum: row.text("checksum")?,
                applied_at: row.timestamp("applied_at")?,
            })
        })
        .collect()
}

/// Names of the tables present in the database.
pub async fn existing_tables(db: &dyn ConnectionManager) -> StoreResult<HashSet<String>> {
    let factory = SchemaFactory::new(db.backend());
    let mut session = db.acquire().await?;
    list_tables(&factory, session.as_mut()).await
}

async fn list_tables(factory: &SchemaFactory, session: &mut dyn Session) -> StoreResult<HashSet<String>> {
    session
        .fetch_all(factory.list_tables_sql(), &[])
        .await?
        .iter()
        .map(|row| row.text("name"))
        .collect()
}

async fn reconcile(
    factory: &SchemaFactory,
    session: &mut dyn Session,
    step: &PlannedModule<'_>,
) -> StoreResult<()> {
    let existing = list_tables(factory, session).await?;
    for table in &step.tables {
        if !existing.contains(&table.name) {
            for statement in factory.table_statements(table)? {
                session.execute_script(&statement).await?;
            }
            info!(table = %table.name, "Created table during reconcile");
            continue;
        }

        let columns: HashSet<String> = session
            .fetch_all(factory.list_columns_sql(), &sql_params![table.name.as_str()])
            .await?
            .iter()
            .map(|row| row.text("name"))
            .collect::<StoreResult<_>>()?;
        for column in &table.columns {
            if !columns.contains(&column.name) {
                let statement = factory.add_column_sql(&table.name, column)?;
                session.execute_script(&statement).await?;
                info!(table = %table.name, column = %column.name, "Added column");
            }
        }
        for index in &table.indexes {
            session
                .execute_script(&factory.create_index_sql(table, index)?)
                .await?;
        }
    }
    Ok(())
}

fn order_tables(module: &SchemaModule) -> StoreResult<Vec<&TableDef>> {
    let index: HashMap<&str, usize> = module
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();
    if index.len() != module.tables.len() {
        return Err(StoreError::Migration(format!(
            "module '{}' declares a table twice",
            module.name
        )));
    }
    let deps: Vec<BTreeSet<usize>> = module
        .tables
        .iter()
        .map(|t| {
            t.referenced_tables()
                .into_iter()
                .filter_map(|r| index.get(r).copied())
                .collect()
        })
        .collect();
    let order = stable_topo_sort(&deps).map_err(|cycle| {
        let names: Vec<&str> = cycle.iter().map(|&i| module.tables[i].name.as_str()).collect();
        StoreError::Migration(format!(
            "foreign-key cycle between tables of '{}': {}",
            module.name,
            names.join(", ")
        ))
    })?;
    Ok(order.into_iter().map(|i| &module.tables[i]).collect())
}

/// Kahn's algorithm with ties broken by input position. On a cycle, returns
/// the nodes that could not be placed.
fn stable_topo_sort(deps: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut placed = vec![false; deps.len()];
    let mut order = Vec::with_capacity(deps.len());
    while order.len() < deps.len() {
        let next = (0..deps.len()).find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => return Err((0..deps.len()).filter(|&i| !placed[i]).collect()),
        }
    }
    Ok(order)
}

fn checksum(statements: &[String]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.as_bytes());
        hasher.update(b";\n");
    }
    hex::encode(hasher.finalize())
}

/// Errors during DDL abort startup; transient ones keep their class.
fn fatal(context: &str, err: StoreError) -> StoreError {
    match err {
        StoreError::Transient(_)
        | StoreError::Timeout(_)
        | StoreError::Migration(_)
        | StoreError::Unsupported { .. } => err,
        other => StoreError::Migration(format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::sqlite::SqliteManager;
    use crate::schema::{json, uuid, vector};
    use mnemos_types::config::StorageConfig;

    fn memory_db() -> SqliteManager {
        SqliteManager::open_in_memory(&StorageConfig::in_memory()).unwrap()
    }

    fn notes_table() -> TableDef {
        TableDef::new("plugin_notes")
            .column(uuid("id").primary_key())
            .column(uuid("agent_id").not_null())
            .column(json("body"))
            .references("agent_id", "agents")
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let mut service = MigrationService::with_core();
        assert!(!service.register_schema(CORE_MODULE, vec![notes_table()]));
        assert_eq!(service.modules().len(), 1);
        assert!(service.modules()[0].owns("agents"));
        assert!(!service.modules()[0].owns("plugin_notes"));
    }

    #[test]
    fn test_dependent_module_runs_after_its_dependency() {
        let mut service = MigrationService::new();
        service.register_schema("notes-plugin", vec![notes_table()]);
        service.register_schema(CORE_MODULE, core_tables());
        let plan = service.plan().unwrap();
        let names: Vec<&str> = plan.iter().map(|p| p.module.name.as_str()).collect();
        assert_eq!(names, vec![CORE_MODULE, "notes-plugin"]);
    }

    #[test]
    fn test_core_tables_are_ordered_by_references() {
        let service = MigrationService::with_core();
        let plan = service.plan().unwrap();
        let names: Vec<&str> = plan[0].tables.iter().map(|t| t.name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("agents") < pos("worlds"));
        assert!(pos("worlds") < pos("rooms"));
        assert!(pos("memories") < pos("embeddings"));
        assert!(pos("entities") < pos("components"));
    }

    #[test]
    fn test_unknown_reference_fails() {
        let mut service = MigrationService::new();
        service.register_schema("orphan", vec![notes_table()]);
        assert!(matches!(service.plan(), Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_module_cycle_fails() {
        let a = TableDef::new("a_items")
            .column(uuid("id").primary_key())
            .column(uuid("b_id"))
            .references("b_id", "b_items");
        let b = TableDef::new("b_items")
            .column(uuid("id").primary_key())
            .column(uuid("a_id"))
            .references("a_id", "a_items");
        let mut service = MigrationService::new();
        service.register_schema("a", vec![a]);
        service.register_schema("b", vec![b]);
        let err = service.plan().unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_table_owned_twice_fails() {
        let mut service = MigrationService::with_core();
        service.register_schema(
            "hijack",
            vec![TableDef::new("agents").column(uuid("id").primary_key())],
        );
        assert!(matches!(service.plan(), Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_stable_topo_sort() {
        let deps = vec![BTreeSet::from([2]), BTreeSet::new(), BTreeSet::new()];
        assert_eq!(stable_topo_sort(&deps).unwrap(), vec![1, 2, 0]);
        let cyclic = vec![BTreeSet::from([1]), BTreeSet::from([0]), BTreeSet::new()];
        assert_eq!(stable_topo_sort(&cyclic).unwrap_err(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let db = memory_db();
        let mut service = MigrationService::with_core();
        service.register_schema("notes-plugin", vec![notes_table()]);

        let first = service.run(&db).await.unwrap();
        assert_eq!(first.applied, vec![CORE_MODULE, "notes-plugin"]);

        let second = service.run(&db).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec![CORE_MODULE, "notes-plugin"]);

        let tables = existing_tables(&db).await.unwrap();
        for table in ["agents", "memories", "embeddings", "cache", "plugin_notes", JOURNAL_TABLE] {
            assert!(tables.contains(table), "missing {table}");
        }
        let journal = applied_modules(&db).await.unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0].checksum.len(), 64);
    }

    #[tokio::test]
    async fn test_changed_module_is_reconciled_additively() {
        let db = memory_db();
        let mut v1 = MigrationService::with_core();
        v1.register_schema("notes-plugin", vec![notes_table()]);
        v1.run(&db).await.unwrap();

        let mut v2 = MigrationService::with_core();
        v2.register_schema(
            "notes-plugin",
            vec![
                notes_table().column(text("title")),
                TableDef::new("plugin_tags")
                    .column(uuid("id").primary_key())
                    .column(text("label").not_null()),
            ],
        );
        let report = v2.run(&db).await.unwrap();
        assert_eq!(report.reconciled, vec!["notes-plugin"]);
        assert_eq!(report.skipped, vec![CORE_MODULE]);

        let tables = existing_tables(&db).await.unwrap();
        assert!(tables.contains("plugin_tags"));
        let mut session = db.acquire().await.unwrap();
        let columns = session
            .fetch_all(
                SchemaFactory::new(db.backend()).list_columns_sql(),
                &sql_params!["plugin_notes"],
            )
            .await
            .unwrap();
        assert!(columns.iter().any(|r| r.text("name").unwrap() == "title"));
    }

    #[tokio::test]
    async fn test_required_column_without_default_is_fatal() {
        let db = memory_db();
        let mut v1 = MigrationService::with_core();
        v1.register_schema("notes-plugin", vec![notes_table()]);
        v1.run(&db).await.unwrap();

        let mut v2 = MigrationService::with_core();
        v2.register_schema(
            "notes-plugin",
            vec![notes_table().column(text("title").not_null())],
        );
        let err = v2.run(&db).await.unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }

    #[tokio::test]
    async fn test_unsupported_feature_aborts_before_any_change() {
        let db = memory_db();
        let mut service = MigrationService::with_core();
        service.register_schema(
            "vectors-plugin",
            vec![TableDef::new("plugin_vectors")
                .column(uuid("id").primary_key())
                .column(vector("v", 384))
                .vector_index("idx_plugin_vectors_v", "v")],
        );
        let err = service.run(&db).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
        assert!(existing_tables(&db).await.unwrap().is_empty());
    }
}
