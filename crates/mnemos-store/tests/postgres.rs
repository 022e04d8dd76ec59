//! Storage contract over a live Postgres + pgvector database.
//!
//! Runs only when `MNEMOS_TEST_POSTGRES_URL` points at a database where the
//! `vector` extension can be created; otherwise the test returns early.
//! The checks share one test so migrations never race each other.

mod common;

use mnemos_store::{BackendKind, StorageAdapter};
use mnemos_types::config::StorageConfig;

const URL_ENV: &str = "MNEMOS_TEST_POSTGRES_URL";

async fn connect() -> Option<StorageAdapter> {
    let Ok(url) = std::env::var(URL_ENV) else {
        eprintln!("{URL_ENV} not set, skipping");
        return None;
    };
    let adapter = StorageAdapter::init(StorageConfig::postgres(url)).await.unwrap();
    assert_eq!(adapter.backend(), BackendKind::Postgres);
    Some(adapter)
}

#[tokio::test]
async fn test_postgres_contract() {
    let Some(adapter) = connect().await else {
        return;
    };
    assert!(adapter.is_ready().await);
    common::entity_round_trip(&adapter).await;
    common::idempotent_delete(&adapter).await;
    common::agent_name_uniqueness(&adapter).await;
    common::settings_merge(&adapter).await;
    common::case_insensitive_search(&adapter).await;
    common::embedding_dimension_contract(&adapter).await;
    common::cascade_completeness(&adapter).await;
    adapter.close().await;

    // The schema is in place now; a second startup applies nothing.
    let Some(reopened) = connect().await else {
        return;
    };
    let report = reopened.migration_report();
    assert!(report.applied.is_empty());
    assert!(report.reconciled.is_empty());
    reopened.close().await;
}
