//! Typed stores over a shared [`ConnectionManager`].
//!
//! Each store borrows a session per operation (or a transaction for
//! multi-statement writes) and never branches on the backend kind; backend
//! differences live in the connection layer and the schema factory.

pub mod agent;
pub mod cache;
pub mod component;
pub mod entity;
pub mod log;
pub mod memory;
pub mod relationship;
pub mod task;
pub mod world;

pub use agent::AgentStore;
pub use cache::CacheStore;
pub use component::ComponentStore;
pub use entity::EntityStore;
pub use log::LogStore;
pub use memory::MemoryStore;
pub use relationship::RelationshipStore;
pub use task::TaskStore;
pub use world::WorldStore;

use mnemos_types::error::{StoreError, StoreResult};
use tracing::debug;

/// Turn a constraint violation into "rejected" (`Ok(None)`), keeping every
/// other error.
pub(crate) trait RejectConflict<T> {
    fn rejected_on_conflict(self, what: &str) -> StoreResult<Option<T>>;
}

impl<T> RejectConflict<T> for StoreResult<T> {
    fn rejected_on_conflict(self, what: &str) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::Conflict(reason)) => {
                debug!(what, %reason, "write rejected by constraint");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse a JSON column into a string list, tolerating NULL.
pub(crate) fn string_list(value: serde_json::Value) -> StoreResult<Vec<String>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// Reject a blank required text field before any I/O.
pub(crate) fn require_text(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
