//! Durable swap persistence
//!
//! Handles:
//! - Create-once records keyed by swap id
//! - Atomic read-modify-write per swap, serialised per id
//! - Lookup by state for the recovery sweep
//!
//! Backends: in-process memory, one JSON file per swap, PostgreSQL.

mod file;
mod memory;
mod postgres;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::{StoreError, StoreResult};
use crate::swap::{SwapRecord, SwapState};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

/// Change applied to a record inside a store update.
///
/// Returning an error aborts the update and leaves the stored record untouched.
pub type Mutator = Box<dyn FnOnce(&mut SwapRecord) -> StoreResult<()> + Send>;

/// Wrap a closure as a [`Mutator`]
pub fn mutator<F>(f: F) -> Mutator
where
    F: FnOnce(&mut SwapRecord) -> StoreResult<()> + Send + 'static,
{
    Box::new(f)
}

#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Persist a new record. Fails with `DuplicateId` if the id exists.
    async fn create(&self, record: &SwapRecord) -> StoreResult<()>;

    /// Fails with `NotFound` if the id is unknown
    async fn get(&self, id: &str) -> StoreResult<SwapRecord>;

    /// Atomically apply `mutate` to the current record and persist the result.
    ///
    /// Concurrent updates on the same id are serialised; either the whole
    /// change lands or none of it does.
    async fn update(&self, id: &str, mutate: Mutator) -> StoreResult<SwapRecord>;

    async fn list_by_state(&self, state: SwapState) -> StoreResult<Vec<SwapRecord>>;

    /// Remove a terminal record
    async fn delete(&self, id: &str) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;

    /// Number of records per state
    async fn stats(&self) -> StoreResult<StoreStats> {
        let mut by_state = BTreeMap::new();
        for state in SwapState::ALL {
            let count = self.list_by_state(state).await?.len();
            by_state.insert(state.as_str().to_string(), count);
        }
        Ok(StoreStats { by_state })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub by_state: BTreeMap<String, usize>,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.by_state.values().sum()
    }
}

/// Run a mutator against a copy of `current`, checking frozen fields.
pub(crate) fn apply_mutation(current: &SwapRecord, mutate: Mutator) -> StoreResult<SwapRecord> {
    let mut next = current.clone();
    mutate(&mut next)?;
    next.ensure_unchanged_identity(current)?;
    next.updated_at = Utc::now();
    Ok(next)
}

pub(crate) fn ensure_deletable(record: &SwapRecord) -> StoreResult<()> {
    if record.state.is_terminal() {
        Ok(())
    } else {
        Err(StoreError::NotTerminal {
            swap_id: record.id.clone(),
            state: record.state,
        })
    }
}

/// Ids end up as file names and SQL keys; only hex is accepted.
pub(crate) fn validate_id(id: &str) -> StoreResult<()> {
    if id.is_empty() || id.len() > 128 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}
