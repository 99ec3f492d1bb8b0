//! In-process store, lost on restart

use super::{apply_mutation, ensure_deletable, validate_id, Mutator, SwapStore};
use crate::error::{StoreError, StoreResult};
use crate::swap::{SwapRecord, SwapState};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, SwapRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn create(&self, record: &SwapRecord) -> StoreResult<()> {
        validate_id(&record.id)?;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, mutate: Mutator) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        // Shard write lock is held for the whole read-modify-write
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let next = apply_mutation(entry.value(), mutate)?;
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn list_by_state(&self, state: SwapState) -> StoreResult<Vec<SwapRecord>> {
        let mut records: Vec<SwapRecord> = self
            .records
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_id(id)?;
        if self
            .records
            .remove_if(id, |_, r| r.state.is_terminal())
            .is_some()
        {
            return Ok(());
        }
        match self.records.get(id) {
            Some(entry) => ensure_deletable(entry.value()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mutator;
    use crate::store::test_support::record;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_is_unique() {
        let store = MemoryStore::new();
        let r = record("aa", SwapState::Created);
        store.create(&r).await.unwrap();
        assert!(matches!(
            store.create(&r).await,
            Err(StoreError::DuplicateId(_))
        ));
        assert_eq!(store.get("aa").await.unwrap(), r);
        assert!(matches!(store.get("bb").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_mutation_leaves_record_untouched() {
        let store = MemoryStore::new();
        let r = record("aa", SwapState::Created);
        store.create(&r).await.unwrap();

        let err = store
            .update("aa", mutator(|r| r.transition(SwapState::Claimed)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.get("aa").await.unwrap(), r);
    }

    #[tokio::test]
    async fn concurrent_updates_serialise() {
        let store = Arc::new(MemoryStore::new());
        store.create(&record("aa", SwapState::Created)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        "aa",
                        mutator(|r| {
                            let count = r
                                .last_error
                                .as_deref()
                                .and_then(|s| s.parse::<u32>().ok())
                                .unwrap_or(0);
                            r.last_error = Some((count + 1).to_string());
                            Ok(())
                        }),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get("aa").await.unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("16"));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = MemoryStore::new();
        store.create(&record("01", SwapState::Committed)).await.unwrap();
        store.create(&record("02", SwapState::Claimed)).await.unwrap();

        let committed = store.list_by_state(SwapState::Committed).await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, "01");

        assert!(store.delete("01").await.is_err());
        store.delete("02").await.unwrap();
        assert!(store.get("02").await.is_err());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.by_state["committed"], 1);
    }
}
