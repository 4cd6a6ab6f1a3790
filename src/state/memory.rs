//! In-memory state backend, used by tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{KeelError, Result, StateError};
use crate::resource::ResourceId;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{AppliedRecord, Records, RunHistoryEntry, StateFile};

/// State store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<StateFile>,
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with existing records.
    #[must_use]
    pub fn with_records(records: Records) -> Self {
        let mut state = StateFile::new();
        state.resources = records;
        Self {
            state: Mutex::new(state),
            lock: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Records> {
        Ok(self.state.lock().await.resources.clone())
    }

    async fn snapshot(&self) -> Result<StateFile> {
        Ok(self.state.lock().await.clone())
    }

    async fn commit(&self, id: &ResourceId, record: AppliedRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.resources.insert(id.clone(), record);
        state.touch();
        Ok(())
    }

    async fn remove(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.resources.remove(id);
        state.touch();
        Ok(())
    }

    async fn set_outputs(&self, outputs: BTreeMap<String, serde_json::Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.outputs = outputs;
        state.touch();
        Ok(())
    }

    async fn record_run(&self, entry: RunHistoryEntry) -> Result<()> {
        self.state.lock().await.add_history(entry);
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.resources.clear();
        state.outputs.clear();
        state.touch();
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut lock = self.lock.lock().await;
        if let Some(existing) = lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(KeelError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }
        let info = LockInfo::acquire(holder);
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut lock = self.lock.lock().await;
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    async fn force_unlock(&self) -> Result<()> {
        *self.lock.lock().await = None;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_and_remove() {
        let store = MemoryStateStore::new();
        let id = ResourceId::from("a");
        let record = AppliedRecord::new("null", "h1", BTreeMap::new(), BTreeMap::new(), vec![]);

        store.commit(&id, record).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);

        store.remove(&id).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.snapshot().await.unwrap().serial, 2);
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let store = MemoryStateStore::new();
        let held = store.acquire_lock("one").await.unwrap();
        assert!(store.acquire_lock("two").await.is_err());

        store.release_lock(&held.lock_id).await.unwrap();
        assert!(store.acquire_lock("two").await.is_ok());
    }
}
