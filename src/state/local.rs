//! Local file-based state storage backend.
//!
//! State lives in a single JSON document. Every change is written to a
//! sibling temporary file, synced, and renamed over the old document, so a
//! reader only ever sees a complete state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{KeelError, Result, StateError};
use crate::resource::ResourceId;

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::{AppliedRecord, Records, RunHistoryEntry, STATE_VERSION, StateFile, VersionProbe};

/// Default state directory name.
pub const STATE_DIR: &str = ".keel";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Cached document; `None` until first read.
    cache: Mutex<Option<StateFile>>,
}

impl LocalStateStore {
    /// Creates a store at `<base_dir>/state.json`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self::with_state_path(base_dir.as_ref().join(STATE_FILE))
    }

    /// Creates a store from a state file path.
    ///
    /// The lock file sits next to it with a `.lock` extension.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");

        Self {
            state_path,
            lock_path,
            cache: Mutex::new(None),
        }
    }

    /// Path of the state document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    fn base_dir(&self) -> PathBuf {
        self.state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        let base_dir = self.base_dir();
        if !base_dir.exists() {
            debug!("Creating state directory: {}", base_dir.display());
            fs::create_dir_all(&base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Reads and version-checks the document on disk.
    async fn read_file(&self) -> Result<StateFile> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(StateFile::new());
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        parse_state(&content)
    }

    /// Writes the document atomically.
    async fn write_file(&self, state: &StateFile) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        #[cfg(unix)]
        {
            let dir = fs::File::open(self.base_dir())
                .await
                .map_err(|e| StateError::write(format!("Failed to open state directory: {e}")))?;
            dir.sync_all()
                .await
                .map_err(|e| StateError::write(format!("Failed to sync state directory: {e}")))?;
        }

        debug!("State saved (serial {})", state.serial);
        Ok(())
    }

    /// Applies `change` to the document and persists it.
    ///
    /// The cache mutex is held across the write, which serializes writers.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StateFile) + Send,
    {
        let mut cache = self.cache.lock().await;
        let mut state = match cache.take() {
            Some(state) => state,
            None => self.read_file().await?,
        };

        change(&mut state);
        state.touch();

        // A failed write leaves the cache empty so the next read comes from disk.
        self.write_file(&state).await?;
        *cache = Some(state);
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            KeelError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let lock_failed = |message: String| KeelError::State(StateError::LockFailed { message });

        let mut file = fs::File::create(&self.lock_path)
            .await
            .map_err(|e| lock_failed(format!("Failed to create lock file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;

        Ok(())
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                KeelError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

/// Parses a state document, rejecting other format versions.
pub(crate) fn parse_state(content: &str) -> Result<StateFile> {
    let probe: VersionProbe = serde_json::from_str(content).map_err(|e| {
        KeelError::State(StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })
    })?;

    if probe.version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            expected: STATE_VERSION,
            found: probe.version,
        }
        .into());
    }

    serde_json::from_str(content).map_err(|e| {
        KeelError::State(StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })
    })
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Records> {
        Ok(self.snapshot().await?.resources)
    }

    async fn snapshot(&self) -> Result<StateFile> {
        let mut cache = self.cache.lock().await;
        if let Some(state) = cache.as_ref() {
            return Ok(state.clone());
        }
        let state = self.read_file().await?;
        *cache = Some(state.clone());
        Ok(state)
    }

    async fn commit(&self, id: &ResourceId, record: AppliedRecord) -> Result<()> {
        debug!("Committing state for {id}");
        let id = id.clone();
        self.mutate(move |state| {
            state.resources.insert(id, record);
        })
        .await
    }

    async fn remove(&self, id: &ResourceId) -> Result<()> {
        debug!("Removing state for {id}");
        let id = id.clone();
        self.mutate(move |state| {
            state.resources.remove(&id);
        })
        .await
    }

    async fn set_outputs(&self, outputs: BTreeMap<String, serde_json::Value>) -> Result<()> {
        self.mutate(move |state| state.outputs = outputs).await
    }

    async fn record_run(&self, entry: RunHistoryEntry) -> Result<()> {
        self.mutate(move |state| state.add_history(entry)).await
    }

    async fn wipe(&self) -> Result<()> {
        info!("Wiping state at {}", self.state_path.display());
        self.mutate(|state| {
            state.resources.clear();
            state.outputs.clear();
        })
        .await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(KeelError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let lock_info = LockInfo::acquire(holder);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn force_unlock(&self) -> Result<()> {
        self.delete_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunOperation;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn record(hash: &str) -> AppliedRecord {
        let outputs = BTreeMap::from([(String::from("id"), json!("net-1"))]);
        AppliedRecord::new("network", hash, BTreeMap::new(), outputs, vec![])
    }

    #[tokio::test]
    async fn test_commit_survives_reopen() {
        let (store, temp) = create_test_store();

        store.commit(&ResourceId::from("net"), record("abc")).await.unwrap();

        let reopened = LocalStateStore::with_base_dir(temp.path());
        let records = reopened.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["net"].inputs_hash, "abc");
        assert_eq!(records["net"].outputs["id"], json!("net-1"));
    }

    #[tokio::test]
    async fn test_failed_write_is_not_served_from_cache() {
        let (store, temp) = create_test_store();
        store.commit(&ResourceId::from("net"), record("abc")).await.unwrap();

        let blocker = temp.path().join("state.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(store.commit(&ResourceId::from("svc"), record("def")).await.is_err());
        std::fs::remove_dir(&blocker).unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("net"));
        assert!(!records.contains_key("svc"));
    }

    #[tokio::test]
    async fn test_load_nonexistent_is_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, temp) = create_test_store();
        let id = ResourceId::from("net");

        store.commit(&id, record("abc")).await.unwrap();
        store.remove(&id).await.unwrap();

        let reopened = LocalStateStore::with_base_dir(temp.path());
        assert!(reopened.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let (store, temp) = create_test_store();
        store.commit(&ResourceId::from("net"), record("abc")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![String::from("state.json")]);
    }

    #[tokio::test]
    async fn test_wipe_keeps_history() {
        let (store, _temp) = create_test_store();
        store.commit(&ResourceId::from("net"), record("abc")).await.unwrap();
        store
            .record_run(RunHistoryEntry {
                timestamp: chrono::Utc::now(),
                operation: RunOperation::Apply,
                applied: vec![String::from("net")],
                failed: vec![],
                blocked: vec![],
                success: true,
            })
            .await
            .unwrap();

        store.wipe().await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.resources.is_empty());
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, temp) = create_test_store();
        std::fs::write(
            temp.path().join("state.json"),
            r#"{"version": 99, "serial": 0, "last_updated": "2024-01-01T00:00:00Z", "resources": {}}"#,
        )
        .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(
            err,
            KeelError::State(StateError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let (store, temp) = create_test_store();
        std::fs::write(temp.path().join("state.json"), "not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, KeelError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("test-holder").await.unwrap();
        assert!(store.lock_info().await.unwrap().is_some());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store.acquire_lock("holder-1").await.unwrap();

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(KeelError::State(StateError::LockedByOther { .. }))
        ));

        store.force_unlock().await.unwrap();
        assert!(store.acquire_lock("holder-2").await.is_ok());
    }
}
