//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Writes are per resource so that a run interrupted halfway leaves every
//! node that finished recorded.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::ResourceId;

use super::lock::LockInfo;
use super::types::{AppliedRecord, Records, RunHistoryEntry, StateFile};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the applied records, empty when no state exists yet.
    ///
    /// # Errors
    ///
    /// Returns `StateError::VersionMismatch` for a state written by an
    /// incompatible format version.
    async fn load(&self) -> Result<Records>;

    /// Loads the whole state document.
    async fn snapshot(&self) -> Result<StateFile>;

    /// Durably records the applied state of one resource.
    ///
    /// Must not return before the write is durable.
    async fn commit(&self, id: &ResourceId, record: AppliedRecord) -> Result<()>;

    /// Durably removes the record of one resource.
    async fn remove(&self, id: &ResourceId) -> Result<()>;

    /// Replaces the stored stack outputs.
    async fn set_outputs(&self, outputs: BTreeMap<String, serde_json::Value>) -> Result<()>;

    /// Appends a run history entry.
    async fn record_run(&self, entry: RunHistoryEntry) -> Result<()>;

    /// Forgets every record and output; history is kept.
    async fn wipe(&self) -> Result<()>;

    /// Acquires the run lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Removes any lock, regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

impl std::fmt::Debug for dyn StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateStore({})", self.backend_type())
    }
}
