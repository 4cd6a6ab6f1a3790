//! State types for tracking applied resources.
//!
//! These types are what a [`StateStore`](super::StateStore) persists
//! between runs and what the planner diffs against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::{Outputs, ResourceId};

/// Current version of the state format.
pub const STATE_VERSION: u32 = 1;

/// Maximum number of run history entries kept.
const MAX_HISTORY: usize = 100;

/// Applied state records keyed by resource id.
pub type Records = BTreeMap<ResourceId, AppliedRecord>;

/// The complete persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State format version.
    pub version: u32,
    /// Incremented on every write.
    pub serial: u64,
    /// When the state was last written.
    pub last_updated: DateTime<Utc>,
    /// Last applied state per resource.
    pub resources: Records,
    /// Stack outputs computed by the last successful apply.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Last successfully applied state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Type tag at apply time.
    pub resource_type: String,
    /// Hash of the resolved desired inputs that produced this record.
    pub inputs_hash: String,
    /// Resolved inputs sent to the provider.
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Live outputs reported by the provider.
    pub outputs: Outputs,
    /// Dependencies at apply time, used to order deletes.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last applied.
    pub updated_at: DateTime<Utc>,
}

/// Only the version field, read before the full document.
#[derive(Debug, Deserialize)]
pub(crate) struct VersionProbe {
    pub(crate) version: u32,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Nodes applied.
    pub applied: Vec<String>,
    /// Nodes failed.
    pub failed: Vec<String>,
    /// Nodes blocked by a failed dependency.
    #[serde(default)]
    pub blocked: Vec<String>,
    /// Whether every node succeeded.
    pub success: bool,
}

/// Types of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Plan and apply.
    Apply,
    /// Delete everything.
    Destroy,
}

impl StateFile {
    /// Creates a new empty state document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Marks the document as modified.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

impl AppliedRecord {
    /// Creates a record for a freshly applied resource.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        inputs_hash: impl Into<String>,
        inputs: BTreeMap<String, serde_json::Value>,
        outputs: Outputs,
        dependencies: Vec<ResourceId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            resource_type: resource_type.into(),
            inputs_hash: inputs_hash.into(),
            inputs,
            outputs,
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keeps the original creation time of `prior`.
    #[must_use]
    pub fn replacing(mut self, prior: &Self) -> Self {
        self.created_at = prior.created_at;
        self
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RunHistoryEntry {
        RunHistoryEntry {
            timestamp: Utc::now(),
            operation: RunOperation::Apply,
            applied: vec![],
            failed: vec![],
            blocked: vec![],
            success: true,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StateFile::new();
        for _ in 0..(MAX_HISTORY + 5) {
            state.add_history(entry());
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_touch_bumps_serial() {
        let mut state = StateFile::new();
        state.touch();
        state.touch();
        assert_eq!(state.serial, 2);
    }
}
