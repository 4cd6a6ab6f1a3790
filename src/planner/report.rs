//! Execution reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ProviderErrorKind;
use crate::resource::ResourceId;

use super::plan::Action;

/// Terminal status of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Provider call succeeded and state was committed.
    Applied,
    /// Provider call or commit failed.
    Failed,
    /// Skipped because a dependency did not succeed.
    Blocked,
    /// Nothing to do.
    Unchanged,
    /// Run was cancelled before the node started.
    Cancelled,
}

/// What happened to one plan entry.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    /// Resource name.
    pub id: ResourceId,
    /// Type tag.
    pub resource_type: String,
    /// Planned action.
    pub action: Action,
    /// Terminal status.
    pub status: NodeStatus,
    /// Failure cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider failure classification; `None` for non-provider failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProviderErrorKind>,
    /// Dependency whose failure blocked this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<ResourceId>,
    /// Wall time spent on the node, including waits.
    pub duration_ms: u64,
}

/// Summary of an executor run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// One outcome per plan entry, in plan order.
    pub outcomes: Vec<NodeOutcome>,
}

impl ApplyReport {
    /// Outcomes with the given status.
    #[must_use]
    pub fn with_status(&self, status: NodeStatus) -> Vec<&NodeOutcome> {
        self.outcomes.iter().filter(|o| o.status == status).collect()
    }

    /// Number of outcomes with the given status.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Looks up the outcome for a resource.
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.id.as_str() == id)
    }

    /// Ids of outcomes with the given status.
    #[must_use]
    pub fn ids(&self, status: NodeStatus) -> Vec<String> {
        self.with_status(status)
            .into_iter()
            .map(|o| o.id.to_string())
            .collect()
    }

    /// Returns true if every node applied or was unchanged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, NodeStatus::Applied | NodeStatus::Unchanged))
    }

    /// Returns true if the run failed only because of transient errors.
    ///
    /// Such a run is worth repeating unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        let failed = self.with_status(NodeStatus::Failed);
        !failed.is_empty()
            && failed
                .iter()
                .all(|o| o.error_kind == Some(ProviderErrorKind::Transient))
            && self.count(NodeStatus::Cancelled) == 0
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Unchanged => "unchanged",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} failed, {} blocked, {} unchanged, {} cancelled",
            self.count(NodeStatus::Applied),
            self.count(NodeStatus::Failed),
            self.count(NodeStatus::Blocked),
            self.count(NodeStatus::Unchanged),
            self.count(NodeStatus::Cancelled),
        )
    }
}
