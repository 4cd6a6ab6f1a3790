//! Plan types.
//!
//! A [`Plan`] is the ordered list of [`PlanEntry`] values the executor
//! consumes. Deletes come first, dependents before their dependencies,
//! followed by every declared resource in dependency order.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resource::{Resource, ResourceId};
use crate::state::AppliedRecord;

use super::diff::PropertyChange;

/// Action planned for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Resource has no record.
    Create,
    /// Inputs differ from the record.
    Update,
    /// Record exists but the resource is no longer declared.
    Delete,
    /// Inputs match the record.
    NoOp,
}

/// One resource paired with its action.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    /// Resource name.
    pub id: ResourceId,
    /// Type tag.
    pub resource_type: String,
    /// Planned action.
    pub action: Action,
    /// Why this action was chosen.
    pub reason: String,
    /// Inputs hash computed at plan time, absent for deletes.
    pub planned_hash: Option<String>,
    /// Hash stored in the record, if any.
    pub prior_hash: Option<String>,
    /// Property-level changes.
    pub changes: Vec<PropertyChange>,
    /// Resources this entry must wait for.
    pub dependencies: Vec<ResourceId>,
    /// Declaration, absent for deletes.
    #[serde(skip)]
    pub resource: Option<Resource>,
    /// Stored record, absent for creates.
    #[serde(skip)]
    pub prior: Option<AppliedRecord>,
}

/// A complete reconciliation plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Entries in execution order.
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    /// Creates a plan from ordered entries.
    #[must_use]
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self {
            created_at: Utc::now(),
            entries,
        }
    }

    /// Returns true if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Looks up the entry for a resource.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.id.as_str() == id)
    }

    /// Number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Number of entries that change something.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.entries.iter().filter(|e| e.action != Action::NoOp).count()
    }

    /// Returns true if applying would call a provider or rewrite a record.
    ///
    /// Unchanged entries whose dependency list moved still need their
    /// record refreshed.
    #[must_use]
    pub fn needs_apply(&self) -> bool {
        self.entries.iter().any(|e| {
            e.action != Action::NoOp
                || e
                    .prior
                    .as_ref()
                    .is_some_and(|prior| prior.dependencies != e.dependencies)
        })
    }

    /// Entries that change something.
    #[must_use]
    pub fn actionable(&self) -> Vec<&PlanEntry> {
        self.entries.iter().filter(|e| e.action != Action::NoOp).collect()
    }
}

impl PlanEntry {
    /// Returns a human-readable description of the entry.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {} '{}'", self.resource_type, self.id),
            Action::Update => format!("Update {} '{}'", self.resource_type, self.id),
            Action::Delete => format!("Delete {} '{}'", self.resource_type, self.id),
            Action::NoOp => format!("No change for '{}'", self.id),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} changes):", self.change_count())?;
        for (i, entry) in self.actionable().into_iter().enumerate() {
            writeln!(f, "  {}. {entry}", i + 1)?;
            for change in &entry.changes {
                writeln!(f, "       {change}")?;
            }
        }

        Ok(())
    }
}
