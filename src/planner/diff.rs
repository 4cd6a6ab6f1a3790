//! Property diffs between stored and desired inputs.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Text shown for values that only exist after apply.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// How a single property changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Property is new.
    Added,
    /// Property value differs.
    Modified,
    /// Property is no longer set.
    Removed,
}

/// Difference for a single top-level property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    /// Property name.
    pub field: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Stored value.
    pub old_value: Option<serde_json::Value>,
    /// Desired value, `None` when removed or deferred.
    pub new_value: Option<serde_json::Value>,
    /// Desired value depends on outputs not known until apply.
    pub deferred: bool,
}

/// Computes per-property changes from `old` to `new`.
///
/// Properties listed in `deferred` always count as changed, since their
/// final value is not known yet.
#[must_use]
pub fn diff_properties(
    old: &BTreeMap<String, serde_json::Value>,
    new: &BTreeMap<String, serde_json::Value>,
    deferred: &BTreeSet<String>,
) -> Vec<PropertyChange> {
    let fields: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let before = old.get(field);
            let after = new.get(field);
            let is_deferred = deferred.contains(field);

            let kind = match (before, after) {
                (None, None) => return None,
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(b), Some(a)) if b == a && !is_deferred => return None,
                (Some(_), Some(_)) => ChangeKind::Modified,
            };

            Some(PropertyChange {
                field: field.clone(),
                kind,
                old_value: before.cloned(),
                new_value: if is_deferred { None } else { after.cloned() },
                deferred: is_deferred,
            })
        })
        .collect()
}

impl std::fmt::Display for PropertyChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let new = match (&self.new_value, self.deferred) {
            (_, true) => KNOWN_AFTER_APPLY.to_string(),
            (Some(v), false) => v.to_string(),
            (None, false) => String::new(),
        };

        match self.kind {
            ChangeKind::Added => write!(f, "+ {}: {new}", self.field),
            ChangeKind::Removed => write!(f, "- {}", self.field),
            ChangeKind::Modified => {
                let old = self.old_value.as_ref().map(ToString::to_string).unwrap_or_default();
                write!(f, "~ {}: {old} -> {new}", self.field)
            }
        }
    }
}
