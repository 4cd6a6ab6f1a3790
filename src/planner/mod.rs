//! Planning and execution.
//!
//! The [`Planner`] compares the declared resources against the applied
//! state records and produces a [`Plan`]; the [`PlanExecutor`] carries a
//! plan out against the registered providers.

mod diff;
mod executor;
mod hash;
mod plan;
mod report;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::{PlanError, Result};
use crate::graph::{Dag, DependencyGraph};
use crate::resource::{Reference, Resource};
use crate::state::Records;

pub use diff::{ChangeKind, KNOWN_AFTER_APPLY, PropertyChange, diff_properties};
pub use executor::{ExecutorOptions, PlanExecutor};
pub use hash::InputHasher;
pub use plan::{Action, Plan, PlanEntry};
pub use report::{ApplyReport, NodeOutcome, NodeStatus};

/// Computes plans from declarations and stored records.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner {
    hasher: InputHasher,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: InputHasher::new(),
        }
    }

    /// Plans the changes needed to reconcile `records` with `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnresolvableReference`] when a reference can
    /// never be computed, or a graph error if the stored dependencies of
    /// records being deleted are cyclic.
    pub fn plan(&self, graph: &DependencyGraph, records: &Records) -> Result<Plan> {
        let mut entries = Self::delete_entries(records, |id| !graph.contains(id))?;
        let mut actions: HashMap<&str, Action> = HashMap::with_capacity(graph.len());

        for resource in graph.resources() {
            check_references(resource, graph, records, &actions)?;

            let lookup = |reference: &Reference| match actions.get(reference.resource.as_str()) {
                Some(Action::NoOp) => records
                    .get(reference.resource.as_str())
                    .and_then(|record| reference.resolve(&record.outputs)),
                _ => None,
            };

            let mut properties = BTreeMap::new();
            let mut deferred = BTreeSet::new();
            for (name, value) in &resource.properties {
                let substituted = value.substitute(&lookup);
                if !substituted.deferred.is_empty() {
                    deferred.insert(name.clone());
                }
                properties.insert(name.clone(), substituted.value);
            }

            let planned_hash = self.hasher.hash(&resource.resource_type, &properties);
            let prior = records.get(resource.id.as_str());

            let (action, reason) = match prior {
                None => (Action::Create, String::from("not yet applied")),
                Some(record) if InputHasher::hashes_match(&record.inputs_hash, &planned_hash) => {
                    (Action::NoOp, String::new())
                }
                Some(record) if record.resource_type != resource.resource_type => (
                    Action::Update,
                    format!("type changed from {}", record.resource_type),
                ),
                Some(_) if !deferred.is_empty() => (
                    Action::Update,
                    String::from("inputs depend on values known after apply"),
                ),
                Some(_) => (Action::Update, String::from("inputs changed")),
            };

            let changes = match (action, prior) {
                (Action::NoOp, _) => Vec::new(),
                (_, Some(record)) => diff_properties(&record.inputs, &properties, &deferred),
                (_, None) => diff_properties(&BTreeMap::new(), &properties, &deferred),
            };

            debug!("Planned {action} for {}", resource.id);
            actions.insert(resource.id.as_str(), action);

            entries.push(PlanEntry {
                id: resource.id.clone(),
                resource_type: resource.resource_type.clone(),
                action,
                reason,
                planned_hash: Some(planned_hash),
                prior_hash: prior.map(|r| r.inputs_hash.clone()),
                changes,
                dependencies: graph.dependencies(resource.id.as_str()).into_iter().cloned().collect(),
                resource: Some(resource.clone()),
                prior: prior.cloned(),
            });
        }

        Ok(Plan::new(entries))
    }

    /// Plans the deletion of every record.
    ///
    /// # Errors
    ///
    /// Returns a graph error if the stored dependencies are cyclic.
    pub fn plan_destroy(&self, records: &Records) -> Result<Plan> {
        Ok(Plan::new(Self::delete_entries(records, |_| true)?))
    }

    /// Delete entries for the records selected by `doomed`, dependents first.
    fn delete_entries<F>(records: &Records, doomed: F) -> Result<Vec<PlanEntry>>
    where
        F: Fn(&str) -> bool,
    {
        let mut dag = Dag::new();
        for id in records.keys() {
            dag.add_node(id.clone());
        }
        for (id, record) in records {
            let Some(from) = dag.index_of(id.as_str()) else {
                continue;
            };
            for dependency in &record.dependencies {
                if let Some(to) = dag.index_of(dependency.as_str()) {
                    dag.add_edge(from, to);
                }
            }
        }

        let order = dag.toposort()?;

        let entries = order
            .into_iter()
            .rev()
            .map(|idx| dag.node(idx))
            .filter(|id| doomed(id.as_str()))
            .filter_map(|id| records.get(id.as_str()).map(|record| (id, record)))
            .map(|(id, record)| {
                debug!("Planned delete for {id}");
                PlanEntry {
                    id: id.clone(),
                    resource_type: record.resource_type.clone(),
                    action: Action::Delete,
                    reason: String::from("no longer declared"),
                    planned_hash: None,
                    prior_hash: Some(record.inputs_hash.clone()),
                    changes: diff_properties(&record.inputs, &BTreeMap::new(), &BTreeSet::new()),
                    dependencies: record.dependencies.clone(),
                    resource: None,
                    prior: Some(record.clone()),
                }
            })
            .collect();

        Ok(entries)
    }
}

/// Fails if any reference of `resource` can never be computed.
fn check_references(
    resource: &Resource,
    graph: &DependencyGraph,
    records: &Records,
    actions: &HashMap<&str, Action>,
) -> std::result::Result<(), PlanError> {
    for (property, reference) in resource.references() {
        let target = reference.resource.as_str();

        let reason = if !graph.contains(target) {
            if records.contains_key(target) {
                Some("target is scheduled for deletion")
            } else {
                Some("target is not declared")
            }
        } else if actions.get(target) == Some(&Action::NoOp)
            && records
                .get(target)
                .and_then(|record| reference.resolve(&record.outputs))
                .is_none()
        {
            Some("attribute is missing from the unchanged target's outputs")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(PlanError::UnresolvableReference {
                resource: resource.id.to_string(),
                property,
                target: reference.to_string(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

/// Resolves a reference against stored records.
///
/// Used for stack outputs and drift checks, where every target is expected
/// to be applied already.
#[must_use]
pub fn resolve_from_records(reference: &Reference, records: &Records) -> Option<serde_json::Value> {
    records
        .get(reference.resource.as_str())
        .and_then(|record| reference.resolve(&record.outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeelError;
    use crate::resource::{Outputs, ResourceId};
    use crate::state::AppliedRecord;
    use serde_json::json;

    fn net() -> Resource {
        Resource::new("net", "network").with_property("cidr", "10.0.0.0/16")
    }

    fn svc() -> Resource {
        Resource::new("svc", "service")
            .with_property("network", Reference::new("net", "id"))
            .with_property("image", "api:v1")
    }

    fn record(
        resource_type: &str,
        inputs: serde_json::Value,
        outputs: serde_json::Value,
        deps: &[&str],
    ) -> AppliedRecord {
        let inputs: BTreeMap<String, serde_json::Value> = serde_json::from_value(inputs).unwrap();
        let outputs: Outputs = serde_json::from_value(outputs).unwrap();
        let hash = InputHasher::new().hash(resource_type, &inputs);
        AppliedRecord::new(
            resource_type,
            hash,
            inputs,
            outputs,
            deps.iter().map(|d| ResourceId::from(*d)).collect(),
        )
    }

    fn applied() -> Records {
        Records::from([
            (
                ResourceId::from("net"),
                record("network", json!({"cidr": "10.0.0.0/16"}), json!({"id": "net-1"}), &[]),
            ),
            (
                ResourceId::from("svc"),
                record(
                    "service",
                    json!({"network": "net-1", "image": "api:v1"}),
                    json!({"id": "svc-1"}),
                    &["net"],
                ),
            ),
        ])
    }

    fn actions(plan: &Plan) -> Vec<(String, Action)> {
        plan.entries.iter().map(|e| (e.id.to_string(), e.action)).collect()
    }

    #[test]
    fn test_fresh_state_creates_everything() {
        let graph = DependencyGraph::build(vec![svc(), net()]).unwrap();
        let plan = Planner::new().plan(&graph, &Records::new()).unwrap();

        assert_eq!(
            actions(&plan),
            vec![
                (String::from("net"), Action::Create),
                (String::from("svc"), Action::Create)
            ]
        );

        let svc_entry = plan.entry("svc").unwrap();
        let network = svc_entry.changes.iter().find(|c| c.field == "network").unwrap();
        assert!(network.deferred);
        assert_eq!(plan.count(Action::Create), 2);
    }

    #[test]
    fn test_unchanged_inputs_are_noop() {
        let graph = DependencyGraph::build(vec![net(), svc()]).unwrap();
        let plan = Planner::new().plan(&graph, &applied()).unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.count(Action::NoOp), 2);
    }

    #[test]
    fn test_changed_property_is_update() {
        let graph = DependencyGraph::build(vec![
            net(),
            Resource::new("svc", "service")
                .with_property("network", Reference::new("net", "id"))
                .with_property("image", "api:v2"),
        ])
        .unwrap();
        let plan = Planner::new().plan(&graph, &applied()).unwrap();

        let entry = plan.entry("svc").unwrap();
        assert_eq!(entry.action, Action::Update);
        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].to_string(), "~ image: \"api:v1\" -> \"api:v2\"");
        assert_eq!(plan.entry("net").unwrap().action, Action::NoOp);
    }

    #[test]
    fn test_dependent_of_update_is_deferred_update() {
        let graph = DependencyGraph::build(vec![
            Resource::new("net", "network").with_property("cidr", "10.1.0.0/16"),
            svc(),
        ])
        .unwrap();
        let plan = Planner::new().plan(&graph, &applied()).unwrap();

        assert_eq!(plan.entry("net").unwrap().action, Action::Update);
        let entry = plan.entry("svc").unwrap();
        assert_eq!(entry.action, Action::Update);
        assert_eq!(entry.reason, "inputs depend on values known after apply");
    }

    #[test]
    fn test_type_change_is_update() {
        let graph = DependencyGraph::build(vec![
            Resource::new("net", "vpc").with_property("cidr", "10.0.0.0/16"),
            svc(),
        ])
        .unwrap();
        let plan = Planner::new().plan(&graph, &applied()).unwrap();
        assert_eq!(plan.entry("net").unwrap().action, Action::Update);
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let graph = DependencyGraph::build(vec![net()]).unwrap();
        let plan = Planner::new().plan(&graph, &applied()).unwrap();

        assert_eq!(
            actions(&plan),
            vec![
                (String::from("svc"), Action::Delete),
                (String::from("net"), Action::NoOp)
            ]
        );
    }

    #[test]
    fn test_destroy_orders_dependents_first() {
        let mut records = applied();
        records.insert(
            ResourceId::from("dns"),
            record("dns", json!({}), json!({}), &["svc"]),
        );

        let plan = Planner::new().plan_destroy(&records).unwrap();
        let order: Vec<String> = plan.entries.iter().map(|e| e.id.to_string()).collect();

        assert_eq!(order, vec!["dns", "svc", "net"]);
        assert!(plan.entries.iter().all(|e| e.action == Action::Delete));
    }

    #[test]
    fn test_reference_to_deleted_resource() {
        let graph = DependencyGraph::build(vec![svc()]).unwrap();
        let err = Planner::new().plan(&graph, &applied()).unwrap_err();

        match err {
            KeelError::Plan(PlanError::UnresolvableReference { resource, target, reason, .. }) => {
                assert_eq!(resource, "svc");
                assert_eq!(target, "net.id");
                assert_eq!(reason, "target is scheduled for deletion");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reference_to_undeclared_resource() {
        let graph = DependencyGraph::build(vec![svc()]).unwrap();
        let err = Planner::new().plan(&graph, &Records::new()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_attribute_on_noop_target() {
        let graph = DependencyGraph::build(vec![
            net(),
            Resource::new("svc", "service").with_property("network", Reference::new("net", "arn")),
        ])
        .unwrap();
        let err = Planner::new().plan(&graph, &applied()).unwrap_err();
        assert!(matches!(err, KeelError::Plan(PlanError::UnresolvableReference { .. })));
    }

    #[test]
    fn test_resolve_from_records() {
        let value = resolve_from_records(&Reference::new("net", "id"), &applied());
        assert_eq!(value, Some(json!("net-1")));
    }
}
