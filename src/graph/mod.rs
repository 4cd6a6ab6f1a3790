//! Dependency graph construction.
//!
//! [`DependencyGraph::build`] turns a materialized resource set into a DAG
//! where an edge `A -> B` means `B` must be applied before `A`. Edges come
//! from explicit `depends_on` declarations and from references embedded in
//! property values.

mod dag;

use std::collections::{HashMap, HashSet};

use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::error::GraphError;
use crate::resource::{Resource, ResourceId};

pub(crate) use dag::Dag;

/// Validated, acyclic dependency graph of declared resources.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    dag: Dag,
    resources: HashMap<ResourceId, Resource>,
    order: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph and checks it is acyclic.
    ///
    /// References to resources that are not declared add no edge; the
    /// planner reports them as unresolvable.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateResource`] for repeated names,
    /// [`GraphError::UnknownDependency`] for explicit dependencies on
    /// undeclared resources, and [`GraphError::Cycle`] if the graph is cyclic.
    pub fn build(resources: Vec<Resource>) -> Result<Self, GraphError> {
        let mut dag = Dag::new();
        let mut seen = HashSet::with_capacity(resources.len());

        for resource in &resources {
            if !seen.insert(resource.id.clone()) {
                return Err(GraphError::DuplicateResource {
                    name: resource.id.to_string(),
                });
            }
            dag.add_node(resource.id.clone());
        }

        for resource in &resources {
            let Some(from) = dag.index_of(resource.id.as_str()) else {
                continue;
            };

            for dependency in &resource.depends_on {
                let to = dag.index_of(dependency.as_str()).ok_or_else(|| {
                    GraphError::UnknownDependency {
                        resource: resource.id.to_string(),
                        dependency: dependency.to_string(),
                    }
                })?;
                dag.add_edge(from, to);
            }

            for (property, reference) in resource.references() {
                if let Some(to) = dag.index_of(reference.resource.as_str()) {
                    dag.add_edge(from, to);
                } else {
                    debug!(
                        "Reference {}.{property} -> {reference} targets an undeclared resource",
                        resource.id
                    );
                }
            }
        }

        let order = dag.toposort()?;
        debug!("Built dependency graph with {} resources", order.len());

        let resources = resources
            .into_iter()
            .map(|resource| (resource.id.clone(), resource))
            .collect();

        Ok(Self {
            dag,
            resources,
            order,
        })
    }

    /// Resources in application order (dependencies first).
    #[must_use]
    pub fn topological_order(&self) -> Vec<&ResourceId> {
        self.order.iter().map(|&idx| self.dag.node(idx)).collect()
    }

    /// Resources in application order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.order
            .iter()
            .filter_map(|&idx| self.resources.get(self.dag.node(idx)))
    }

    /// Looks up a declared resource.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Returns true if `id` is declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Direct dependencies of `id`.
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Vec<&ResourceId> {
        self.neighbors(id, Dag::dependencies)
    }

    /// Direct dependents of `id`.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&ResourceId> {
        self.neighbors(id, Dag::dependents)
    }

    /// Every resource that depends on `id`, directly or indirectly.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<&ResourceId> {
        self.neighbors(id, Dag::transitive_dependents)
    }

    fn neighbors(&self, id: &str, select: fn(&Dag, NodeIndex) -> Vec<NodeIndex>) -> Vec<&ResourceId> {
        self.dag
            .index_of(id)
            .map(|idx| select(&self.dag, idx).into_iter().map(|n| self.dag.node(n)).collect())
            .unwrap_or_default()
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Reference;

    fn ids(list: Vec<&ResourceId>) -> Vec<String> {
        list.into_iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_implicit_reference_edges() {
        let graph = DependencyGraph::build(vec![
            Resource::new("svc", "service").with_property("network", Reference::new("net", "id")),
            Resource::new("net", "network"),
        ])
        .unwrap();

        assert_eq!(ids(graph.topological_order()), vec!["net", "svc"]);
        assert_eq!(ids(graph.dependencies("svc")), vec!["net"]);
        assert_eq!(ids(graph.dependents("net")), vec!["svc"]);
    }

    #[test]
    fn test_cycle_through_references() {
        let err = DependencyGraph::build(vec![
            Resource::new("a", "null").with_property("x", Reference::new("b", "id")),
            Resource::new("b", "null").depends_on("a"),
        ])
        .unwrap_err();

        match err {
            GraphError::Cycle { cycle } => {
                assert!(cycle.contains(&String::from("a")));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_explicit_dependency() {
        let err = DependencyGraph::build(vec![Resource::new("svc", "service").depends_on("ghost")])
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_reference_to_undeclared_adds_no_edge() {
        let graph = DependencyGraph::build(vec![
            Resource::new("svc", "service").with_property("network", Reference::new("ghost", "id")),
        ])
        .unwrap();
        assert!(graph.dependencies("svc").is_empty());
    }

    #[test]
    fn test_duplicate_names() {
        let err = DependencyGraph::build(vec![Resource::new("a", "null"), Resource::new("a", "null")])
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateResource { .. }));
    }

    #[test]
    fn test_diamond_order_is_topological() {
        let graph = DependencyGraph::build(vec![
            Resource::new("top", "null").depends_on("left").depends_on("right"),
            Resource::new("left", "null").depends_on("base"),
            Resource::new("right", "null").depends_on("base"),
            Resource::new("base", "null"),
        ])
        .unwrap();

        let order = ids(graph.topological_order());
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("top"));
        assert!(pos("right") < pos("top"));
        assert_eq!(ids(graph.transitive_dependents("base")), vec!["top", "left", "right"]);
    }
}
