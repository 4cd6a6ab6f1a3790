//! Directed graph over resource identifiers.
//!
//! Edges point from a dependent to its dependency. Node indices follow
//! insertion order, which is used for deterministic tie-breaking.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::GraphError;
use crate::resource::ResourceId;

/// Insertion-ordered DAG of resource identifiers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dag {
    graph: DiGraph<ResourceId, ()>,
    index: HashMap<ResourceId, NodeIndex>,
}

impl Dag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning the existing index if already present.
    pub(crate) fn add_node(&mut self, id: ResourceId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id, idx);
        idx
    }

    /// Adds `dependent -> dependency` unless already present.
    pub(crate) fn add_edge(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        if self.graph.find_edge(dependent, dependency).is_none() {
            self.graph.add_edge(dependent, dependency, ());
        }
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &ResourceId {
        &self.graph[idx]
    }

    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of a node, in insertion order.
    pub(crate) fn dependencies(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(idx, Direction::Outgoing)
    }

    /// Direct dependents of a node, in insertion order.
    pub(crate) fn dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(idx, Direction::Incoming)
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// All nodes reachable through dependent edges, excluding `idx`.
    pub(crate) fn transitive_dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([idx]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(current) {
                if seen.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        let mut out: Vec<NodeIndex> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Dependencies-first order using Kahn's algorithm.
    ///
    /// Among ready nodes the earliest inserted goes first.
    pub(crate) fn toposort(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.dependencies(idx).len()))
            .collect();

        let mut ready: BTreeSet<NodeIndex> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| *idx)
            .collect();

        let mut order = Vec::with_capacity(self.node_count());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for dependent in self.dependents(idx) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.node_count() {
            return Err(GraphError::Cycle {
                cycle: self.find_cycle(),
            });
        }

        Ok(order)
    }

    /// Finds one cycle, returned with its first node repeated at the end.
    fn find_cycle(&self) -> Vec<String> {
        let component = tarjan_scc(&self.graph).into_iter().find(|scc| {
            scc.len() > 1 || scc.first().is_some_and(|&n| self.graph.contains_edge(n, n))
        });

        let Some(component) = component else {
            return Vec::new();
        };

        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let Some(&start) = component.iter().min() else {
            return Vec::new();
        };

        // Breadth-first walk inside the component until an edge closes back on `start`.
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;

        'walk: while let Some(current) = queue.pop_front() {
            for next in self.dependencies(current) {
                if next == start {
                    closing = Some(current);
                    break 'walk;
                }
                if members.contains(&next) && next != start && !parent.contains_key(&next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let Some(mut cursor) = closing else {
            return vec![self.node(start).to_string()];
        };

        let mut path = vec![cursor];
        while cursor != start {
            match parent.get(&cursor) {
                Some(&prev) => {
                    path.push(prev);
                    cursor = prev;
                }
                None => break,
            }
        }
        path.reverse();
        path.push(start);

        path.into_iter().map(|idx| self.node(idx).to_string()).collect()
    }
}
