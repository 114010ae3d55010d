//! Task graph: nodes, dependency edges, and the hard-edge DAG invariant.
//!
//! Nodes are stored in insertion order and edges as an ordered list, which is
//! exactly the snapshot wire form. Graph algorithms run on a petgraph view of
//! the hard-edge subgraph built on demand, where node `i` of the view is the
//! `i`-th inserted node.

use crate::core::node::{Node, NodeId, NodeStatus, Payload};
use crate::error::{Error, Result};
use crate::{plog_debug, plog_warn};
use indexmap::IndexMap;
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Kind of dependency between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    // Target cannot start until source is completed.
    Hard,
    // Advisory ordering only; never blocks and may form cycles.
    Soft,
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Hard
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Hard => write!(f, "hard"),
            DependencyType::Soft => write!(f, "soft"),
        }
    }
}

/// A dependency from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub dependency_type: DependencyType,
    /// Which outputs of `source` feed which inputs of `target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_transfer: Option<Payload>,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, dependency_type: DependencyType) -> Self {
        Self {
            source,
            target,
            dependency_type,
            data_transfer: None,
        }
    }

    pub fn is_hard(&self) -> bool {
        self.dependency_type == DependencyType::Hard
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// Serialized form of a [`TaskGraph`].
///
/// This is the wire format for persistence, UI transfer, and re-planning
/// context, and the shape the planning schema is derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(rename = "TaskGraph")]
pub struct TaskGraphSnapshot {
    #[serde(default)]
    pub nodes: IndexMap<NodeId, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl TaskGraphSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The task dependency graph.
///
/// Every mutation validates before it changes anything, so a failed call
/// leaves the graph exactly as it was.
#[derive(Clone, Default)]
pub struct TaskGraph {
    nodes: IndexMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a snapshot, re-running every mutation check.
    ///
    /// Node statuses and payloads are kept as-is; map keys must match the
    /// node ids they point to.
    pub fn from_snapshot(snapshot: TaskGraphSnapshot) -> Result<Self> {
        let mut graph = Self::new();
        for (key, node) in snapshot.nodes {
            if key != node.id {
                return Err(Error::Validation(format!(
                    "node key {} does not match node id {}",
                    key, node.id
                )));
            }
            graph.insert_node(node)?;
        }
        for edge in snapshot.edges {
            graph.insert_edge(edge)?;
        }
        Ok(graph)
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> TaskGraphSnapshot {
        TaskGraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    // ========== Mutations ==========

    /// Add a pending node and return its new identifier.
    ///
    /// # Errors
    /// `Error::Validation` if the description is empty or whitespace.
    pub fn add_node(
        &mut self,
        description: &str,
        inputs: Option<Payload>,
        outputs: Option<Payload>,
    ) -> Result<NodeId> {
        let mut node = Node::new(description);
        node.inputs = inputs;
        node.outputs = outputs;
        self.insert_node(node)
    }

    /// Insert a fully formed node, keeping its id and status.
    pub(crate) fn insert_node(&mut self, node: Node) -> Result<NodeId> {
        if node.description.trim().is_empty() {
            return Err(Error::Validation(
                "node description must not be empty".to_string(),
            ));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(Error::Validation(format!("duplicate node id {}", node.id)));
        }
        let id = node.id.clone();
        plog_debug!("TaskGraph::add_node id={} status={}", id.short(), node.status);
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Add a dependency edge.
    ///
    /// # Errors
    /// - `Error::UnknownNode` if either endpoint is missing (source checked first)
    /// - `Error::SelfLoop` if `source == target`, whatever the dependency type
    /// - `Error::Cycle` if a hard edge would close a cycle of hard edges
    /// - `Error::Validation` if the identical edge already exists
    pub fn add_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        dependency_type: DependencyType,
        data_transfer: Option<Payload>,
    ) -> Result<()> {
        self.insert_edge(Edge {
            source: source.clone(),
            target: target.clone(),
            dependency_type,
            data_transfer,
        })
    }

    pub(crate) fn insert_edge(&mut self, edge: Edge) -> Result<()> {
        let source_idx = self
            .nodes
            .get_index_of(&edge.source)
            .ok_or_else(|| Error::UnknownNode(edge.source.clone()))?;
        let target_idx = self
            .nodes
            .get_index_of(&edge.target)
            .ok_or_else(|| Error::UnknownNode(edge.target.clone()))?;

        if source_idx == target_idx {
            return Err(Error::SelfLoop(edge.source));
        }

        if self.edges.iter().any(|e| {
            e.source == edge.source
                && e.target == edge.target
                && e.dependency_type == edge.dependency_type
        }) {
            return Err(Error::Validation(format!(
                "{} edge from {} to {} already exists",
                edge.dependency_type, edge.source, edge.target
            )));
        }

        // Only the new edge can close a cycle: it does iff target already
        // reaches source over hard edges.
        if edge.is_hard() {
            let view = self.hard_view();
            if has_path_connecting(
                &view,
                NodeIndex::new(target_idx),
                NodeIndex::new(source_idx),
                None,
            ) {
                return Err(Error::Cycle {
                    from: edge.source,
                    to: edge.target,
                });
            }
        }

        plog_debug!(
            "TaskGraph::add_edge {} -> {} ({})",
            edge.source.short(),
            edge.target.short(),
            edge.dependency_type
        );
        self.edges.push(edge);
        Ok(())
    }

    /// Move a node along its normal lifecycle.
    ///
    /// Setting the status a node already has is a no-op, so repeating
    /// `completed` on a completed node succeeds without change.
    ///
    /// # Errors
    /// - `Error::UnknownNode` if `id` is missing
    /// - `Error::InvalidTransition` for moves outside the lifecycle
    pub fn update_status(&mut self, id: &NodeId, new_status: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;

        if node.status == new_status {
            return Ok(());
        }
        if !node.status.can_transition_to(new_status) {
            return Err(Error::InvalidTransition {
                id: id.clone(),
                from: node.status,
                to: new_status,
            });
        }
        plog_debug!(
            "TaskGraph::update_status {} {} -> {}",
            id.short(),
            node.status,
            new_status
        );
        node.status = new_status;
        Ok(())
    }

    /// Administrative override: set any status, including out of `completed`.
    ///
    /// Used while re-planning. Logged at WARN with the given reason; resetting
    /// to the current status is a no-op and logs nothing.
    pub fn reset_status(&mut self, id: &NodeId, new_status: NodeStatus, reason: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;
        if node.status == new_status {
            return Ok(());
        }
        plog_warn!(
            "Administrative status override on {}: {} -> {} ({})",
            id,
            node.status,
            new_status,
            reason
        );
        node.status = new_status;
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Node> {
        let node = self
            .nodes
            .shift_remove(id)
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;
        let before = self.edges.len();
        self.edges.retain(|e| !e.touches(id));
        plog_debug!(
            "TaskGraph::remove_node {} (dropped {} edges)",
            id.short(),
            before - self.edges.len()
        );
        Ok(node)
    }

    // ========== Queries ==========

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Sources of all edges (hard or soft) pointing at `id`.
    pub fn predecessors(&self, id: &NodeId) -> Result<Vec<&NodeId>> {
        self.require(id)?;
        let mut out: Vec<&NodeId> = Vec::new();
        for edge in self.edges.iter().filter(|e| &e.target == id) {
            if !out.contains(&&edge.source) {
                out.push(&edge.source);
            }
        }
        Ok(out)
    }

    /// Targets of all edges (hard or soft) leaving `id`.
    pub fn successors(&self, id: &NodeId) -> Result<Vec<&NodeId>> {
        self.require(id)?;
        let mut out: Vec<&NodeId> = Vec::new();
        for edge in self.edges.iter().filter(|e| &e.source == id) {
            if !out.contains(&&edge.target) {
                out.push(&edge.target);
            }
        }
        Ok(out)
    }

    /// Nodes with no incoming edge of any kind.
    pub fn root_nodes(&self) -> Vec<&NodeId> {
        self.nodes
            .keys()
            .filter(|id| !self.edges.iter().any(|e| &e.target == *id))
            .collect()
    }

    /// Nodes with no outgoing edge of any kind.
    pub fn leaf_nodes(&self) -> Vec<&NodeId> {
        self.nodes
            .keys()
            .filter(|id| !self.edges.iter().any(|e| &e.source == *id))
            .collect()
    }

    /// Pending nodes whose hard predecessors are all completed.
    ///
    /// Soft edges never block.
    pub fn ready_nodes(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| {
                self.edges
                    .iter()
                    .filter(|e| e.is_hard() && e.target == node.id)
                    .all(|e| {
                        self.nodes
                            .get(&e.source)
                            .map(|src| src.status == NodeStatus::Completed)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    /// Whether the hard-edge subgraph is acyclic. Always true for graphs
    /// built through this API.
    pub fn is_hard_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.hard_view())
    }

    /// Node ids ordered so every hard dependency comes before its dependents.
    ///
    /// Among nodes that are free at the same time, the earlier-inserted one
    /// comes first.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        Ok(self
            .topo_indices()?
            .into_iter()
            .filter_map(|i| self.nodes.get_index(i).map(|(id, _)| id.clone()))
            .collect())
    }

    /// Heaviest chain of hard dependencies.
    ///
    /// Each node weighs its `cost` payload entry (see [`Node::weight`]), which
    /// reduces to node count when no costs are set. Ties go to the
    /// earliest-inserted node, first for the chain's start and then at every
    /// step along it.
    pub fn critical_path(&self) -> Vec<NodeId> {
        let order = match self.topo_indices() {
            Ok(order) => order,
            Err(_) => return Vec::new(),
        };
        let view = self.hard_view();
        let n = self.nodes.len();
        let mut best = vec![0.0f64; n];
        let mut next: Vec<Option<usize>> = vec![None; n];

        for &i in order.iter().rev() {
            let mut succ: Vec<usize> = view
                .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                .map(|ix| ix.index())
                .collect();
            succ.sort_unstable();
            succ.dedup();

            let mut tail = 0.0;
            for j in succ {
                if next[i].is_none() || best[j] > tail {
                    tail = best[j];
                    next[i] = Some(j);
                }
            }
            best[i] = self.nodes[i].weight() + tail;
        }

        let mut start: Option<usize> = None;
        for i in 0..n {
            if start.map_or(true, |s| best[i] > best[s]) {
                start = Some(i);
            }
        }

        let mut path = Vec::new();
        let mut cursor = start;
        while let Some(i) = cursor {
            path.push(self.nodes[i].id.clone());
            cursor = next[i];
        }
        path
    }

    // ========== Internals ==========

    fn require(&self, id: &NodeId) -> Result<()> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(Error::UnknownNode(id.clone()))
        }
    }

    /// Hard-edge subgraph, indexed by insertion position.
    fn hard_view(&self) -> DiGraph<(), ()> {
        let mut view = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        for _ in 0..self.nodes.len() {
            view.add_node(());
        }
        for edge in self.edges.iter().filter(|e| e.is_hard()) {
            if let (Some(s), Some(t)) = (
                self.nodes.get_index_of(&edge.source),
                self.nodes.get_index_of(&edge.target),
            ) {
                view.add_edge(NodeIndex::new(s), NodeIndex::new(t), ());
            }
        }
        view
    }

    /// Kahn's algorithm with a min-heap so ties resolve by insertion order.
    fn topo_indices(&self) -> Result<Vec<usize>> {
        let view = self.hard_view();
        let n = self.nodes.len();
        let mut indegree: Vec<usize> = (0..n)
            .map(|i| {
                view.neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for succ in view.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
                let j = succ.index();
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if order.len() != n {
            return Err(Error::Validation(
                "hard dependencies contain a cycle".to_string(),
            ));
        }
        Ok(order)
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
