use indexmap::IndexMap;

use crate::core::{Edge, NodeId};

/// What a plan or re-plan added to a graph.
///
/// `key_map` records which fresh id each candidate key received, so callers
/// can relate the model's output to the committed graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDiff {
    /// Ids of the nodes that were added, in candidate order.
    pub added_nodes: Vec<NodeId>,
    /// Edges that were added, with endpoints already resolved to graph ids.
    pub added_edges: Vec<Edge>,
    /// Candidate key -> assigned node id.
    pub key_map: IndexMap<NodeId, NodeId>,
}

impl PlanDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_changes(&self) -> bool {
        !self.added_nodes.is_empty() || !self.added_edges.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added_nodes.len() + self.added_edges.len()
    }

    /// Graph id assigned to a candidate key.
    pub fn resolve(&self, key: &str) -> Option<&NodeId> {
        self.key_map.get(key)
    }
}
