//! Checking model output and applying it to a graph.

use serde_json::Value;

use super::{PlanDiff, PlanningError};
use crate::core::{Edge, NodeId, NodeStatus, TaskGraph, TaskGraphSnapshot};
use crate::error::{Error, Result};
use crate::plog_warn;
use crate::schema::ValidatedSchema;

/// A model response that passed local schema and shape checks.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub raw: Value,
    pub snapshot: TaskGraphSnapshot,
}

impl Candidate {
    /// Re-validate `raw` against `schema` and deserialize it.
    pub fn parse(
        raw: Value,
        schema: &ValidatedSchema,
        max_tasks: usize,
    ) -> std::result::Result<Self, PlanningError> {
        if let Err(violations) = schema.check_instance(&raw) {
            return Err(PlanningError::new(format!(
                "response does not match schema: {}",
                violations.join("; ")
            ))
            .with_candidate(raw));
        }

        let snapshot: TaskGraphSnapshot = match serde_json::from_value(raw.clone()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Err(PlanningError::new("response is not a task graph")
                    .with_candidate(raw)
                    .with_cause(e.into()))
            }
        };

        if snapshot.nodes.is_empty() {
            return Err(PlanningError::new("response contains no tasks").with_candidate(raw));
        }
        for (key, node) in &snapshot.nodes {
            if key != &node.id {
                return Err(PlanningError::new(format!(
                    "node key {} does not match its id {}",
                    key, node.id
                ))
                .with_candidate(raw));
            }
            if node.status != NodeStatus::Pending {
                return Err(PlanningError::new(format!(
                    "new task {} must be pending, got {}",
                    key, node.status
                ))
                .with_candidate(raw));
            }
        }
        if snapshot.nodes.len() > max_tasks {
            plog_warn!(
                "Model returned {} tasks, more than the requested {}",
                snapshot.nodes.len(),
                max_tasks
            );
        }

        Ok(Self { raw, snapshot })
    }

    /// Apply to `graph` through the regular mutation checks.
    ///
    /// Each candidate key gets a fresh id. Edge endpoints resolve to candidate
    /// keys first, then to ids already in `graph`. On error `graph` is left
    /// partially modified; callers apply to a copy they can throw away.
    pub fn apply_to(&self, graph: &mut TaskGraph) -> Result<PlanDiff> {
        let mut diff = PlanDiff::new();

        for (key, node) in &self.snapshot.nodes {
            if graph.contains(key) {
                return Err(Error::Validation(format!(
                    "new task key {} collides with an existing node",
                    key
                )));
            }
            let id = graph.add_node(&node.description, node.inputs.clone(), node.outputs.clone())?;
            diff.key_map.insert(key.clone(), id.clone());
            diff.added_nodes.push(id);
        }

        for edge in &self.snapshot.edges {
            let source = resolve(&diff, graph, &edge.source)?;
            let target = resolve(&diff, graph, &edge.target)?;
            graph.add_edge(
                &source,
                &target,
                edge.dependency_type,
                edge.data_transfer.clone(),
            )?;
            diff.added_edges.push(Edge {
                source,
                target,
                dependency_type: edge.dependency_type,
                data_transfer: edge.data_transfer.clone(),
            });
        }

        Ok(diff)
    }

    /// Apply to a copy of `base`; `base` is never touched.
    pub fn apply_on(&self, base: &TaskGraph) -> std::result::Result<(TaskGraph, PlanDiff), PlanningError> {
        let mut graph = base.clone();
        match self.apply_to(&mut graph) {
            Ok(diff) => Ok((graph, diff)),
            Err(cause) => Err(self.rejected(cause)),
        }
    }

    /// Wrap a failure to apply this candidate.
    pub fn rejected(&self, cause: Error) -> PlanningError {
        PlanningError::new(format!("candidate rejected: {}", cause))
            .with_candidate(self.raw.clone())
            .with_cause(cause)
    }
}

fn resolve(diff: &PlanDiff, graph: &TaskGraph, key: &NodeId) -> Result<NodeId> {
    if let Some(id) = diff.key_map.get(key) {
        return Ok(id.clone());
    }
    if graph.contains(key) {
        return Ok(key.clone());
    }
    Err(Error::UnknownNode(key.clone()))
}
