//! Goal -> validated task graph, with retries and re-planning.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::candidate::Candidate;
use super::prompt::{self, SYSTEM_PROMPT};
use super::{PlanDiff, PlanningError};
use crate::config::{Config, RetryPolicy, DEFAULT_MAX_TASKS};
use crate::core::{Node, NodeId, NodeStatus, SharedTaskGraph, TaskGraph, TaskGraphSnapshot};
use crate::error::{Error, Result};
use crate::gateway::{GatewayErrorKind, StructuredCompletion};
use crate::schema::{task_graph_schema, SchemaRules, ValidatedSchema};
use crate::util::sleep_cancellable;
use crate::{plog, plog_debug, plog_error, plog_warn};

/// Knobs for an [`Orchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerOptions {
    /// Task limit stated in the prompt. Larger answers are accepted with a warning.
    pub max_tasks: usize,
    pub retry: RetryPolicy,
    pub rules: SchemaRules,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            retry: RetryPolicy::default(),
            rules: SchemaRules::strict(),
        }
    }
}

impl PlannerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tasks: config.planner.max_tasks,
            retry: config.gateway.retry,
            rules: SchemaRules::strict(),
        }
    }
}

/// A graph produced by planning, and what was added to get there.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub graph: TaskGraph,
    pub diff: PlanDiff,
}

/// Drives a [`StructuredCompletion`] gateway to build and extend task graphs.
///
/// The task graph schema is derived and validated once, when the
/// orchestrator is built. Every response is re-checked against it and
/// applied as a whole or not at all.
pub struct Orchestrator<G> {
    gateway: G,
    schema: ValidatedSchema,
    options: PlannerOptions,
}

impl<G: StructuredCompletion> Orchestrator<G> {
    /// # Errors
    /// `Error::SchemaConfig` if the derived schema breaks `options.rules`.
    pub fn new(gateway: G, options: PlannerOptions) -> Result<Self> {
        let schema = task_graph_schema(&options.rules)?;
        Ok(Self {
            gateway,
            schema,
            options,
        })
    }

    /// Decompose `goal` into a fresh task graph.
    ///
    /// # Errors
    /// - `Error::Validation` for an empty goal
    /// - `Error::Cancelled` if `cancel` fires
    /// - `Error::Planning` for gateway failures and rejected candidates
    pub async fn plan(&self, goal: &str, cancel: &CancellationToken) -> Result<PlanOutcome> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(Error::Validation("goal must not be empty".to_string()));
        }
        plog!("Planning goal: {}", goal);

        let user_prompt = prompt::plan_prompt(goal, self.options.max_tasks);
        let raw = self.request(&user_prompt, cancel).await?;
        let candidate = Candidate::parse(raw, &self.schema, self.options.max_tasks)?;
        let (graph, diff) = candidate.apply_on(&TaskGraph::new())?;

        plog!(
            "Plan accepted: {} tasks, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(PlanOutcome { graph, diff })
    }

    /// Extend the graph in `snapshot` with work that addresses `failures`.
    ///
    /// Existing nodes, failed ones included, are kept. The returned graph is
    /// the union; the snapshot's own graph is never modified.
    pub async fn replan(
        &self,
        snapshot: TaskGraphSnapshot,
        failures: &[NodeId],
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome> {
        let base = TaskGraph::from_snapshot(snapshot)?;
        let candidate = self.request_delta(&base, failures, cancel).await?;
        let (graph, diff) = candidate.apply_on(&base)?;

        plog!(
            "Re-plan accepted: +{} tasks, +{} edges",
            diff.added_nodes.len(),
            diff.added_edges.len()
        );
        Ok(PlanOutcome { graph, diff })
    }

    /// Re-plan against a shared graph.
    ///
    /// The gateway runs without the writer lock. The delta is then applied to
    /// whatever version is current at commit time, so concurrent edits are
    /// kept and anchors that disappeared in the meantime reject the delta.
    pub async fn replan_shared(
        &self,
        shared: &SharedTaskGraph,
        failures: &[NodeId],
        cancel: &CancellationToken,
    ) -> Result<PlanDiff> {
        let base = shared.current();
        let candidate = self.request_delta(&base.graph, failures, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let diff = shared.mutate(|graph| {
            candidate
                .apply_to(graph)
                .map_err(|cause| Error::from(candidate.rejected(cause)))
        })?;
        plog!(
            "Re-plan committed on top of v{}: +{} tasks, +{} edges",
            base.version,
            diff.added_nodes.len(),
            diff.added_edges.len()
        );
        Ok(diff)
    }

    async fn request_delta(
        &self,
        base: &TaskGraph,
        failures: &[NodeId],
        cancel: &CancellationToken,
    ) -> Result<Candidate> {
        if failures.is_empty() {
            return Err(Error::Validation(
                "re-planning needs at least one failed task".to_string(),
            ));
        }
        let failed = failures
            .iter()
            .map(|id| base.node(id).ok_or_else(|| Error::UnknownNode(id.clone())))
            .collect::<Result<Vec<&Node>>>()?;
        for node in failed.iter().filter(|n| n.status != NodeStatus::Failed) {
            plog_warn!("Re-planning around {} which is {}, not failed", node.id, node.status);
        }

        let user_prompt = prompt::replan_prompt(&base.snapshot(), &failed, self.options.max_tasks)?;
        let raw = self.request(&user_prompt, cancel).await?;
        Ok(Candidate::parse(raw, &self.schema, self.options.max_tasks)?)
    }

    /// Call the gateway, retrying only while it reports itself unavailable.
    async fn request(&self, user_prompt: &str, cancel: &CancellationToken) -> Result<Value> {
        let attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            plog_debug!("Gateway call attempt {}/{}", attempt, attempts);

            let err = match self
                .gateway
                .complete(SYSTEM_PROMPT, user_prompt, &self.schema, cancel)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.kind == GatewayErrorKind::Cancelled {
                return Err(Error::Cancelled);
            }
            if err.is_retryable() && attempt < attempts {
                let delay = self.options.retry.backoff(attempt);
                plog_warn!(
                    "Gateway unavailable (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    attempts,
                    err.detail,
                    delay
                );
                sleep_cancellable(delay, cancel).await?;
                continue;
            }

            plog_error!("Gateway call failed after {} attempt(s): {}", attempt, err);
            let mut planning = PlanningError::new(format!("gateway call failed: {}", err));
            if let Some(raw) = &err.raw {
                planning = planning.with_candidate(Value::String(raw.clone()));
            }
            return Err(planning.with_cause(Error::Gateway(err)).into());
        }
    }
}
