//! End-to-end planning tests.
//!
//! A scripted gateway stands in for the model; everything else (schema,
//! candidate checks, graph mutation, shared commits) is the real thing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use plangraph::core::{DependencyType, NodeStatus, SharedTaskGraph, TaskGraph};
use plangraph::gateway::{GatewayError, GatewayErrorKind, ScriptedGateway, StructuredCompletion};
use plangraph::schema::ValidatedSchema;
use plangraph::{Error, Orchestrator, PlanningError};

use crate::fixtures::{cake_plan, fail_node, quick_options, scripted};

fn planning_error(err: Error) -> PlanningError {
    match err {
        Error::Planning(p) => p,
        other => panic!("expected Planning error, got {:?}", other),
    }
}

/// Test: Bake a cake
/// Given a model that answers with a four-task plan
/// When the goal is planned
/// Then every task is pending, dependencies hold, and the critical path
/// follows the costliest chain
#[tokio::test]
async fn test_bake_a_cake() {
    let (orchestrator, gateway) = scripted(ScriptedGateway::new().reply(cake_plan()));

    let outcome = orchestrator
        .plan("Bake a cake", &CancellationToken::new())
        .await
        .unwrap();
    let graph = &outcome.graph;
    let id = |key: &str| outcome.diff.resolve(key).unwrap().clone();

    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 4);
    assert!(graph.nodes().all(|n| n.status == NodeStatus::Pending));
    assert!(graph.is_hard_acyclic());

    // Keys are replaced by fresh ids.
    assert!(graph.nodes().all(|n| n.id.as_str().len() == 36));
    assert_eq!(graph.node(&id("mix")).unwrap().description, "Mix the batter");

    // Soft edge preheat -> gather never blocks.
    let ready: Vec<_> = graph.ready_nodes().into_iter().map(|n| n.id.clone()).collect();
    assert_eq!(ready, vec![id("gather"), id("preheat")]);

    assert_eq!(graph.critical_path(), vec![id("gather"), id("mix"), id("bake")]);
    let order = graph.topological_order().unwrap();
    assert!(order.iter().position(|o| *o == id("mix")) < order.iter().position(|o| *o == id("bake")));

    let transfer = graph
        .edges()
        .iter()
        .find(|e| e.source == id("mix") && e.target == id("bake"))
        .and_then(|e| e.data_transfer.clone())
        .unwrap();
    assert_eq!(transfer.get("batter"), Some(&json!("cake_pan")));

    assert_eq!(gateway.call_count(), 1);
    assert_eq!(gateway.calls()[0].schema_name, "task_graph");
}

/// Test: Working through the plan
/// Given a planned graph
/// When tasks complete in dependency order
/// Then downstream tasks become ready and repeating completed is a no-op
#[tokio::test]
async fn test_execute_plan_lifecycle() {
    let (orchestrator, _) = scripted(ScriptedGateway::new().reply(cake_plan()));
    let outcome = orchestrator
        .plan("Bake a cake", &CancellationToken::new())
        .await
        .unwrap();
    let id = |key: &str| outcome.diff.resolve(key).unwrap().clone();
    let shared = SharedTaskGraph::new(outcome.graph.clone());

    for key in ["gather", "preheat", "mix"] {
        shared.update_status(&id(key), NodeStatus::InProgress).unwrap();
        shared.update_status(&id(key), NodeStatus::Completed).unwrap();
    }
    let current = shared.current();
    let ready: Vec<_> = current.graph.ready_nodes().into_iter().map(|n| n.id.clone()).collect();
    assert_eq!(ready, vec![id("bake")]);

    shared.update_status(&id("mix"), NodeStatus::Completed).unwrap();
    let status = |key: &str| shared.current().graph.node(&id(key)).map(|n| n.status);
    assert_eq!(status("mix"), Some(NodeStatus::Completed));

    let version = shared.version();
    let err = shared
        .update_status(&id("mix"), NodeStatus::Pending)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(shared.version(), version);
}

/// Test: Schema rejection
/// Given a backend that refuses the schema
/// When planning
/// Then the request is not resent and the error names the schema problem
#[tokio::test]
async fn test_schema_invalid_is_not_retried() {
    let (orchestrator, gateway) = scripted(
        ScriptedGateway::new()
            .fail(GatewayError::schema_invalid(
                "HTTP 400: Object fields require at least one of: 'properties' or 'anyOf'",
            ))
            .reply(cake_plan()),
    );

    let err = planning_error(
        orchestrator
            .plan("Bake a cake", &CancellationToken::new())
            .await
            .unwrap_err(),
    );
    assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::SchemaInvalid));
    assert!(err.to_string().contains("'properties' or 'anyOf'"));
    assert_eq!(gateway.call_count(), 1);
}

/// Test: Transient outage
/// Given a backend that is unavailable twice
/// When planning
/// Then the third attempt succeeds
#[tokio::test]
async fn test_unavailable_is_retried_with_backoff() {
    let (orchestrator, gateway) = scripted(
        ScriptedGateway::new()
            .fail(GatewayError::unavailable("HTTP 503: overloaded"))
            .fail(GatewayError::unavailable("request failed: connection reset"))
            .reply(cake_plan()),
    );

    let outcome = orchestrator
        .plan("Bake a cake", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.graph.node_count(), 4);
    assert_eq!(gateway.call_count(), 3);

    let calls = gateway.calls();
    assert!(calls.windows(2).all(|w| w[0] == w[1]));
}

/// Test: Atomic rejection
/// Given a model answer whose edges form a hard cycle
/// When planning
/// Then nothing is committed and the candidate is reported
#[tokio::test]
async fn test_cyclic_candidate_is_rejected_whole() {
    let mut plan = cake_plan();
    plan["edges"]
        .as_array_mut()
        .unwrap()
        .push(json!({"source": "bake", "target": "gather", "dependency_type": "hard"}));
    let (orchestrator, _) = scripted(ScriptedGateway::new().reply(plan.clone()));

    let err = planning_error(
        orchestrator
            .plan("Bake a cake", &CancellationToken::new())
            .await
            .unwrap_err(),
    );
    assert!(matches!(err.cause.as_deref(), Some(Error::Cycle { .. })));
    assert_eq!(err.candidate, Some(plan));
}

/// Test: Re-plan around a failure
/// Given a graph whose preheat task failed
/// When re-planning
/// Then new tasks are added and anchored, and existing tasks are kept
#[tokio::test]
async fn test_replan_extends_graph() {
    let mut base = TaskGraph::new();
    let gather = base.add_node("Gather ingredients", None, None).unwrap();
    let preheat = base.add_node("Preheat oven", None, None).unwrap();
    let bake = base.add_node("Bake", None, None).unwrap();
    base.add_edge(&preheat, &bake, DependencyType::Hard, None).unwrap();
    base.add_edge(&gather, &bake, DependencyType::Hard, None).unwrap();
    fail_node(&mut base, &preheat);

    let delta = json!({
        "nodes": {
            "repair": {"id": "repair", "description": "Repair the oven thermostat"},
            "retry": {"id": "retry", "description": "Preheat oven again"}
        },
        "edges": [
            {"source": "repair", "target": "retry"},
            {"source": "retry", "target": bake.as_str()}
        ]
    });
    let (orchestrator, gateway) = scripted(ScriptedGateway::new().reply(delta));

    let outcome = orchestrator
        .replan(base.snapshot(), &[preheat.clone()], &CancellationToken::new())
        .await
        .unwrap();
    let graph = &outcome.graph;
    let retry = outcome.diff.resolve("retry").unwrap();

    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edge_count(), 4);
    assert_eq!(outcome.diff.change_count(), 4);
    assert_eq!(graph.node(&preheat).unwrap().status, NodeStatus::Failed);
    assert!(graph.predecessors(&bake).unwrap().contains(&retry));
    assert!(graph.is_hard_acyclic());

    // The base snapshot is not modified.
    assert_eq!(base.node_count(), 3);

    let prompt = &gateway.calls()[0].user_prompt;
    assert!(prompt.contains("Preheat oven"));
    assert!(prompt.contains(preheat.as_str()));
}

/// Test: Re-plan cycle across old and new tasks
#[tokio::test]
async fn test_replan_rejects_cycle_through_anchor() {
    let mut base = TaskGraph::new();
    let a = base.add_node("a", None, None).unwrap();
    let b = base.add_node("b", None, None).unwrap();
    base.add_edge(&a, &b, DependencyType::Hard, None).unwrap();
    fail_node(&mut base, &a);

    let delta = json!({
        "nodes": {"fix": {"id": "fix", "description": "fix"}},
        "edges": [
            {"source": b.as_str(), "target": "fix"},
            {"source": "fix", "target": a.as_str()}
        ]
    });
    let (orchestrator, _) = scripted(ScriptedGateway::new().reply(delta));

    let err = planning_error(
        orchestrator
            .replan(base.snapshot(), &[a.clone()], &CancellationToken::new())
            .await
            .unwrap_err(),
    );
    assert!(matches!(err.cause.as_deref(), Some(Error::Cycle { .. })));
}

/// Test: Shared re-plan commit
/// Given a shared graph
/// When re-planning through it
/// Then the delta is published as one new version
#[tokio::test]
async fn test_replan_shared_commits_once() {
    let mut base = TaskGraph::new();
    let step = base.add_node("Deploy", None, None).unwrap();
    fail_node(&mut base, &step);
    let shared = SharedTaskGraph::new(base);

    let delta = json!({
        "nodes": {"rollback": {"id": "rollback", "description": "Roll back release"}},
        "edges": [{"source": step.as_str(), "target": "rollback", "dependency_type": "soft"}]
    });
    let (orchestrator, _) = scripted(ScriptedGateway::new().reply(delta));

    let diff = orchestrator
        .replan_shared(&shared, &[step.clone()], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(shared.version(), 1);
    let snapshot = shared.snapshot();
    assert_eq!(snapshot.nodes.len(), 2);
    assert!(snapshot.nodes.contains_key(&diff.added_nodes[0]));
}

/// Gateway that edits the shared graph while "thinking", then answers.
struct ConcurrentEditor {
    shared: SharedTaskGraph,
    edit: Box<dyn Fn(&SharedTaskGraph) + Send + Sync>,
    reply: Value,
}

#[async_trait]
impl StructuredCompletion for ConcurrentEditor {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _schema: &ValidatedSchema,
        _cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        (self.edit)(&self.shared);
        Ok(self.reply.clone())
    }
}

/// Test: Concurrent edit during re-plan
/// Given a UI that adds a task while the model is answering
/// When the delta commits
/// Then both the UI's task and the delta survive
#[tokio::test]
async fn test_replan_shared_keeps_concurrent_edits() {
    let mut base = TaskGraph::new();
    let step = base.add_node("Deploy", None, None).unwrap();
    fail_node(&mut base, &step);
    let shared = SharedTaskGraph::new(base);

    let gateway = ConcurrentEditor {
        shared: shared.clone(),
        edit: Box::new(|g: &SharedTaskGraph| {
            g.add_node("Notify on-call", None, None).unwrap();
        }),
        reply: json!({
            "nodes": {"rollback": {"id": "rollback", "description": "Roll back release"}},
            "edges": [{"source": step.as_str(), "target": "rollback"}]
        }),
    };
    let orchestrator = Orchestrator::new(gateway, quick_options()).unwrap();

    orchestrator
        .replan_shared(&shared, &[step.clone()], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(shared.version(), 2);
    let descriptions: Vec<String> = shared
        .snapshot()
        .nodes
        .values()
        .map(|n| n.description.clone())
        .collect();
    assert_eq!(descriptions, vec!["Deploy", "Notify on-call", "Roll back release"]);
}

/// Test: Anchor removed during re-plan
/// Given a UI that deletes the failed task while the model is answering
/// When the delta commits
/// Then the delta is rejected and the UI's edit stands alone
#[tokio::test]
async fn test_replan_shared_rejects_stale_anchor() {
    let mut base = TaskGraph::new();
    let step = base.add_node("Deploy", None, None).unwrap();
    let keep = base.add_node("Write changelog", None, None).unwrap();
    fail_node(&mut base, &step);
    let shared = SharedTaskGraph::new(base);

    let doomed = step.clone();
    let gateway = ConcurrentEditor {
        shared: shared.clone(),
        edit: Box::new(move |g: &SharedTaskGraph| {
            g.remove_node(&doomed).unwrap();
        }),
        reply: json!({
            "nodes": {"rollback": {"id": "rollback", "description": "Roll back release"}},
            "edges": [{"source": step.as_str(), "target": "rollback"}]
        }),
    };
    let orchestrator = Orchestrator::new(gateway, quick_options()).unwrap();

    let err = planning_error(
        orchestrator
            .replan_shared(&shared, &[step.clone()], &CancellationToken::new())
            .await
            .unwrap_err(),
    );
    assert!(matches!(err.cause.as_deref(), Some(Error::UnknownNode(_))));

    assert_eq!(shared.version(), 1);
    let snapshot = shared.snapshot();
    assert_eq!(snapshot.nodes.len(), 1);
    assert!(snapshot.nodes.contains_key(&keep));
}

/// Test: Cancellation while waiting for the model
#[tokio::test]
async fn test_cancel_leaves_shared_graph_untouched() {
    let mut base = TaskGraph::new();
    let step = base.add_node("Deploy", None, None).unwrap();
    fail_node(&mut base, &step);
    let shared = SharedTaskGraph::new(base);

    let gateway = Arc::new(ScriptedGateway::new().hang());
    let orchestrator = Orchestrator::new(gateway, quick_options()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .replan_shared(&shared, &[step], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(shared.version(), 0);
}
