//! Property tests for the task graph invariants.
//!
//! Graphs are built from random operation sequences through the public API;
//! whatever the API accepts must keep the hard-edge subgraph acyclic.

use proptest::prelude::*;

use plangraph::core::{DependencyType, NodeId, NodeStatus, TaskGraph, TaskGraphSnapshot};
use plangraph::Error;

use crate::fixtures::log_file;

/// Random edges over `n` nodes, as (source index, target index, hard?).
fn edge_ops(max_nodes: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize, bool)>)> {
    (2..max_nodes).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n, 0..n, any::<bool>()), 0..(n * 3)),
        )
    })
}

fn build(n: usize, ops: &[(usize, usize, bool)]) -> (TaskGraph, Vec<NodeId>) {
    let mut graph = TaskGraph::new();
    let ids: Vec<NodeId> = (0..n)
        .map(|i| graph.add_node(&format!("task {}", i), None, None).unwrap())
        .collect();
    for &(s, t, hard) in ops {
        let dep = if hard {
            DependencyType::Hard
        } else {
            DependencyType::Soft
        };
        // Rejections are expected; the graph must stay consistent either way.
        let _ = graph.add_edge(&ids[s], &ids[t], dep, None);
    }
    (graph, ids)
}

proptest! {
    #[test]
    fn prop_hard_subgraph_stays_acyclic((n, ops) in edge_ops(12)) {
        let (mut graph, ids) = build(n, &[]);
        for (s, t, hard) in ops {
            let dep = if hard { DependencyType::Hard } else { DependencyType::Soft };
            let before = graph.edge_count();
            match graph.add_edge(&ids[s], &ids[t], dep, None) {
                Ok(()) => {
                    prop_assert_eq!(graph.edge_count(), before + 1);
                }
                Err(_) => {
                    prop_assert_eq!(graph.edge_count(), before);
                }
            }
            prop_assert!(graph.is_hard_acyclic());
        }
        prop_assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn prop_topological_order_respects_hard_edges((n, ops) in edge_ops(12)) {
        let (graph, _) = build(n, &ops);
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), n);
        let position = |id: &NodeId| order.iter().position(|o| o == id).unwrap();
        for edge in graph.edges().iter().filter(|e| e.is_hard()) {
            prop_assert!(position(&edge.source) < position(&edge.target));
        }
    }

    #[test]
    fn prop_self_loop_always_rejected((n, ops) in edge_ops(8), pick in any::<prop::sample::Index>(), hard in any::<bool>()) {
        let (mut graph, ids) = build(n, &ops);
        let id = &ids[pick.index(ids.len())];
        let before = graph.edge_count();
        let dep = if hard { DependencyType::Hard } else { DependencyType::Soft };

        let result = graph.add_edge(id, id, dep, None);
        prop_assert!(matches!(result, Err(Error::SelfLoop(_))));
        prop_assert_eq!(graph.edge_count(), before);
    }

    #[test]
    fn prop_remove_drops_exactly_touching_edges((n, ops) in edge_ops(10), pick in any::<prop::sample::Index>()) {
        let (mut graph, ids) = build(n, &ops);
        let victim = ids[pick.index(ids.len())].clone();
        let touching = graph.edges().iter().filter(|e| e.touches(&victim)).count();
        let before = graph.edge_count();

        graph.remove_node(&victim).unwrap();
        prop_assert_eq!(graph.edge_count(), before - touching);
        prop_assert!(graph.edges().iter().all(|e| !e.touches(&victim)));
        prop_assert!(!graph.contains(&victim));
        prop_assert_eq!(graph.node_count(), n - 1);
    }

    #[test]
    fn prop_snapshot_round_trip((n, ops) in edge_ops(10)) {
        let (graph, _) = build(n, &ops);
        let snapshot = graph.snapshot();

        let json = snapshot.to_json_pretty().unwrap();
        let parsed = TaskGraphSnapshot::from_json(&json).unwrap();
        prop_assert_eq!(&parsed, &snapshot);

        let rebuilt = TaskGraph::from_snapshot(parsed).unwrap();
        prop_assert_eq!(rebuilt.snapshot(), snapshot);
        prop_assert_eq!(rebuilt.critical_path(), graph.critical_path());
    }
}

#[test]
fn test_cycle_rejection_leaves_graph_unchanged() {
    let mut graph = TaskGraph::new();
    let a = graph.add_node("a", None, None).unwrap();
    let b = graph.add_node("b", None, None).unwrap();
    let c = graph.add_node("c", None, None).unwrap();
    graph.add_edge(&a, &b, DependencyType::Hard, None).unwrap();
    graph.add_edge(&b, &c, DependencyType::Hard, None).unwrap();
    let before = graph.snapshot();

    let err = graph
        .add_edge(&c, &a, DependencyType::Hard, None)
        .unwrap_err();
    assert!(matches!(err, Error::Cycle { .. }));
    assert_eq!(graph.snapshot(), before);

    // A soft edge closing the same loop is fine.
    graph.add_edge(&c, &a, DependencyType::Soft, None).unwrap();
    assert!(graph.is_hard_acyclic());
}

/// Test: Administrative override is logged
/// Given a completed task
/// When it is reset to pending
/// Then a WARN line names the override and its reason, and a reset that
/// changes nothing logs nothing
#[test]
fn test_reset_status_logs_override() {
    let log = log_file();
    let mut graph = TaskGraph::new();
    let bake = graph.add_node("Bake", None, None).unwrap();
    graph.update_status(&bake, NodeStatus::InProgress).unwrap();
    graph.update_status(&bake, NodeStatus::Completed).unwrap();

    graph
        .reset_status(&bake, NodeStatus::Pending, "oven was never switched on")
        .unwrap();
    graph
        .reset_status(&bake, NodeStatus::Pending, "reset again for nothing")
        .unwrap();
    assert_eq!(graph.node(&bake).unwrap().status, NodeStatus::Pending);

    let text = std::fs::read_to_string(&log).unwrap();
    let line = text
        .lines()
        .find(|l| l.contains("oven was never switched on"))
        .unwrap();
    assert!(line.contains("[WARN]"));
    assert!(line.contains("Administrative status override"));
    assert!(line.contains(bake.as_str()));
    assert!(line.contains("completed -> pending"));
    assert!(!text.contains("reset again for nothing"));
}
