//! Shared, single-writer handle to a task graph.
//!
//! Writers are serialized by a mutex and work on a private copy; the copy is
//! published as a new immutable version only when the whole mutation
//! succeeds. Readers clone the current `Arc` and never observe in-flight
//! state.

use std::sync::{Arc, Mutex, RwLock};

use crate::core::graph::{DependencyType, TaskGraph, TaskGraphSnapshot};
use crate::core::node::{Node, NodeId, NodeStatus, Payload};
use crate::error::Result;
use crate::plog_debug;

/// An immutable published state of the graph.
#[derive(Debug, Clone)]
pub struct GraphVersion {
    pub version: u64,
    pub graph: Arc<TaskGraph>,
}

/// Thread-safe handle shared between a UI and the orchestrator.
#[derive(Debug, Clone)]
pub struct SharedTaskGraph {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    writer: Mutex<()>,
    current: RwLock<GraphVersion>,
}

impl SharedTaskGraph {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(()),
                current: RwLock::new(GraphVersion {
                    version: 0,
                    graph: Arc::new(graph),
                }),
            }),
        }
    }

    /// Current published version and graph.
    pub fn current(&self) -> GraphVersion {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Serialized copy of the current version.
    pub fn snapshot(&self) -> TaskGraphSnapshot {
        self.current().graph.snapshot()
    }

    pub fn critical_path(&self) -> Vec<NodeId> {
        self.current().graph.critical_path()
    }

    /// Run `f` against a private copy under the writer lock and publish the
    /// copy only if `f` succeeds.
    pub fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskGraph) -> Result<T>,
    {
        let _guard = self.inner.writer.lock().unwrap_or_else(|e| e.into_inner());
        let base = self.current();
        let mut working = (*base.graph).clone();
        let out = f(&mut working)?;
        self.publish(base.version + 1, working);
        Ok(out)
    }

    /// Replace the whole graph, e.g. with a freshly planned one.
    pub fn replace(&self, graph: TaskGraph) -> u64 {
        let _guard = self.inner.writer.lock().unwrap_or_else(|e| e.into_inner());
        let version = self.current().version + 1;
        self.publish(version, graph);
        version
    }

    pub fn add_node(
        &self,
        description: &str,
        inputs: Option<Payload>,
        outputs: Option<Payload>,
    ) -> Result<NodeId> {
        self.mutate(|g| g.add_node(description, inputs, outputs))
    }

    pub fn add_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        dependency_type: DependencyType,
        data_transfer: Option<Payload>,
    ) -> Result<()> {
        self.mutate(|g| g.add_edge(source, target, dependency_type, data_transfer))
    }

    pub fn update_status(&self, id: &NodeId, status: NodeStatus) -> Result<()> {
        self.mutate(|g| g.update_status(id, status))
    }

    pub fn reset_status(&self, id: &NodeId, status: NodeStatus, reason: &str) -> Result<()> {
        self.mutate(|g| g.reset_status(id, status, reason))
    }

    pub fn remove_node(&self, id: &NodeId) -> Result<Node> {
        self.mutate(|g| g.remove_node(id))
    }

    fn publish(&self, version: u64, graph: TaskGraph) {
        plog_debug!(
            "SharedTaskGraph publish v{} ({} nodes, {} edges)",
            version,
            graph.node_count(),
            graph.edge_count()
        );
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner()) = GraphVersion {
            version,
            graph: Arc::new(graph),
        };
    }
}

impl Default for SharedTaskGraph {
    fn default() -> Self {
        Self::new(TaskGraph::new())
    }
}
