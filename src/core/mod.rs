//! Core domain model: nodes, the task graph, and its shared handle.

pub mod graph;
pub mod node;
pub mod shared;

pub use graph::{DependencyType, Edge, TaskGraph, TaskGraphSnapshot};
pub use node::{Node, NodeId, NodeStatus, Payload};
pub use shared::{GraphVersion, SharedTaskGraph};
