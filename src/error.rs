use thiserror::Error;

use crate::core::{NodeId, NodeStatus};
use crate::gateway::GatewayError;
use crate::orchestration::PlanningError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Self-loop rejected on node {0}")]
    SelfLoop(NodeId),

    #[error("Hard dependency from {from} to {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("Invalid status transition for {id} from {from} to {to}")]
    InvalidTransition {
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("Schema rejected at {pointer}: {reason}")]
    SchemaConfig { pointer: String, reason: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
