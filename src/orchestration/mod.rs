//! Planning layer: turns goals into task graphs through a structured
//! completion gateway, and grows existing graphs when tasks fail.
//!
//! Nothing produced by the model reaches a graph until it has been checked
//! against the schema locally and applied, in full, through the graph's own
//! mutation checks.

mod candidate;
mod diff;
mod orchestrator;
pub mod prompt;

pub use diff::PlanDiff;
pub use orchestrator::{Orchestrator, PlanOutcome, PlannerOptions};

use serde_json::Value;
use thiserror::Error;

use crate::error::Error;
use crate::gateway::GatewayErrorKind;

/// A plan or re-plan that was rejected as a whole.
///
/// Carries the discarded candidate (when the model produced one) so callers
/// can log or display what was refused.
#[derive(Debug, Error)]
#[error("planning failed: {reason}")]
pub struct PlanningError {
    pub reason: String,
    pub candidate: Option<Value>,
    #[source]
    pub cause: Option<Box<Error>>,
}

impl PlanningError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            candidate: None,
            cause: None,
        }
    }

    pub fn with_candidate(mut self, candidate: Value) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Kind of the gateway failure behind this error, if there was one.
    pub fn gateway_kind(&self) -> Option<GatewayErrorKind> {
        match self.cause.as_deref() {
            Some(Error::Gateway(err)) => Some(err.kind),
            _ => None,
        }
    }
}
