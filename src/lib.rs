pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod log;
pub mod orchestration;
pub mod schema;
pub mod util;

pub use error::{Error, Result};
pub use orchestration::{Orchestrator, PlanDiff, PlanOutcome, PlannerOptions, PlanningError};
