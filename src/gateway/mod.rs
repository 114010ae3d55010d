//! Structured completion gateway.
//!
//! A gateway asks a language model for JSON that conforms to a schema. The
//! orchestrator only sees the [`StructuredCompletion`] trait; vendors live
//! behind it.

mod http;
mod scripted;

pub use http::HttpGateway;
pub use scripted::{RecordedCall, ScriptedGateway};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::schema::ValidatedSchema;

/// Why a structured completion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Transport, auth, rate limit, or server failure. Retryable with backoff.
    Unavailable,
    /// The backend refused the schema. Must be repaired, never resent as-is.
    SchemaInvalid,
    /// The backend answered with something that is not JSON.
    MalformedOutput,
    /// The endpoint does not exist. Resending cannot help.
    Misconfigured,
    /// The caller's cancellation token fired.
    Cancelled,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayErrorKind::Unavailable => write!(f, "unavailable"),
            GatewayErrorKind::SchemaInvalid => write!(f, "schema invalid"),
            GatewayErrorKind::MalformedOutput => write!(f, "malformed output"),
            GatewayErrorKind::Misconfigured => write!(f, "misconfigured"),
            GatewayErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub detail: String,
    /// Raw response text, kept for malformed output diagnostics.
    pub raw: Option<String>,
}

impl GatewayError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Unavailable,
            detail: detail.into(),
            raw: None,
        }
    }

    pub fn schema_invalid(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::SchemaInvalid,
            detail: detail.into(),
            raw: None,
        }
    }

    pub fn malformed(detail: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::MalformedOutput,
            detail: detail.into(),
            raw: Some(raw.into()),
        }
    }

    pub fn misconfigured(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Misconfigured,
            detail: detail.into(),
            raw: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: GatewayErrorKind::Cancelled,
            detail: "request cancelled by caller".to_string(),
            raw: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == GatewayErrorKind::Unavailable
    }
}

/// "Send messages plus a schema, get back schema-conformant JSON."
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait StructuredCompletion: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ValidatedSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError>;
}

#[async_trait]
impl<T: StructuredCompletion + ?Sized> StructuredCompletion for std::sync::Arc<T> {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ValidatedSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        (**self)
            .complete(system_prompt, user_prompt, schema, cancel)
            .await
    }
}

/// Parse model output text as JSON.
pub(crate) fn parse_output(text: &str) -> Result<Value, GatewayError> {
    serde_json::from_str(text.trim())
        .map_err(|e| GatewayError::malformed(format!("response is not JSON: {}", e), text))
}
