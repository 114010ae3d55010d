//! In-process gateway that replays canned replies.
//!
//! Useful for tests and for driving a UI without network access. Every call
//! is recorded so callers can assert on prompts and attempt counts.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{parse_output, GatewayError, StructuredCompletion};
use crate::schema::ValidatedSchema;

/// One `complete` call as seen by the scripted gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub user_prompt: String,
    pub schema_name: String,
}

enum Reply {
    Json(Value),
    Text(String),
    Fail(GatewayError),
    Hang,
}

#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON reply.
    pub fn reply(self, value: Value) -> Self {
        self.push(Reply::Json(value))
    }

    /// Queue raw model text, parsed as JSON when served.
    pub fn reply_text(self, text: &str) -> Self {
        self.push(Reply::Text(text.to_string()))
    }

    pub fn fail(self, error: GatewayError) -> Self {
        self.push(Reply::Fail(error))
    }

    /// Queue a reply that never arrives; only cancellation ends the call.
    pub fn hang(self) -> Self {
        self.push(Reply::Hang)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn push(self, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }
}

#[async_trait]
impl StructuredCompletion for ScriptedGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ValidatedSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                schema_name: schema.name().to_string(),
            });
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Text(text)) => parse_output(&text),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::cancelled()),
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                }
            },
            None => Err(GatewayError::unavailable("script exhausted")),
        }
    }
}
