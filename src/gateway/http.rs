//! OpenAI-compatible chat completions adapter with `json_schema` response
//! format.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{parse_output, GatewayError, StructuredCompletion};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::schema::ValidatedSchema;
use crate::{plog_debug, plog_trace};

/// Gateway talking to a chat completions endpoint over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpGateway {
    /// Build from configuration, resolving the credential up front.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let api_key = config.credential()?;
        Self::new(&config.endpoint, api_key, &config.model, config.timeout())
    }

    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, endpoint, api_key, model, timeout))
    }

    /// Use a preconfigured client (proxies, TLS roots, connection pools).
    pub fn with_client(
        client: Client,
        endpoint: &str,
        api_key: impl Into<String>,
        model: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.into(),
            model: model.to_string(),
            timeout,
        }
    }

    fn build_request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
        schema: &'a ValidatedSchema,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: schema.name(),
                    strict: true,
                    schema: schema.as_value(),
                },
            },
        }
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> std::result::Result<Value, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(format!("request failed: {}", err)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| GatewayError::unavailable(format!("failed to read response: {}", err)))?;
        plog_debug!("HttpGateway {} -> {}", self.endpoint, status);
        plog_trace!("HttpGateway body: {}", text);

        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        extract_content(&text)
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StructuredCompletion for HttpGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ValidatedSchema,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, GatewayError> {
        let body = self.build_request(system_prompt, user_prompt, schema);
        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::cancelled()),
            res = tokio::time::timeout(self.timeout, self.send(&body)) => match res {
                Ok(inner) => inner,
                Err(_) => Err(GatewayError::unavailable(format!(
                    "no response within {:?}",
                    self.timeout
                ))),
            },
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Object { message: String },
    Text(String),
}

/// Pull the first choice's content out of a completion body and parse it.
fn extract_content(body: &str) -> std::result::Result<Value, GatewayError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::malformed(format!("unexpected completion body: {}", e), body))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GatewayError::malformed("completion has no content", body))?;
    parse_output(&content)
}

fn map_http_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| match r.error {
            Some(ErrorBody::Object { message }) | Some(ErrorBody::Text(message)) => Some(message),
            None => r.message,
        })
        .unwrap_or_else(|| body.trim().to_string());
    let detail = format!("HTTP {}: {}", status.as_u16(), message);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::schema_invalid(detail)
        }
        StatusCode::NOT_FOUND => GatewayError::misconfigured(detail),
        _ => GatewayError::unavailable(detail),
    }
}
