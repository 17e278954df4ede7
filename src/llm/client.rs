use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, ClientBuilder};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::parse::parse_planner_text;
use super::prompt::{build_system_prompt, build_user_prompt};
use super::{ModelConfig, PlanRequest, PlanResponse, Planner};
use crate::config::PlannerConfig;
use crate::types::error::PlannerError;

/// Planner reached over HTTP. The request carries the aggregated screen
/// state, ready-made prompts and optionally the screenshot itself.
#[derive(Debug, Clone)]
pub struct HttpPlanner {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    send_screenshot: bool,
}

impl HttpPlanner {
    pub fn new(config: &PlannerConfig) -> Result<Self, PlannerError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| PlannerError::Transport("planner endpoint not configured".to_string()))?;
        let endpoint = Url::parse(endpoint).map_err(|e| PlannerError::Transport(e.to_string()))?;
        let model = ModelConfig::from(config);

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(model.timeout_seconds))
            .build()
            .map_err(|e| PlannerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            send_screenshot: config.send_screenshot,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn build_request_body(&self, request: &PlanRequest) -> Value {
        let mut body = json!({
            "instruction": request.instruction,
            "model": request.model.model,
            "temperature": request.model.temperature,
            "screen_state": request.screen_state,
            "prompt": {
                "system": build_system_prompt(),
                "user": build_user_prompt(request),
            },
        });

        if self.send_screenshot {
            if let Some(encoded) = read_screenshot(&request.screen_state.screenshot.uri).await {
                body["screenshot_base64"] = json!(encoded);
            }
        }
        body
    }

    async fn try_plan(&self, body: &Value) -> Result<PlanResponse, PlannerError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(PlannerError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(bytes = text.len(), "planner responded");
        match extract_message_content(&text) {
            Some(content) => parse_planner_text(&content),
            None => parse_planner_text(&text),
        }
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(
        &self,
        request: &PlanRequest,
        cancel: &CancellationToken,
    ) -> Result<PlanResponse, PlannerError> {
        if cancel.is_cancelled() {
            return Err(PlannerError::Cancelled);
        }

        let body = self.build_request_body(request).await;
        let attempts = request.model.max_retries.max(1);

        let mut last_error = None;
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(PlannerError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PlannerError::Cancelled),
                outcome = self.try_plan(&body) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) && attempt + 1 < attempts => {
                    warn!(attempt, error = %e, "planner request failed, retrying");
                    last_error = Some(e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PlannerError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(2u64.pow(attempt) * 100)) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| PlannerError::Transport("All retry attempts failed".to_string())))
    }
}

fn is_retryable(error: &PlannerError) -> bool {
    match error {
        PlannerError::Transport(_) => true,
        PlannerError::Status { status, .. } => *status >= 500 || *status == 429,
        PlannerError::Parse(_) | PlannerError::Cancelled => false,
    }
}

// 兼容 chat completion 格式: output.choices[0].message.content 或 choices[0].message.content
fn extract_message_content(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let choices = value
        .get("output")
        .and_then(|o| o.get("choices"))
        .or_else(|| value.get("choices"))?;
    choices
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

async fn read_screenshot(uri: &str) -> Option<String> {
    if uri.starts_with("memory://") {
        return None;
    }
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        Err(e) => {
            warn!(uri, error = %e, "screenshot not attached to planner request");
            None
        }
    }
}
