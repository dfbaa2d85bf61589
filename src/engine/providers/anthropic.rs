// Orchestra Engine — Anthropic Provider
//
// Grounded on the teacher's engine/providers/anthropic.rs: system prompt is
// hoisted out of the message array, tool calls surface as `tool_use` content
// blocks and tool results as `tool_result` blocks rather than a dedicated
// "tool" role, matching Anthropic's Messages API.

use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::LazyLock;
use std::time::Duration;

use crate::atoms::traits::{OnToken, Provider, ProviderError};
use crate::atoms::types::{CompletionResponse, Message, ProviderConfig, Role, ToolCall, ToolDefinition};
use crate::engine::http::{is_retryable_status, parse_retry_after, retry_delay, CircuitBreaker, MAX_RETRIES};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

static ANTHROPIC_CIRCUIT: LazyLock<CircuitBreaker> = LazyLock::new(|| CircuitBreaker::new(5, 60));

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string());
        AnthropicProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
        }
    }

    /// Anthropic pulls the system prompt out of the message list entirely.
    fn extract_system(messages: &[Message]) -> Option<String> {
        let systems: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if systems.is_empty() {
            None
        } else {
            Some(systems.join("\n\n"))
        }
    }

    fn format_messages(messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::new();
        for msg in messages.iter().filter(|m| m.role != Role::System) {
            match msg.role {
                Role::User => out.push(json!({ "role": "user", "content": msg.content })),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": msg.content }));
                    }
                    if let Some(tool_calls) = &msg.tool_calls {
                        for tc in tool_calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments,
                            }));
                        }
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                Role::Tool => {
                    out.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                            "content": msg.content,
                        }]
                    }));
                }
                Role::System => unreachable!("filtered above"),
            }
        }
        out
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
            .collect()
    }

    fn parse_content_blocks(blocks: &[Value]) -> (String, Vec<ToolCall>) {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => {
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default().to_string();
                    let arguments = block["input"].clone();
                    tool_calls.push(ToolCall { id, name, arguments });
                }
                _ => {}
            }
        }
        (text, tool_calls)
    }

    fn parse_sse_event(event_type: &str, data: &str) -> Option<(Option<String>, Option<String>)> {
        let v: Value = serde_json::from_str(data).ok()?;
        match event_type {
            "content_block_delta" => {
                let text = v["delta"]["text"].as_str().map(|s| s.to_string());
                Some((text, None))
            }
            "message_delta" => {
                let reason = v["delta"]["stop_reason"].as_str().map(|s| s.to_string());
                Some((None, reason))
            }
            _ => Some((None, None)),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if resp.status() == 401 || resp.status() == 403 {
            return Err(ProviderError::Auth("anthropic".into()));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }
        let v: Value = resp.json().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|m| m["id"].as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default())
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_token: Option<&OnToken<'_>>,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let streaming = tools.is_empty();

        let mut body = json!({
            "model": model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": Self::format_messages(messages),
            "stream": streaming,
        });
        if let Some(system) = Self::extract_system(messages) {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }

        info!("[provider] anthropic request model={} streaming={} tools={}", model, streaming, tools.len());

        if let Err(msg) = ANTHROPIC_CIRCUIT.check() {
            return Err(ProviderError::Transport(msg));
        }

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!("[provider] anthropic retry {}/{} after {}ms", attempt, MAX_RETRIES, delay.as_millis());
            }

            let response = match self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    ANTHROPIC_CIRCUIT.record_failure();
                    last_error = format!("HTTP request failed: {e}");
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(ProviderError::Transport(last_error));
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                last_status = status;
                retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, crate::atoms::types::truncate_utf8(&body_text, 200));
                error!("[provider] anthropic error {status}: {last_error}");

                ANTHROPIC_CIRCUIT.record_failure();

                if status == 401 || status == 403 {
                    return Err(ProviderError::Auth("anthropic".into()));
                }
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return if status == 429 {
                    Err(ProviderError::RateLimited { message: last_error, retry_after_secs: retry_after.take() })
                } else {
                    Err(ProviderError::Api { status, message: last_error })
                };
            }

            ANTHROPIC_CIRCUIT.record_success();

            if !streaming {
                let v: Value = response.json().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
                let blocks = v["content"].as_array().cloned().unwrap_or_default();
                let (text, tool_calls) = Self::parse_content_blocks(&blocks);
                let stop_reason = v["stop_reason"].as_str().map(|s| s.to_string());
                if let Some(cb) = on_token {
                    cb(&text);
                }
                return Ok(CompletionResponse { text, tool_calls, stop_reason });
            }

            let mut text_accum = String::new();
            let mut stop_reason = None;
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut current_event = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(|e| ProviderError::Transport(format!("stream read error: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if let Some(event) = line.strip_prefix("event: ") {
                        current_event = event.to_string();
                    } else if let Some(data) = line.strip_prefix("data: ") {
                        if let Some((delta, fr)) = Self::parse_sse_event(&current_event, data) {
                            if let Some(dt) = delta {
                                text_accum.push_str(&dt);
                                if let Some(cb) = on_token {
                                    cb(&dt);
                                }
                            }
                            if fr.is_some() {
                                stop_reason = fr;
                            }
                        }
                    }
                }
            }

            return Ok(CompletionResponse { text: text_accum, tool_calls: Vec::new(), stop_reason });
        }

        match last_status {
            0 => Err(ProviderError::Transport(last_error)),
            429 => Err(ProviderError::RateLimited { message: last_error, retry_after_secs: retry_after }),
            s => Err(ProviderError::Api { status: s, message: last_error }),
        }
    }
}
