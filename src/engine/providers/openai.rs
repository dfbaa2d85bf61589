// Orchestra Engine — OpenAI-Compatible Provider
// Handles OpenAI, OpenRouter, Ollama, and any OpenAI-compatible REST API.
//
// Grounded on the teacher's engine/providers/openai.rs: same retry loop,
// circuit breaker, and SSE line-buffering, trimmed of Azure-specific header
// handling (not relevant to any ProviderKind this spec defines).

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

static OPENAI_CIRCUIT: LazyLock<CircuitBreaker> = LazyLock::new(|| CircuitBreaker::new(5, 60));

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        OpenAiProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
        }
    }

    fn format_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let mut m = json!({ "role": role, "content": msg.content });
                if let Some(tc) = &msg.tool_calls {
                    m["tool_calls"] = json!(tc
                        .iter()
                        .map(|c| json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() },
                        }))
                        .collect::<Vec<_>>());
                }
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }
                m
            })
            .collect()
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// OpenAI's wire format encodes tool-call arguments as a JSON string.
    /// Normalise to a raw object per spec.md §4.1 — tolerate a
    /// double-encoded string (some gateways re-stringify) by retrying the
    /// parse once.
    fn normalize_arguments(raw: &str) -> Value {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::String(inner)) => serde_json::from_str(&inner).unwrap_or(json!({})),
            Ok(v) => v,
            Err(_) => json!({}),
        }
    }

    fn parse_message_tool_calls(message: &Value) -> Vec<ToolCall> {
        message["tool_calls"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc["id"].as_str()?.to_string();
                        let name = tc["function"]["name"].as_str()?.to_string();
                        let args_raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                        Some(ToolCall { id, name, arguments: Self::normalize_arguments(args_raw) })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_sse_chunk(data: &str) -> Option<(Option<String>, Option<String>)> {
        if data == "[DONE]" {
            return None;
        }
        let v: Value = serde_json::from_str(data).ok()?;
        let choice = v["choices"].get(0)?;
        let delta_text = choice["delta"]["content"].as_str().map(|s| s.to_string());
        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
        Some((delta_text, finish_reason))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if resp.status() == 401 || resp.status() == 403 {
            return Err(ProviderError::Auth("openai".into()));
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
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let streaming = tools.is_empty();

        let mut body = json!({
            "model": model,
            "messages": Self::format_messages(messages),
            "stream": streaming,
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::format_tools(tools));
        }

        info!("[provider] openai request model={} streaming={} tools={}", model, streaming, tools.len());

        if let Err(msg) = OPENAI_CIRCUIT.check() {
            return Err(ProviderError::Transport(msg));
        }

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!("[provider] openai retry {}/{} after {}ms", attempt, MAX_RETRIES, delay.as_millis());
            }

            let response = match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    OPENAI_CIRCUIT.record_failure();
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
                error!("[provider] openai error {status}: {last_error}");

                OPENAI_CIRCUIT.record_failure();

                if status == 401 || status == 403 {
                    return Err(ProviderError::Auth("openai".into()));
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

            OPENAI_CIRCUIT.record_success();

            if !streaming {
                let v: Value = response.json().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
                let message = &v["choices"][0]["message"];
                let text = message["content"].as_str().unwrap_or_default().to_string();
                let tool_calls = Self::parse_message_tool_calls(message);
                let stop_reason = v["choices"][0]["finish_reason"].as_str().map(|s| s.to_string());
                if let Some(cb) = on_token {
                    cb(&text);
                }
                return Ok(CompletionResponse { text, tool_calls, stop_reason });
            }

            // Streaming path: tools empty, accumulate deltas and invoke on_token.
            let mut text_accum = String::new();
            let mut stop_reason = None;
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(|e| ProviderError::Transport(format!("stream read error: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if let Some(data) = line.strip_prefix("data: ") {
                        match Self::parse_sse_chunk(data) {
                            Some((Some(dt), fr)) => {
                                text_accum.push_str(&dt);
                                if let Some(cb) = on_token {
                                    cb(&dt);
                                }
                                if fr.is_some() {
                                    stop_reason = fr;
                                }
                            }
                            Some((None, fr)) => {
                                if fr.is_some() {
                                    stop_reason = fr;
                                }
                            }
                            None => {
                                return Ok(CompletionResponse { text: text_accum, tool_calls: Vec::new(), stop_reason });
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_object_arguments() {
        let v = OpenAiProvider::normalize_arguments(r#"{"path":"a.rs"}"#);
        assert_eq!(v["path"], "a.rs");
    }

    #[test]
    fn normalizes_double_encoded_arguments() {
        let v = OpenAiProvider::normalize_arguments(r#""{\"path\":\"a.rs\"}""#);
        assert_eq!(v["path"], "a.rs");
    }

    #[test]
    fn format_messages_round_trips_tool_call() {
        let msgs = vec![Message::assistant(
            "",
            Some(vec![ToolCall { id: "c1".into(), name: "read_file".into(), arguments: json!({"path": "a.rs"}) }]),
        )];
        let formatted = OpenAiProvider::format_messages(&msgs);
        assert_eq!(formatted[0]["tool_calls"][0]["function"]["name"], "read_file");
    }
}
