// Orchestra Engine — Google (Gemini) Provider
//
// Gemini's `generateContent`/`streamGenerateContent` REST API nests the API
// key in the query string rather than a header, calls roles "user"/"model",
// and wraps tool calls as `functionCall` parts with a structured `args`
// object already — no JSON-string normalisation needed on the way in.
// Grounded on the shape of the teacher's other provider adapters; lighter
// because spec.md only requires the same four-method `Provider` contract.

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

static GOOGLE_CIRCUIT: LazyLock<CircuitBreaker> = LazyLock::new(|| CircuitBreaker::new(5, 60));

pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        GoogleProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
        }
    }

    fn extract_system(messages: &[Message]) -> Option<Value> {
        let systems: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if systems.is_empty() {
            None
        } else {
            Some(json!({ "parts": [{ "text": systems.join("\n\n") }] }))
        }
    }

    fn format_contents(messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::new();
        for msg in messages.iter().filter(|m| m.role != Role::System) {
            match msg.role {
                Role::User => out.push(json!({ "role": "user", "parts": [{ "text": msg.content }] })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({ "text": msg.content }));
                    }
                    if let Some(tool_calls) = &msg.tool_calls {
                        for tc in tool_calls {
                            parts.push(json!({ "functionCall": { "name": tc.name, "args": tc.arguments } }));
                        }
                    }
                    out.push(json!({ "role": "model", "parts": parts }));
                }
                Role::Tool => {
                    out.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": msg.name.clone().unwrap_or_default(),
                                "response": { "content": msg.content },
                            }
                        }]
                    }));
                }
                Role::System => unreachable!("filtered above"),
            }
        }
        out
    }

    fn format_tools(tools: &[ToolDefinition]) -> Value {
        json!([{
            "functionDeclarations": tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>()
        }])
    }

    fn parse_candidate(candidate: &Value) -> (String, Vec<ToolCall>) {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for (i, part) in parts.iter().enumerate() {
                if let Some(t) = part["text"].as_str() {
                    text.push_str(t);
                }
                if let Some(fc) = part.get("functionCall") {
                    let name = fc["name"].as_str().unwrap_or_default().to_string();
                    tool_calls.push(ToolCall { id: format!("call_{i}"), name, arguments: fc["args"].clone() });
                }
            }
        }
        (text, tool_calls)
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models?key={}", self.base_url.trim_end_matches('/'), self.api_key);
        let resp = self.client.get(&url).send().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
        if resp.status() == 401 || resp.status() == 403 {
            return Err(ProviderError::Auth("google".into()));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }
        let v: Value = resp.json().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(v["models"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|m| m["name"].as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default())
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_token: Option<&OnToken<'_>>,
    ) -> Result<CompletionResponse, ProviderError> {
        let streaming = tools.is_empty();
        let method = if streaming { "streamGenerateContent" } else { "generateContent" };
        let mut url = format!("{}/models/{}:{}?key={}", self.base_url.trim_end_matches('/'), model, method, self.api_key);
        if streaming {
            url.push_str("&alt=sse");
        }

        let mut body = json!({ "contents": Self::format_contents(messages) });
        if let Some(system) = Self::extract_system(messages) {
            body["systemInstruction"] = system;
        }
        if !tools.is_empty() {
            body["tools"] = Self::format_tools(tools);
        }

        info!("[provider] google request model={} streaming={} tools={}", model, streaming, tools.len());

        if let Err(msg) = GOOGLE_CIRCUIT.check() {
            return Err(ProviderError::Transport(msg));
        }

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!("[provider] google retry {}/{} after {}ms", attempt, MAX_RETRIES, delay.as_millis());
            }

            let response = match self.client.post(&url).header("Content-Type", "application/json").json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    GOOGLE_CIRCUIT.record_failure();
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
                error!("[provider] google error {status}: {last_error}");

                GOOGLE_CIRCUIT.record_failure();

                if status == 401 || status == 403 {
                    return Err(ProviderError::Auth("google".into()));
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

            GOOGLE_CIRCUIT.record_success();

            if !streaming {
                let v: Value = response.json().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
                let candidate = &v["candidates"][0];
                let (text, tool_calls) = Self::parse_candidate(candidate);
                let stop_reason = candidate["finishReason"].as_str().map(|s| s.to_string());
                if let Some(cb) = on_token {
                    cb(&text);
                }
                return Ok(CompletionResponse { text, tool_calls, stop_reason });
            }

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
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            let candidate = &v["candidates"][0];
                            let (delta, _) = Self::parse_candidate(candidate);
                            if !delta.is_empty() {
                                text_accum.push_str(&delta);
                                if let Some(cb) = on_token {
                                    cb(&delta);
                                }
                            }
                            if let Some(fr) = candidate["finishReason"].as_str() {
                                stop_reason = Some(fr.to_string());
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
    fn formats_assistant_role_as_model() {
        let messages = vec![Message::user("hi"), Message::assistant("hello", None)];
        let contents = GoogleProvider::format_contents(&messages);
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn parses_function_call_from_candidate() {
        let candidate = json!({
            "content": { "parts": [{ "functionCall": { "name": "read_file", "args": {"path": "a.rs"} } }] }
        });
        let (text, calls) = GoogleProvider::parse_candidate(&candidate);
        assert!(text.is_empty());
        assert_eq!(calls[0].name, "read_file");
    }
}
