//! OpenAI Chat Completions backend
//!
//! Drives any OpenAI-compatible `/v1/chat/completions` endpoint. This family
//! of providers encodes tool-call arguments as *stringified JSON* inside
//! `function.arguments`; normalization parses them back into native values,
//! falling back to a `raw_input` wrapper when the model emits arguments that
//! do not parse.

use crate::context::{Role, ToolCallRequest, Turn};
use crate::mcp::protocol::ToolDescriptor;
use crate::provider::{CompletionBackend, CompletionOutcome, RouterError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Sampling temperature for operational tasks
const TEMPERATURE: f64 = 0.3;

/// Completion token budget per model turn
const MAX_TOKENS: u32 = 2000;

/// Backend for OpenAI-compatible Chat Completions APIs
pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl OpenAiBackend {
    /// Create a backend for the given endpoint
    pub fn new(base_url: &str, api_key: Option<String>, request_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, RouterError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = build_request_body(model, system_prompt, turns, tools);

        let mut request = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RouterError::Timeout(self.request_timeout.as_millis() as u64)
            } else {
                RouterError::Request(e.to_string())
            }
        })?;

        let response = response
            .error_for_status()
            .map_err(|e| RouterError::Request(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouterError::Malformed(e.to_string()))?;

        parse_chat_response(&payload)
    }
}

/// Build the Chat Completions request body
///
/// Assistant turns carrying tool calls are re-encoded with stringified
/// arguments; tool turns become `role: tool` messages linked by
/// `tool_call_id`.
pub(crate) fn build_request_body(
    model: &str,
    system_prompt: &str,
    turns: &[Turn],
    tools: &[ToolDescriptor],
) -> serde_json::Value {
    let mut messages = vec![json!({"role": "system", "content": system_prompt})];

    for turn in turns {
        match turn.role {
            Role::System => {
                messages.push(json!({"role": "system", "content": turn.content.render()}));
            }
            Role::User => {
                messages.push(json!({"role": "user", "content": turn.content.render()}));
            }
            Role::Assistant if turn.has_tool_calls() => {
                let tool_calls: Vec<serde_json::Value> = turn
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let text = turn.content.render();
                messages.push(json!({
                    "role": "assistant",
                    "content": if text.is_empty() { serde_json::Value::Null } else { json!(text) },
                    "tool_calls": tool_calls,
                }));
            }
            Role::Assistant => {
                messages.push(json!({"role": "assistant", "content": turn.content.render()}));
            }
            Role::Tool => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": turn.tool_call_id.clone().unwrap_or_default(),
                    "content": turn.content.render(),
                }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
    });

    if !tools.is_empty() {
        let formatted: Vec<serde_json::Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(formatted);
    }

    body
}

/// Normalize a Chat Completions response into a [`CompletionOutcome`]
pub(crate) fn parse_chat_response(
    payload: &serde_json::Value,
) -> Result<CompletionOutcome, RouterError> {
    let message = &payload["choices"][0]["message"];
    if !message.is_object() {
        return Err(RouterError::Malformed(
            "response has no choices[0].message".to_string(),
        ));
    }

    let text = message["content"].as_str().map(str::to_string);

    let Some(raw_calls) = message["tool_calls"].as_array().filter(|a| !a.is_empty()) else {
        return Ok(CompletionOutcome::Final(text.unwrap_or_default()));
    };

    let mut requests = Vec::with_capacity(raw_calls.len());
    for raw in raw_calls {
        let name = raw["function"]["name"]
            .as_str()
            .ok_or_else(|| RouterError::Malformed("tool call without a function name".to_string()))?
            .to_string();

        let id = raw["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));

        // Arguments arrive as stringified JSON; keep unparseable output
        // visible to the tool instead of dropping the call
        let arguments = match &raw["function"]["arguments"] {
            serde_json::Value::String(s) => serde_json::from_str(s)
                .unwrap_or_else(|_| json!({ "raw_input": s })),
            other if other.is_object() => other.clone(),
            _ => json!({}),
        };

        requests.push(ToolCallRequest {
            id,
            name,
            arguments,
        });
    }

    Ok(CompletionOutcome::ToolCalls {
        text: text.filter(|t| !t.is_empty()),
        requests,
    })
}
