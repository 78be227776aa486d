//! Anthropic Messages backend
//!
//! Drives the Anthropic `/v1/messages` API. Unlike the Chat Completions
//! family, this provider passes tool-call arguments as *native* JSON
//! structures inside `tool_use` content blocks, and expects tool results to
//! come back as `tool_result` blocks inside a user message. Consecutive tool
//! results are folded into a single user message so multi-call rounds
//! serialize the way the API expects.

use crate::context::{Role, ToolCallRequest, Turn};
use crate::mcp::protocol::ToolDescriptor;
use crate::provider::{CompletionBackend, CompletionOutcome, RouterError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Messages API revision header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Sampling temperature for operational tasks
const TEMPERATURE: f64 = 0.3;

/// Completion token budget per model turn
const MAX_TOKENS: u32 = 2000;

/// Backend for the Anthropic Messages API
pub struct AnthropicBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl AnthropicBackend {
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
impl CompletionBackend for AnthropicBackend {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, RouterError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_request_body(model, system_prompt, turns, tools);

        let mut request = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
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

        parse_messages_response(&payload)
    }
}

/// Build the Messages API request body
///
/// The system prompt rides in the top-level `system` field. Assistant turns
/// carrying tool calls become `tool_use` blocks with native argument
/// structures; tool turns accumulate into `tool_result` blocks on one user
/// message per dispatch round.
pub(crate) fn build_request_body(
    model: &str,
    system_prompt: &str,
    turns: &[Turn],
    tools: &[ToolDescriptor],
) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = Vec::new();
    let mut pending_results: Vec<serde_json::Value> = Vec::new();

    let flush_results = |messages: &mut Vec<serde_json::Value>,
                         pending: &mut Vec<serde_json::Value>| {
        if !pending.is_empty() {
            messages.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for turn in turns {
        match turn.role {
            Role::Tool => {
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": turn.tool_call_id.clone().unwrap_or_default(),
                    "content": turn.content.render(),
                }));
            }
            Role::User => {
                flush_results(&mut messages, &mut pending_results);
                messages.push(json!({"role": "user", "content": turn.content.render()}));
            }
            Role::Assistant if turn.has_tool_calls() => {
                flush_results(&mut messages, &mut pending_results);
                let mut blocks: Vec<serde_json::Value> = Vec::new();
                let text = turn.content.render();
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in &turn.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Assistant => {
                flush_results(&mut messages, &mut pending_results);
                messages.push(json!({"role": "assistant", "content": turn.content.render()}));
            }
            Role::System => {
                // System context is carried in the top-level field; fold any
                // stray system turn into a user message to keep ordering
                flush_results(&mut messages, &mut pending_results);
                messages.push(json!({"role": "user", "content": turn.content.render()}));
            }
        }
    }
    flush_results(&mut messages, &mut pending_results);

    let mut body = json!({
        "model": model,
        "system": system_prompt,
        "messages": messages,
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
    });

    if !tools.is_empty() {
        let formatted: Vec<serde_json::Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        body["tools"] = json!(formatted);
    }

    body
}

/// Normalize a Messages API response into a [`CompletionOutcome`]
pub(crate) fn parse_messages_response(
    payload: &serde_json::Value,
) -> Result<CompletionOutcome, RouterError> {
    let Some(blocks) = payload["content"].as_array() else {
        return Err(RouterError::Malformed(
            "response has no content array".to_string(),
        ));
    };

    let mut text_parts: Vec<&str> = Vec::new();
    let mut requests: Vec<ToolCallRequest> = Vec::new();

    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text);
                }
            }
            Some("tool_use") => {
                let name = block["name"]
                    .as_str()
                    .ok_or_else(|| {
                        RouterError::Malformed("tool_use block without a name".to_string())
                    })?
                    .to_string();
                let id = block["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4()));
                // Arguments are already native structures here
                let arguments = if block["input"].is_object() {
                    block["input"].clone()
                } else {
                    json!({})
                };
                requests.push(ToolCallRequest {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    let text = text_parts.join("\n");
    if requests.is_empty() {
        Ok(CompletionOutcome::Final(text))
    } else {
        Ok(CompletionOutcome::ToolCalls {
            text: if text.is_empty() { None } else { Some(text) },
            requests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolCallResult;

    #[test]
    fn test_system_prompt_rides_top_level() {
        let turns = vec![Turn::user("What is the outage risk?")];
        let body = build_request_body("claude-3-5-sonnet-20241022", "grid assistant", &turns, &[]);

        assert_eq!(body["system"], "grid assistant");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_tool_catalog_uses_native_schema_field() {
        let tools = vec![ToolDescriptor {
            name: "predict_outage_risk".to_string(),
            description: "Predict outage risk".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let body = build_request_body("claude-3-5-sonnet-20241022", "s", &[], &tools);

        assert_eq!(body["tools"][0]["name"], "predict_outage_risk");
        assert!(body["tools"][0]["input_schema"].is_object());
        assert!(body["tools"][0].get("function").is_none());
    }

    #[test]
    fn test_recorded_calls_become_tool_use_blocks() {
        let call = ToolCallRequest {
            id: "toolu_1".to_string(),
            name: "analyze_load_pattern".to_string(),
            arguments: json!({"dataset_id": "hourly_load"}),
        };
        let turns = vec![
            Turn::user("analyze"),
            Turn::assistant_tool_calls(Some("Checking the data.".to_string()), vec![call]),
        ];

        let body = build_request_body("claude-3-5-sonnet-20241022", "s", &turns, &[]);
        let content = body["messages"][1]["content"].as_array().unwrap();

        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "tool_use");
        // Native structure, not a string
        assert_eq!(content[1]["input"]["dataset_id"], "hourly_load");
    }

    #[test]
    fn test_consecutive_tool_results_fold_into_one_message() {
        let calls = vec![
            ToolCallRequest {
                id: "toolu_1".to_string(),
                name: "analyze_load_pattern".to_string(),
                arguments: json!({}),
            },
            ToolCallRequest {
                id: "toolu_2".to_string(),
                name: "predict_outage_risk".to_string(),
                arguments: json!({}),
            },
        ];
        let turns = vec![
            Turn::user("analyze"),
            Turn::assistant_tool_calls(None, calls),
            Turn::tool_result(&ToolCallResult::ok("toolu_1", json!({"trend": "stable"}))),
            Turn::tool_result(&ToolCallResult::ok("toolu_2", json!({"risk": "low"}))),
        ];

        let body = build_request_body("claude-3-5-sonnet-20241022", "s", &turns, &[]);
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 3);
        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["tool_use_id"], "toolu_2");
    }

    #[test]
    fn test_parse_final_answer_joins_text_blocks() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "Risk is low."},
                {"type": "text", "text": "No action needed."}
            ],
            "stop_reason": "end_turn"
        });

        let outcome = parse_messages_response(&payload).unwrap();
        assert_eq!(
            outcome,
            CompletionOutcome::Final("Risk is low.\nNo action needed.".to_string())
        );
    }

    #[test]
    fn test_parse_tool_use_keeps_native_arguments() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_9", "name": "analyze_load_pattern",
                 "input": {"dataset_id": "hourly_load", "window_hours": 48}}
            ],
            "stop_reason": "tool_use"
        });

        let outcome = parse_messages_response(&payload).unwrap();
        match outcome {
            CompletionOutcome::ToolCalls { text, requests } => {
                assert_eq!(text.as_deref(), Some("Let me check."));
                assert_eq!(requests[0].id, "toolu_9");
                assert_eq!(requests[0].arguments["window_hours"], 48);
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_preserves_emitted_order() {
        let payload = json!({
            "content": [
                {"type": "tool_use", "id": "a", "name": "first", "input": {}},
                {"type": "tool_use", "id": "b", "name": "second", "input": {}}
            ],
            "stop_reason": "tool_use"
        });

        let outcome = parse_messages_response(&payload).unwrap();
        match outcome {
            CompletionOutcome::ToolCalls { requests, .. } => {
                let ids: Vec<&str> = requests.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let payload = json!({"stop_reason": "end_turn"});
        let err = parse_messages_response(&payload).unwrap_err();
        assert!(matches!(err, RouterError::Malformed(_)));
    }
}
