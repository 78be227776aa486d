//! Conversation Context
//!
//! This module owns the per-session conversation state: the ordered turn
//! history, the tool-call request/result shapes exchanged with the provider
//! router and the transport session, and the active model selector.
//!
//! # Invariants
//!
//! - Turn history is append-only. Committed turns are never reordered or
//!   mutated; the orchestration loop extends the history one turn (or one
//!   buffered dispatch round) at a time.
//! - Every `tool` turn carries a `tool_call_id` matching exactly one request
//!   recorded on a preceding `assistant` turn.
//! - One context per client session. Contexts are never shared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ModelSelector;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (serialized ahead of the history by backends)
    System,

    /// User query
    User,

    /// Model output (final text or recorded tool-call requests)
    Assistant,

    /// Tool-call result fed back to the model
    Tool,
}

/// Turn content: plain text or a structured payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TurnContent {
    /// Plain text content
    Text(String),

    /// Structured payload (tool results, catalog snapshots)
    Data(serde_json::Value),
}

impl TurnContent {
    /// Render the content as a string suitable for a provider message body
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Data(v) => v.to_string(),
        }
    }

    /// Borrow the text content, if this is a text turn
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Data(_) => None,
        }
    }
}

impl From<String> for TurnContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for TurnContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A tool-call intent extracted from model output
///
/// Produced by the provider router's normalization pass and consumed exactly
/// once by the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Unique identifier for this call (provider-assigned or synthesized)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments for the tool (must match the tool's declared schema)
    pub arguments: serde_json::Value,
}

/// Outcome status of a dispatched tool call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The handler ran and produced a payload
    Ok,

    /// The call failed in a way the model can see and correct
    Error,
}

/// Result of a dispatched tool call
///
/// Exactly one result exists per request; `id` matches the originating
/// [`ToolCallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    /// Identifier of the request this result answers
    pub id: String,

    /// Whether the call succeeded
    pub status: CallStatus,

    /// Handler payload on success, descriptive error payload otherwise
    pub payload: serde_json::Value,
}

impl ToolCallResult {
    /// Build a success result for the given request id
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            status: CallStatus::Ok,
            payload,
        }
    }

    /// Build an error result with a descriptive payload
    ///
    /// Error results are fed back into the conversation so the model can
    /// self-correct; they are not raised out of the loop.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: CallStatus::Error,
            payload: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// One atomic unit of conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Author role
    pub role: Role,

    /// Turn content
    pub content: TurnContent,

    /// For `tool` turns: the id of the request this turn answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For `assistant` turns: the tool-call requests recorded on this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// When the turn was appended
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a user turn
    pub fn user(content: impl Into<TurnContent>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant turn carrying a final answer
    pub fn assistant(content: impl Into<TurnContent>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant turn recording tool-call requests
    ///
    /// The request order is preserved; tool turns answering these requests
    /// must be appended in the same order.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(content.unwrap_or_default()),
            tool_call_id: None,
            tool_calls: calls,
            timestamp: Utc::now(),
        }
    }

    /// Create a tool turn from a dispatch result, preserving the id linkage
    pub fn tool_result(result: &ToolCallResult) -> Self {
        let payload = match result.status {
            CallStatus::Ok => result.payload.clone(),
            CallStatus::Error => serde_json::json!({
                "status": "error",
                "payload": result.payload,
            }),
        };
        Self {
            role: Role::Tool,
            content: TurnContent::Data(payload),
            tool_call_id: Some(result.id.clone()),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this turn records tool-call requests
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Per-session conversation state
///
/// Owns the turn history and the active model selector. Lifetime is one
/// client session; the context is dropped on client exit and never shared
/// across sessions. The system prompt is held apart from the history so the
/// turn sequence contains only user/assistant/tool turns.
#[derive(Debug)]
pub struct ConversationContext {
    system_prompt: String,
    turns: Vec<Turn>,
    selector: ModelSelector,
}

impl ConversationContext {
    /// Create a context with the given system prompt and initial selector
    pub fn new(system_prompt: impl Into<String>, selector: ModelSelector) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns: Vec::new(),
            selector,
        }
    }

    /// The system prompt sent ahead of the history on every model turn
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The currently active model selector
    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Replace the active selector
    ///
    /// Callers must validate the selector against the provider router first;
    /// this method performs the swap only. Takes effect on the next model
    /// turn.
    pub fn set_selector(&mut self, selector: ModelSelector) {
        tracing::info!("Model changed to: {}", selector);
        self.selector = selector;
    }

    /// Append a user turn
    pub fn push_user(&mut self, query: impl Into<TurnContent>) {
        self.turns.push(Turn::user(query));
    }

    /// Append an assistant turn
    pub fn push_assistant(&mut self, turn: Turn) {
        debug_assert_eq!(turn.role, Role::Assistant);
        self.turns.push(turn);
    }

    /// Append a fully-dispatched tool round as a unit
    ///
    /// The orchestration loop buffers tool turns while a dispatch round is in
    /// flight and commits them here, so a round is either fully recorded or
    /// absent from the history.
    pub fn commit_round(&mut self, round: Vec<Turn>) {
        self.turns.extend(round);
    }

    /// Read-only snapshot of the turn history
    ///
    /// Serves the `context` inspection directive without mutating anything.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns in the history
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ModelSelector {
        "openai:gpt-4o".parse().unwrap()
    }

    fn request(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "analyze_load_pattern".to_string(),
            arguments: serde_json::json!({"dataset_id": "hourly_load"}),
        }
    }

    #[test]
    fn test_history_is_extended_in_order() {
        let mut ctx = ConversationContext::new("prompt", selector());
        ctx.push_user("first");
        ctx.push_assistant(Turn::assistant("answer"));
        ctx.push_user("second");

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.turns()[0].role, Role::User);
        assert_eq!(ctx.turns()[1].role, Role::Assistant);
        assert_eq!(ctx.turns()[2].role, Role::User);
    }

    #[test]
    fn test_tool_turn_preserves_call_id() {
        let result = ToolCallResult::ok("call_1", serde_json::json!({"max_load": 65000}));
        let turn = Turn::tool_result(&result);

        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_error_result_is_flagged_in_payload() {
        let result = ToolCallResult::error("call_2", "unknown tool: nonexistent");
        let turn = Turn::tool_result(&result);

        match &turn.content {
            TurnContent::Data(v) => {
                assert_eq!(v["status"], "error");
                assert!(v["payload"]["error"]
                    .as_str()
                    .unwrap()
                    .contains("nonexistent"));
            }
            TurnContent::Text(_) => panic!("tool turn should carry structured content"),
        }
    }

    #[test]
    fn test_commit_round_extends_as_unit() {
        let mut ctx = ConversationContext::new("prompt", selector());
        ctx.push_user("query");
        ctx.push_assistant(Turn::assistant_tool_calls(None, vec![request("call_1")]));

        let round = vec![Turn::tool_result(&ToolCallResult::ok(
            "call_1",
            serde_json::json!({}),
        ))];
        ctx.commit_round(round);

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.turns()[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_selector_switch_does_not_touch_history() {
        let mut ctx = ConversationContext::new("prompt", selector());
        ctx.push_user("query");
        ctx.push_assistant(Turn::assistant("answer"));

        let before: Vec<String> = ctx.turns().iter().map(|t| t.content.render()).collect();
        ctx.set_selector("anthropic:claude-3-5-sonnet-20241022".parse().unwrap());
        let after: Vec<String> = ctx.turns().iter().map(|t| t.content.render()).collect();

        assert_eq!(before, after);
        assert_eq!(ctx.selector().provider(), "anthropic");
    }

    #[test]
    fn test_system_prompt_is_not_a_turn() {
        let ctx = ConversationContext::new("You are a grid operations assistant.", selector());
        assert!(ctx.is_empty());
        assert_eq!(
            ctx.system_prompt(),
            "You are a grid operations assistant."
        );
    }
}
