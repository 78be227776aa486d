//! End-to-end orchestration loop scenarios
//!
//! These tests drive the real loop against an in-process MCP server (full
//! handshake and dispatch over the transport trait) and a scripted provider
//! backend, so every turn travels the same paths as production traffic.

use anyhow::Result;
use async_trait::async_trait;
use gridops_assistant::context::{ConversationContext, Role, ToolCallRequest, Turn};
use gridops_assistant::mcp::client::{McpSession, SessionError};
use gridops_assistant::mcp::protocol::{McpRequest, McpResponse, ToolDescriptor};
use gridops_assistant::mcp::transport::Transport;
use gridops_assistant::orchestrator::{Orchestrator, OrchestratorError};
use gridops_assistant::provider::{
    CompletionBackend, CompletionOutcome, ModelSelector, ProviderRouter, RouterError,
};
use gridops_assistant::server::{tool_fn, McpServer};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Transport that runs requests directly against an in-process server
struct InProcessTransport {
    server: McpServer,
    pending: Option<McpResponse>,
    /// When true, tools/call responses never arrive
    stall_tool_calls: bool,
}

impl InProcessTransport {
    fn new(server: McpServer) -> Self {
        Self {
            server,
            pending: None,
            stall_tool_calls: false,
        }
    }
}

#[allow(async_fn_in_trait)]
impl Transport for InProcessTransport {
    async fn send(&mut self, request: &McpRequest) -> Result<()> {
        if self.stall_tool_calls && request.method == "tools/call" {
            self.pending = None;
            return Ok(());
        }
        self.pending = Some(self.server.handle(request.clone()).await);
        Ok(())
    }

    async fn recv(&mut self) -> Result<McpResponse> {
        match self.pending.take() {
            Some(response) => Ok(response),
            // Simulates a server that accepted the call but never answers
            None => futures::future::pending().await,
        }
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Backend that replays a scripted sequence of outcomes
struct ScriptedBackend {
    outcomes: Mutex<VecDeque<CompletionOutcome>>,
}

impl ScriptedBackend {
    fn new(outcomes: Vec<CompletionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        _model: &str,
        _system_prompt: &str,
        _turns: &[Turn],
        _tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, RouterError> {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RouterError::Request("backend script exhausted".to_string()))
    }
}

/// Server publishing the load-analysis tool the scenarios exercise
fn analysis_server() -> McpServer {
    let mut server = McpServer::new("grid-operations", "0.1.0");
    server
        .register_tool(
            ToolDescriptor {
                name: "analyze_load".to_string(),
                description: "Analyze load patterns for a grid region and time window"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "region": {"type": "string"},
                        "hours": {"type": "integer"}
                    },
                    "required": ["region", "hours"]
                }),
            },
            tool_fn(|args| {
                Ok(json!({
                    "region": args["region"],
                    "window_hours": args["hours"],
                    "max_load": "65,000 MW",
                    "min_load": "40,000 MW",
                    "trend": "increasing evening peaks"
                }))
            }),
        )
        .unwrap();
    server
}

fn analyze_call(id: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: "analyze_load".to_string(),
        arguments: json!({"region": "Northeast", "hours": 48}),
    }
}

async fn connected_orchestrator(
    server: McpServer,
    outcomes: Vec<CompletionOutcome>,
    call_timeout: Duration,
) -> Orchestrator<InProcessTransport> {
    let transport = InProcessTransport::new(server);
    build_orchestrator(transport, outcomes, call_timeout).await
}

async fn build_orchestrator(
    transport: InProcessTransport,
    outcomes: Vec<CompletionOutcome>,
    call_timeout: Duration,
) -> Orchestrator<InProcessTransport> {
    let session = McpSession::new(transport).with_call_timeout(call_timeout);

    let mut router = ProviderRouter::new();
    router.insert("openai", Box::new(ScriptedBackend::new(outcomes)));

    let selector: ModelSelector = "openai:gpt-4o".parse().unwrap();
    let context = ConversationContext::new("You are a grid operations assistant.", selector);

    let mut orchestrator = Orchestrator::new(session, router, context);
    orchestrator.connect().await.expect("connect failed");
    orchestrator
}

#[tokio::test]
async fn analyze_load_scenario_yields_exactly_four_turns() {
    let mut orchestrator = connected_orchestrator(
        analysis_server(),
        vec![
            CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![analyze_call("call_1")],
            },
            CompletionOutcome::Final(
                "Evening peaks in the Northeast have been increasing over the last 48 hours."
                    .to_string(),
            ),
        ],
        Duration::from_secs(5),
    )
    .await;

    let answer = orchestrator
        .process_request("Analyze load patterns in the Northeast region for the last 48 hours")
        .await
        .unwrap();
    assert!(answer.contains("Evening peaks"));

    let turns = orchestrator.context().turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].tool_calls.len(), 1);
    assert_eq!(turns[2].role, Role::Tool);
    assert_eq!(turns[3].role, Role::Assistant);

    // The tool turn carries the structured summary from the registry
    let payload = turns[2].content.render();
    assert!(payload.contains("increasing evening peaks"));
}

#[tokio::test]
async fn unknown_tool_yields_error_turn_and_loop_continues() {
    let mut orchestrator = connected_orchestrator(
        analysis_server(),
        vec![
            CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![ToolCallRequest {
                    id: "call_bad".to_string(),
                    name: "nonexistent".to_string(),
                    arguments: json!({}),
                }],
            },
            CompletionOutcome::Final("Recovered after the bad call.".to_string()),
        ],
        Duration::from_secs(5),
    )
    .await;

    let answer = orchestrator.process_request("try something odd").await.unwrap();
    assert_eq!(answer, "Recovered after the bad call.");

    let turns = orchestrator.context().turns();
    let tool_turn = &turns[2];
    assert_eq!(tool_turn.role, Role::Tool);
    assert_eq!(tool_turn.tool_call_id.as_deref(), Some("call_bad"));
    assert!(tool_turn.content.render().contains("Unknown tool"));
}

#[tokio::test]
async fn schema_rejection_feeds_back_so_the_model_can_correct() {
    let mut orchestrator = connected_orchestrator(
        analysis_server(),
        vec![
            // First attempt omits the required fields
            CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "analyze_load".to_string(),
                    arguments: json!({}),
                }],
            },
            // Second attempt is corrected
            CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![analyze_call("call_2")],
            },
            CompletionOutcome::Final("Done with corrected arguments.".to_string()),
        ],
        Duration::from_secs(5),
    )
    .await;

    let answer = orchestrator.process_request("analyze").await.unwrap();
    assert_eq!(answer, "Done with corrected arguments.");

    let turns = orchestrator.context().turns();
    // user, assistant, tool(error), assistant, tool(ok), assistant
    assert_eq!(turns.len(), 6);
    assert!(turns[2].content.render().contains("rejected"));
    assert!(turns[4].content.render().contains("max_load"));
}

#[tokio::test]
async fn every_tool_turn_matches_a_recorded_request() {
    let calls = vec![analyze_call("call_a"), analyze_call("call_b")];
    let mut orchestrator = connected_orchestrator(
        analysis_server(),
        vec![
            CompletionOutcome::ToolCalls {
                text: Some("Running two analyses.".to_string()),
                requests: calls,
            },
            CompletionOutcome::Final("Both analyses done.".to_string()),
        ],
        Duration::from_secs(5),
    )
    .await;

    orchestrator.process_request("compare two windows").await.unwrap();

    let turns = orchestrator.context().turns();
    let recorded: Vec<&str> = turns
        .iter()
        .flat_map(|t| t.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();

    // Tool turns mirror the emitted order, and every id resolves to a
    // request recorded on a preceding assistant turn
    let mut seen = Vec::new();
    for turn in turns {
        match turn.role {
            Role::Assistant => {
                for call in &turn.tool_calls {
                    seen.push(call.id.as_str());
                }
            }
            Role::Tool => {
                let id = turn.tool_call_id.as_deref().unwrap();
                assert!(seen.contains(&id), "tool turn {id} has no recorded request");
            }
            _ => {}
        }
    }
    assert_eq!(recorded, vec!["call_a", "call_b"]);

    let tool_ids: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::Tool)
        .map(|t| t.tool_call_id.as_deref().unwrap())
        .collect();
    assert_eq!(tool_ids, vec!["call_a", "call_b"]);
}

#[tokio::test]
async fn round_budget_always_terminates_in_a_final_answer() {
    for budget in 1..=4usize {
        let endless: Vec<CompletionOutcome> = (0..budget + 4)
            .map(|i| CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![analyze_call(&format!("call_{i}"))],
            })
            .collect();

        let mut orchestrator =
            connected_orchestrator(analysis_server(), endless, Duration::from_secs(5))
                .await
                .with_max_tool_rounds(budget);

        let answer = orchestrator.process_request("never stop").await.unwrap();
        assert!(
            answer.contains("budget exhausted"),
            "budget {budget} did not terminate with a truncation notice"
        );

        // user + budget×(assistant, tool) + final assistant
        assert_eq!(orchestrator.context().len(), 2 + 2 * budget);
    }
}

#[tokio::test]
async fn model_switch_applies_next_turn_without_touching_history() {
    let mut orchestrator = connected_orchestrator(
        analysis_server(),
        vec![
            CompletionOutcome::Final("first answer".to_string()),
            CompletionOutcome::Final("second answer".to_string()),
        ],
        Duration::from_secs(5),
    )
    .await;

    orchestrator.process_request("first question").await.unwrap();
    let before: Vec<String> = orchestrator
        .context()
        .turns()
        .iter()
        .map(|t| t.content.render())
        .collect();

    // Unknown provider: rejected, selector unchanged
    let err = orchestrator
        .switch_model("mystery:model-x".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, RouterError::UnknownProvider(_)));
    assert_eq!(orchestrator.context().selector().provider(), "openai");

    // Known provider: swapped, history untouched
    orchestrator
        .switch_model("openai:gpt-4-turbo".parse().unwrap())
        .unwrap();
    let after: Vec<String> = orchestrator
        .context()
        .turns()
        .iter()
        .map(|t| t.content.render())
        .collect();
    assert_eq!(before, after);

    orchestrator.process_request("second question").await.unwrap();
    assert_eq!(orchestrator.context().len(), 4);
}

#[tokio::test]
async fn dispatch_timeout_aborts_request_but_preserves_session_and_history() {
    let mut transport = InProcessTransport::new(analysis_server());
    transport.stall_tool_calls = true;

    let mut orchestrator = build_orchestrator(
        transport,
        vec![
            CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![analyze_call("call_1")],
            },
            CompletionOutcome::Final("fresh request succeeded".to_string()),
        ],
        Duration::from_millis(50),
    )
    .await;

    let err = orchestrator.process_request("analyze").await.unwrap_err();
    match err {
        OrchestratorError::Session(SessionError::Timeout(_)) => {}
        other => panic!("expected session timeout, got {other:?}"),
    }

    // The assistant turn that recorded the failed round's requests survives;
    // no tool turn was committed
    let turns = orchestrator.context().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].tool_calls.len(), 1);

    // A retry is a fresh request, not a resumed one
    let answer = orchestrator.process_request("analyze").await.unwrap();
    assert_eq!(answer, "fresh request succeeded");
}
