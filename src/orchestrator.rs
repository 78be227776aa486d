//! Orchestration Loop
//!
//! The client-side core: drives model turns, detects tool-call intents,
//! dispatches them over the transport session, folds results back into the
//! conversation, and repeats until the model yields a final answer or the
//! round budget runs out.
//!
//! # State Machine
//!
//! `AWAITING_INPUT → MODEL_TURN → {TOOL_DISPATCH → MODEL_TURN}* →
//! FINAL_ANSWER → AWAITING_INPUT`. One user request runs to completion
//! (including all nested dispatch rounds) before the next is accepted; the
//! loop never interleaves requests within one context.
//!
//! # Failure Policy
//!
//! Anything the model can plausibly self-correct (unknown tool name, bad
//! arguments, handler failure) is folded into the conversation as an
//! error-status tool turn. Infrastructure failures (transport loss, provider
//! misconfiguration, timeouts) abort the current request only: the session
//! and the committed history survive for a retry.

use crate::context::{ConversationContext, ToolCallRequest, ToolCallResult, Turn};
use crate::mcp::client::{McpSession, SessionError};
use crate::mcp::protocol::Catalog;
use crate::mcp::transport::Transport;
use crate::metrics;
use crate::provider::{CompletionOutcome, ModelSelector, ProviderRouter, RouterError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default bound on consecutive tool-dispatch rounds per request
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Errors that abort a request
///
/// Tool-call-level failures never appear here; they are fed back into the
/// conversation instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Provider-router failure (unknown provider, HTTP failure, timeout)
    #[error(transparent)]
    Provider(#[from] RouterError),

    /// Transport-session failure (connection lost, call deadline expired)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request was cancelled between turns
    #[error("Request cancelled")]
    Cancelled,
}

/// Cancellation handle for a request in flight
///
/// Cancellation is observed between turns, never mid-call, so the history
/// stays consistent: a dispatch round is committed whole or not at all.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation of the current request
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The client-side orchestration loop
///
/// Owns the conversation context, the provider router, and the transport
/// session to one server. Independent instances (distinct sessions) share
/// nothing and may run concurrently.
pub struct Orchestrator<T>
where
    T: Transport,
{
    session: McpSession<T>,
    router: ProviderRouter,
    context: ConversationContext,
    catalog: Catalog,
    max_tool_rounds: usize,
    cancel: CancelHandle,
}

impl<T> Orchestrator<T>
where
    T: Transport,
{
    /// Create an orchestrator over an un-initialized session
    pub fn new(session: McpSession<T>, router: ProviderRouter, context: ConversationContext) -> Self {
        Self {
            session,
            router,
            context,
            catalog: Catalog::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            cancel: CancelHandle::default(),
        }
    }

    /// Set the bound on consecutive tool-dispatch rounds per request
    pub fn with_max_tool_rounds(mut self, max: usize) -> Self {
        self.max_tool_rounds = max;
        self
    }

    /// Initialize the session and discover the server catalog
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.session.initialize().await?;
        self.catalog = self.session.discover().await?;
        metrics::SESSIONS_CONNECTED_TOTAL.inc();
        Ok(())
    }

    /// The discovered tool/resource catalog
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Read-only view of the conversation context
    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Handle for cancelling a request between turns
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Switch the active model selector
    ///
    /// Takes effect on the next model turn. An unknown provider is rejected
    /// without touching the previous selector or the history.
    pub fn switch_model(&mut self, selector: ModelSelector) -> Result<(), RouterError> {
        if !self.router.has_provider(selector.provider()) {
            return Err(RouterError::UnknownProvider(
                selector.provider().to_string(),
            ));
        }
        self.context.set_selector(selector);
        Ok(())
    }

    /// Process one user request to completion
    ///
    /// Appends the user turn, then alternates model turns and tool-dispatch
    /// rounds until the model yields a final answer or the round budget is
    /// exhausted (which forces a synthesized truncation answer).
    ///
    /// # Errors
    ///
    /// Infrastructure failures abort the request. The history keeps every
    /// committed turn, including the assistant turn that recorded a failed
    /// round's requests, so the failure is visible on retry.
    pub async fn process_request(&mut self, query: &str) -> Result<String, OrchestratorError> {
        self.cancel.reset();
        self.context.push_user(query);

        let started = Instant::now();
        let result = self.drive_request().await;

        let status = match &result {
            Ok(_) => "ok",
            Err(OrchestratorError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        metrics::REQUESTS_TOTAL.with_label_values(&[status]).inc();
        metrics::REQUEST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        result
    }

    async fn drive_request(&mut self) -> Result<String, OrchestratorError> {
        let mut rounds = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Request cancelled between turns");
                return Err(OrchestratorError::Cancelled);
            }

            match self.model_turn().await? {
                CompletionOutcome::Final(answer) => {
                    self.context.push_assistant(Turn::assistant(answer.clone()));
                    return Ok(answer);
                }
                CompletionOutcome::ToolCalls { text, requests } => {
                    if rounds >= self.max_tool_rounds {
                        let notice = format!(
                            "Tool-call budget exhausted after {} rounds; answering with the \
                             information gathered so far. Narrow the query or raise the limit \
                             to let the model keep going.",
                            rounds
                        );
                        tracing::warn!("{}", notice);
                        self.context.push_assistant(Turn::assistant(notice.clone()));
                        return Ok(notice);
                    }

                    self.context
                        .push_assistant(Turn::assistant_tool_calls(text, requests.clone()));
                    self.dispatch_round(&requests).await?;
                    rounds += 1;
                }
            }
        }
    }

    /// One MODEL_TURN: route the full context and catalog to the active model
    async fn model_turn(&mut self) -> Result<CompletionOutcome, OrchestratorError> {
        let selector = self.context.selector().clone();
        tracing::debug!("Model turn via {} ({} turns)", selector, self.context.len());

        let started = Instant::now();
        let outcome = self
            .router
            .complete(
                &selector,
                self.context.system_prompt(),
                self.context.turns(),
                &self.catalog.tools,
            )
            .await;
        metrics::PROVIDER_REQUEST_DURATION_SECONDS
            .with_label_values(&[selector.provider()])
            .observe(started.elapsed().as_secs_f64());

        let label = match &outcome {
            Ok(CompletionOutcome::Final(_)) => "final",
            Ok(CompletionOutcome::ToolCalls { .. }) => "tool_calls",
            Err(_) => "error",
        };
        metrics::MODEL_TURNS_TOTAL
            .with_label_values(&[selector.provider(), label])
            .inc();

        Ok(outcome?)
    }

    /// One TOOL_DISPATCH round, committed to history atomically
    ///
    /// Calls run sequentially in the order the model emitted them; tool turns
    /// mirror that order. A transport failure drops the whole buffered round
    /// and aborts the request, leaving only the assistant turn that recorded
    /// the requests.
    async fn dispatch_round(
        &mut self,
        requests: &[ToolCallRequest],
    ) -> Result<(), OrchestratorError> {
        let mut round = Vec::with_capacity(requests.len());

        for request in requests {
            let result = self.dispatch_one(request).await?;
            round.push(Turn::tool_result(&result));
        }

        self.context.commit_round(round);
        Ok(())
    }

    async fn dispatch_one(
        &mut self,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResult, OrchestratorError> {
        // Tool names must exist in the catalog known at dispatch time; a miss
        // is fed back to the model rather than raised to the caller
        if !self.catalog.has_tool(&request.name) {
            tracing::warn!("Model requested unknown tool '{}'", request.name);
            metrics::TOOL_DISPATCHES_TOTAL
                .with_label_values(&[request.name.as_str(), "unknown"])
                .inc();
            return Ok(ToolCallResult::error(
                &request.id,
                format!(
                    "Unknown tool: '{}' is not in the discovered catalog",
                    request.name
                ),
            ));
        }

        tracing::info!("Dispatching tool call: {} ({})", request.name, request.id);

        let started = Instant::now();
        let outcome = self.session.call(request).await;
        metrics::TOOL_DISPATCH_DURATION_SECONDS
            .with_label_values(&[request.name.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                let status = match result.status {
                    crate::context::CallStatus::Ok => "ok",
                    crate::context::CallStatus::Error => "error",
                };
                metrics::TOOL_DISPATCHES_TOTAL
                    .with_label_values(&[request.name.as_str(), status])
                    .inc();
                Ok(result)
            }
            Err(e) => {
                tracing::error!("Tool dispatch failed at transport level: {}", e);
                metrics::TOOL_DISPATCHES_TOTAL
                    .with_label_values(&[request.name.as_str(), "transport_error"])
                    .inc();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::SessionState;
    use crate::mcp::protocol::{McpRequest, McpResponse, ToolDescriptor};
    use crate::provider::CompletionBackend;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

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
                .ok_or_else(|| RouterError::Request("script exhausted".to_string()))
        }
    }

    /// Transport that answers every tools/call with a fixed payload
    struct EchoToolTransport {
        last_request: Option<McpRequest>,
    }

    #[allow(async_fn_in_trait)]
    impl Transport for EchoToolTransport {
        async fn send(&mut self, request: &McpRequest) -> Result<()> {
            self.last_request = Some(request.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<McpResponse> {
            let request = self.last_request.take().expect("recv before send");
            Ok(McpResponse::ok(
                request.id,
                json!({"status": "ok", "payload": {"echoed": true}}),
            ))
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn tool_call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    fn orchestrator_with(
        outcomes: Vec<CompletionOutcome>,
        catalog: Catalog,
    ) -> Orchestrator<EchoToolTransport> {
        let mut session = McpSession::new(EchoToolTransport { last_request: None });
        // Tests drive the loop directly; skip the wire handshake
        session_set_ready(&mut session);

        let mut router = ProviderRouter::new();
        router.insert("openai", Box::new(ScriptedBackend::new(outcomes)));

        let context =
            ConversationContext::new("grid assistant", "openai:gpt-4o".parse().unwrap());

        let mut orchestrator = Orchestrator::new(session, router, context);
        orchestrator.catalog = catalog;
        orchestrator
    }

    fn session_set_ready(session: &mut McpSession<EchoToolTransport>) {
        // Same-crate test helper: state is private but visible to this module
        // through a setter used only in tests
        session.set_state_for_tests(SessionState::Ready);
    }

    fn catalog_with(names: &[&str]) -> Catalog {
        Catalog {
            tools: names
                .iter()
                .map(|name| ToolDescriptor {
                    name: (*name).to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                })
                .collect(),
            resources: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_plain_final_answer() {
        let mut orchestrator = orchestrator_with(
            vec![CompletionOutcome::Final("all stable".to_string())],
            catalog_with(&[]),
        );

        let answer = orchestrator.process_request("status?").await.unwrap();
        assert_eq!(answer, "all stable");
        // user + assistant
        assert_eq!(orchestrator.context().len(), 2);
    }

    #[tokio::test]
    async fn test_round_budget_forces_truncation_answer() {
        // The model asks for a tool on every turn, forever
        let endless: Vec<CompletionOutcome> = (0..20)
            .map(|i| CompletionOutcome::ToolCalls {
                text: None,
                requests: vec![tool_call(&format!("call_{i}"), "analyze_load_pattern")],
            })
            .collect();

        let mut orchestrator =
            orchestrator_with(endless, catalog_with(&["analyze_load_pattern"]))
                .with_max_tool_rounds(3);

        let answer = orchestrator.process_request("loop forever").await.unwrap();
        assert!(answer.contains("budget exhausted after 3 rounds"));

        // user + 3×(assistant, tool) + truncation assistant
        assert_eq!(orchestrator.context().len(), 8);
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_back_instead_of_raising() {
        let mut orchestrator = orchestrator_with(
            vec![
                CompletionOutcome::ToolCalls {
                    text: None,
                    requests: vec![tool_call("call_1", "nonexistent")],
                },
                CompletionOutcome::Final("recovered".to_string()),
            ],
            catalog_with(&["analyze_load_pattern"]),
        );

        let answer = orchestrator.process_request("try a bad tool").await.unwrap();
        assert_eq!(answer, "recovered");

        let tool_turn = &orchestrator.context().turns()[2];
        assert_eq!(tool_turn.role, crate::context::Role::Tool);
        assert!(tool_turn.content.render().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_switch_model_rejects_unknown_provider() {
        let mut orchestrator =
            orchestrator_with(vec![], catalog_with(&[]));

        let err = orchestrator
            .switch_model("mystery:model-x".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownProvider(_)));

        // Previous selector untouched
        assert_eq!(orchestrator.context().selector().provider(), "openai");
    }

    /// Backend that cancels the request while its first model turn runs
    struct CancellingBackend {
        inner: ScriptedBackend,
        handle: CancelHandle,
    }

    #[async_trait]
    impl CompletionBackend for CancellingBackend {
        async fn complete(
            &self,
            model: &str,
            system_prompt: &str,
            turns: &[Turn],
            tools: &[ToolDescriptor],
        ) -> Result<CompletionOutcome, RouterError> {
            self.handle.cancel();
            self.inner.complete(model, system_prompt, turns, tools).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_between_turns_keeps_history_consistent() {
        let mut session = McpSession::new(EchoToolTransport { last_request: None });
        session_set_ready(&mut session);

        let context =
            ConversationContext::new("grid assistant", "openai:gpt-4o".parse().unwrap());
        let mut orchestrator =
            Orchestrator::new(session, ProviderRouter::new(), context);
        orchestrator.catalog = catalog_with(&["analyze_load_pattern"]);

        // The backend cancels mid-flight; the in-progress dispatch round must
        // still commit whole before the loop observes the cancellation
        let mut router = ProviderRouter::new();
        router.insert(
            "openai",
            Box::new(CancellingBackend {
                inner: ScriptedBackend::new(vec![
                    CompletionOutcome::ToolCalls {
                        text: None,
                        requests: vec![tool_call("call_1", "analyze_load_pattern")],
                    },
                    CompletionOutcome::Final("fresh answer".to_string()),
                ]),
                handle: orchestrator.cancel_handle(),
            }),
        );
        orchestrator.router = router;

        let err = orchestrator.process_request("query").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));

        // user + assistant + committed tool turn; the round is whole
        assert_eq!(orchestrator.context().len(), 3);
        assert_eq!(
            orchestrator.context().turns()[2].tool_call_id.as_deref(),
            Some("call_1")
        );

        // A fresh request clears the flag and runs to completion
        let answer = orchestrator.process_request("query again").await.unwrap();
        assert_eq!(answer, "fresh answer");
    }
}
