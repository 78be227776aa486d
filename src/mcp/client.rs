//! MCP Session Layer
//!
//! High-level client for one MCP server connection: the initialize
//! handshake, catalog discovery, tool invocation, and resource reads.
//!
//! # Architecture
//!
//! The session is generic over the transport ([`Transport`]), so the same
//! code runs against a spawned server process or an in-memory pipe in tests.
//! Calls are serialized over the single transport with monotonically
//! increasing request ids; a response whose id does not match the in-flight
//! request is a protocol failure, never silently misattributed.
//!
//! # Error Mapping
//!
//! Server-side tool failures (unknown tool, schema rejection, handler
//! failure) come back as error-status [`ToolCallResult`]s: a failed tool call
//! is a valid protocol outcome, not a connection problem. Connection loss and
//! per-call deadline expiry surface as [`SessionError::Transport`] and
//! [`SessionError::Timeout`].
//!
//! # Usage
//!
//! ```ignore
//! let transport = StdioTransport::spawn("gridops", &["serve".to_string()]).await?;
//! let mut session = McpSession::new(transport);
//! session.initialize().await?;
//! let catalog = session.discover().await?;
//! let result = session.call(&request).await?;
//! ```

use crate::context::{ToolCallRequest, ToolCallResult};
use crate::mcp::protocol::{
    Catalog, InitializeParams, McpMethod, McpRequest, McpResponse, PeerInfo,
    ResourceDescriptor, ServerCapabilities, ToolDescriptor, CODE_RESOURCE_NOT_FOUND,
    PROTOCOL_VERSION,
};
use crate::mcp::retry::RetryConfig;
use crate::mcp::transport::Transport;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-call deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the session layer
///
/// Tool-call-level failures are *not* here: those become error-status
/// [`ToolCallResult`]s and flow back into the conversation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connection-level failure (process died, pipe closed)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// No response within the configured deadline
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// Malformed or out-of-contract message; fatal to the session
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// resources/read named a URI the server does not publish
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Operation attempted in the wrong session state
    #[error("Invalid session state: {0}")]
    State(String),
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is created but not initialized
    Created,

    /// Initialization handshake is in progress
    Initializing,

    /// Session is initialized and ready
    Ready,

    /// Session is disconnected
    Disconnected,
}

/// A resource payload returned by `resources/read`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContent {
    /// The URI that was read
    pub uri: String,

    /// MIME type of the payload
    pub mime_type: String,

    /// The payload itself
    pub payload: serde_json::Value,
}

/// One client's session to one MCP server
///
/// Single-owner: the session owns its transport exclusively, and one client
/// session maps to one server process.
pub struct McpSession<T>
where
    T: Transport,
{
    /// Underlying transport for sending/receiving messages
    transport: T,

    /// Next request ID (monotonically increasing)
    next_id: AtomicU64,

    /// Server capabilities (after initialization)
    server: Option<ServerCapabilities>,

    /// Catalog cache (after discovery)
    catalog: Catalog,

    /// Session state
    state: SessionState,

    /// Per-call deadline
    call_timeout: Duration,

    /// Retry policy for idempotent operations (handshake, discovery)
    retry: Option<RetryConfig>,
}

impl<T> McpSession<T>
where
    T: Transport,
{
    /// Create a new session over the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            server: None,
            catalog: Catalog::default(),
            state: SessionState::Created,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: None,
        }
    }

    /// Set the per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the retry policy for idempotent operations
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server capabilities, if the handshake has completed
    pub fn server(&self) -> Option<&ServerCapabilities> {
        self.server.as_ref()
    }

    /// Cached catalog from the last discovery
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Perform the initialize handshake
    ///
    /// # Errors
    ///
    /// Fails if the transport is down, the deadline expires, or the server
    /// returns an out-of-contract response.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::State(format!(
                "cannot initialize from {:?}",
                self.state
            )));
        }
        if !self.transport.is_connected() {
            return Err(SessionError::Transport(
                "transport is disconnected".to_string(),
            ));
        }

        self.state = SessionState::Initializing;
        tracing::info!("Initializing MCP session...");

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: PeerInfo {
                name: "gridops-assistant".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self
            .request_with_retry(McpMethod::Initialize, Some(json!(params)))
            .await?;

        let capabilities: ServerCapabilities = serde_json::from_value(result)
            .map_err(|e| SessionError::Protocol(format!("bad initialize response: {e}")))?;

        tracing::info!(
            "MCP session initialized: {} v{} (protocol {})",
            capabilities.server_info.name,
            capabilities.server_info.version,
            capabilities.protocol_version
        );

        self.server = Some(capabilities);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Fetch the full tool and resource catalog of the connected server
    ///
    /// Idempotent and retryable; the result is cached on the session.
    pub async fn discover(&mut self) -> Result<Catalog, SessionError> {
        self.ensure_ready()?;

        tracing::debug!("Discovering server catalog");

        let tools_result = self
            .request_with_retry(McpMethod::ToolsList, None)
            .await?;
        let tools: Vec<ToolDescriptor> = serde_json::from_value(tools_result["tools"].clone())
            .map_err(|e| SessionError::Protocol(format!("bad tools/list response: {e}")))?;

        let resources_result = self
            .request_with_retry(McpMethod::ResourcesList, None)
            .await?;
        let resources: Vec<ResourceDescriptor> =
            serde_json::from_value(resources_result["resources"].clone())
                .map_err(|e| SessionError::Protocol(format!("bad resources/list response: {e}")))?;

        let catalog = Catalog { tools, resources };

        tracing::info!(
            "Discovered {} tools and {} resources",
            catalog.tools.len(),
            catalog.resources.len()
        );
        for tool in &catalog.tools {
            tracing::debug!("  - {}", tool.name);
        }

        self.catalog = catalog.clone();
        Ok(catalog)
    }

    /// Dispatch a tool-call request and return exactly one result
    ///
    /// Tool-level failures on the server become an error-status result with
    /// the request's id, so the orchestration loop can feed them back to the
    /// model. Not retried: handlers may have side effects.
    pub async fn call(&mut self, request: &ToolCallRequest) -> Result<ToolCallResult, SessionError> {
        self.ensure_ready()?;

        tracing::debug!(
            "Calling tool '{}' (call id {})",
            request.name,
            request.id
        );

        let params = json!({
            "name": request.name,
            "arguments": request.arguments,
        });

        let rpc = self.next_request(McpMethod::ToolsCall, Some(params));
        let response = self.round_trip(&rpc).await?;

        match response.into_result() {
            Ok(result) => Ok(Self::result_from_payload(&request.id, &result)),
            Err(error) if error.is_tool_call_error() => {
                tracing::warn!("Tool '{}' rejected: {}", request.name, error);
                Ok(ToolCallResult::error(&request.id, error.message))
            }
            Err(error) => Err(SessionError::Protocol(error.to_string())),
        }
    }

    /// Read a resource by URI
    pub async fn read_resource(&mut self, uri: &str) -> Result<ResourceContent, SessionError> {
        self.ensure_ready()?;

        tracing::debug!("Reading resource: {}", uri);

        let rpc = self.next_request(McpMethod::ResourcesRead, Some(json!({ "uri": uri })));
        let response = self.round_trip(&rpc).await?;

        match response.into_result() {
            Ok(result) => Ok(ResourceContent {
                uri: uri.to_string(),
                mime_type: result["mimeType"].as_str().unwrap_or("application/json").to_string(),
                payload: result["payload"].clone(),
            }),
            Err(error) if error.code == CODE_RESOURCE_NOT_FOUND => {
                Err(SessionError::ResourceNotFound(uri.to_string()))
            }
            Err(error) => Err(SessionError::Protocol(error.to_string())),
        }
    }

    /// Interpret a `tools/call` result body as a [`ToolCallResult`]
    ///
    /// The invocation response shape is `{status, payload}`; a server that
    /// reports `status: error` produced a handler-level failure, which is a
    /// protocol outcome.
    fn result_from_payload(call_id: &str, result: &serde_json::Value) -> ToolCallResult {
        let payload = result.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        match result.get("status").and_then(|s| s.as_str()) {
            Some("error") => ToolCallResult {
                id: call_id.to_string(),
                status: crate::context::CallStatus::Error,
                payload,
            },
            _ => ToolCallResult::ok(call_id, payload),
        }
    }

    /// Build the next request with a fresh id
    fn next_request(&self, method: McpMethod, params: Option<serde_json::Value>) -> McpRequest {
        McpRequest::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            method.as_str().to_string(),
            params,
        )
    }

    /// Send a request and wait for its response under the call deadline
    async fn round_trip(&mut self, request: &McpRequest) -> Result<McpResponse, SessionError> {
        let deadline = self.call_timeout;
        let exchange = async {
            self.transport.send(request).await?;
            self.transport.recv().await
        };

        let response = match tokio::time::timeout(deadline, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(SessionError::Transport(e.to_string())),
            Err(_) => return Err(SessionError::Timeout(deadline.as_millis() as u64)),
        };

        if response.id != request.id {
            return Err(SessionError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }

        Ok(response)
    }

    /// Round-trip an idempotent request, retrying transient failures
    async fn request_with_retry(
        &mut self,
        method: McpMethod,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SessionError> {
        let Some(config) = self.retry.clone() else {
            let rpc = self.next_request(method, params);
            let response = self.round_trip(&rpc).await?;
            return response
                .into_result()
                .map_err(|e| SessionError::Protocol(e.to_string()));
        };

        let mut last_error = None;
        for attempt in 0..config.max_attempts {
            let rpc = self.next_request(method.clone(), params.clone());
            match self.round_trip(&rpc).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded on attempt {} after {} retries",
                            attempt + 1,
                            attempt
                        );
                    }
                    return response
                        .into_result()
                        .map_err(|e| SessionError::Protocol(e.to_string()));
                }
                Err(e @ (SessionError::Transport(_) | SessionError::Timeout(_)))
                    if attempt < config.max_attempts - 1 =>
                {
                    let delay = config.calculate_delay(attempt);
                    tracing::warn!(
                        "Request attempt {} failed: {}, retrying after {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SessionError::Transport("request failed".to_string())))
    }

    /// Force the session state, bypassing the handshake (tests only)
    #[cfg(test)]
    pub(crate) fn set_state_for_tests(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Check that the session is ready for catalog/call operations
    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Created => Err(SessionError::State(
                "session not initialized; call initialize() first".to_string(),
            )),
            SessionState::Initializing => {
                Err(SessionError::State("session is initializing".to_string()))
            }
            SessionState::Ready => Ok(()),
            SessionState::Disconnected => {
                Err(SessionError::State("session is disconnected".to_string()))
            }
        }
    }
}
