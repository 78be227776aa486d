//! MCP Server Service Loop
//!
//! Dispatches JSON-RPC requests against the registries and runs the
//! newline-delimited stdio serve loop.
//!
//! # Lifecycle
//!
//! Register every tool and resource first, then call [`McpServer::serve`] (or
//! [`McpServer::serve_stdio`]). `serve` consumes the server, so registration
//! after startup is unrepresentable rather than merely unsupported.

use crate::mcp::protocol::{
    McpError, McpMethod, McpRequest, McpResponse, PeerInfo, ResourceDescriptor,
    ResourceReadParams, ToolCallParams, ToolDescriptor, JSONRPC_VERSION, PROTOCOL_VERSION,
};
use crate::server::registry::{
    RegistryError, ResourceHandler, ResourceRegistry, ToolHandler, ToolRegistry,
};
use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// An MCP server: registries plus the serve loop
///
/// # Example
///
/// ```ignore
/// let mut server = McpServer::new("grid-ops", "0.1.0");
/// server.register_tool(descriptor, handler)?;
/// server.serve_stdio().await?;   // consumes the server
/// ```
pub struct McpServer {
    info: PeerInfo,
    tools: ToolRegistry,
    resources: ResourceRegistry,
}

impl McpServer {
    /// Create a server with the given identity
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: PeerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools: ToolRegistry::new(),
            resources: ResourceRegistry::new(),
        }
    }

    /// Register a tool before serving
    pub fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Box<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        self.tools.register(descriptor, handler)
    }

    /// Register a resource before serving
    pub fn register_resource(
        &mut self,
        descriptor: ResourceDescriptor,
        handler: Box<dyn ResourceHandler>,
    ) -> Result<(), RegistryError> {
        self.resources.register(descriptor, handler)
    }

    /// Number of registered tools
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Number of registered resources
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Dispatch a single request
    pub async fn handle(&self, request: McpRequest) -> McpResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return McpResponse::err(
                request.id,
                McpError::invalid_request(format!(
                    "unsupported jsonrpc version '{}'",
                    request.jsonrpc
                )),
            );
        }

        let id = request.id;
        match McpMethod::from(request.method.as_str()) {
            McpMethod::Initialize => McpResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": self.info,
                }),
            ),
            McpMethod::ToolsList => {
                let tools: Vec<&ToolDescriptor> = self.tools.list().collect();
                McpResponse::ok(id, json!({ "tools": tools }))
            }
            McpMethod::ResourcesList => {
                let resources: Vec<&ResourceDescriptor> = self.resources.list().collect();
                McpResponse::ok(id, json!({ "resources": resources }))
            }
            McpMethod::ToolsCall => self.handle_tool_call(id, request.params).await,
            McpMethod::ResourcesRead => self.handle_resource_read(id, request.params).await,
            McpMethod::Custom(method) => {
                McpResponse::err(id, McpError::method_not_found(method))
            }
        }
    }

    async fn handle_tool_call(&self, id: u64, params: Option<serde_json::Value>) -> McpResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            Ok(None) => {
                return McpResponse::err(id, McpError::invalid_params("missing params"));
            }
            Err(e) => {
                return McpResponse::err(
                    id,
                    McpError::invalid_params(format!("bad tools/call params: {e}")),
                );
            }
        };

        tracing::info!("Invoking tool: {}", params.name);

        match self.tools.invoke(&params.name, params.arguments).await {
            Ok(payload) => McpResponse::ok(id, json!({"status": "ok", "payload": payload})),
            Err(RegistryError::UnknownTool(name)) => {
                McpResponse::err(id, McpError::unknown_tool(name))
            }
            Err(RegistryError::SchemaValidation { tool, reason }) => McpResponse::err(
                id,
                McpError::schema_validation(format!(
                    "arguments for '{tool}' rejected: {reason}"
                )),
            ),
            Err(RegistryError::ToolRuntime { tool, source }) => {
                tracing::error!("Tool '{}' failed: {:#}", tool, source);
                McpResponse::err(
                    id,
                    McpError::tool_runtime(format!("tool '{tool}' failed: {source}")),
                )
            }
            Err(other) => McpResponse::err(id, McpError::internal_error(other.to_string())),
        }
    }

    async fn handle_resource_read(
        &self,
        id: u64,
        params: Option<serde_json::Value>,
    ) -> McpResponse {
        let params: ResourceReadParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            Ok(None) => {
                return McpResponse::err(id, McpError::invalid_params("missing params"));
            }
            Err(e) => {
                return McpResponse::err(
                    id,
                    McpError::invalid_params(format!("bad resources/read params: {e}")),
                );
            }
        };

        tracing::info!("Reading resource: {}", params.uri);

        match self.resources.read(&params.uri).await {
            Ok((payload, mime_type)) => {
                McpResponse::ok(id, json!({"mimeType": mime_type, "payload": payload}))
            }
            Err(RegistryError::NotFound(uri)) => {
                McpResponse::err(id, McpError::resource_not_found(uri))
            }
            Err(other) => McpResponse::err(id, McpError::internal_error(other.to_string())),
        }
    }

    /// Run the serve loop over arbitrary byte streams
    ///
    /// Reads one JSON-RPC request per line, writes one response per line.
    /// Consumes the server: the registries are sealed from here on. Returns
    /// when the peer closes the input stream.
    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            "MCP server '{}' serving {} tools, {} resources",
            self.info.name,
            self.tools.len(),
            self.resources.len()
        );

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read request line")?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<McpRequest>(line) {
                Ok(request) => self.handle(request).await,
                Err(e) => {
                    tracing::warn!("Discarding malformed request line: {}", e);
                    McpResponse::err(0, McpError::parse_error(e.to_string()))
                }
            };

            let json = serde_json::to_string(&response)
                .context("Failed to serialize response")?;
            writer
                .write_all(json.as_bytes())
                .await
                .context("Failed to write response")?;
            writer
                .write_all(b"\n")
                .await
                .context("Failed to write response delimiter")?;
            writer.flush().await.context("Failed to flush response")?;
        }

        tracing::info!("MCP server '{}' input closed, shutting down", self.info.name);
        Ok(())
    }

    /// Run the serve loop over this process's stdin/stdout
    pub async fn serve_stdio(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }
}
