//! MCP Protocol Types (JSON-RPC 2.0)
//!
//! This module defines the core protocol types for the Model Context Protocol
//! (MCP). MCP is built on top of JSON-RPC 2.0, a simple stateless RPC
//! protocol; framing is newline-delimited JSON over the server process's
//! stdin/stdout.
//!
//! # Protocol Specification
//!
//! - JSON-RPC 2.0: <https://www.jsonrpc.org/specification>
//! - MCP Spec: <https://modelcontextprotocol.io/specification/2025-03-26>
//!
//! # Architecture
//!
//! The protocol layer is responsible only for serialization/deserialization
//! of MCP messages. Transport concerns (process spawning, line framing) are
//! handled in the transport layer; catalog and invocation semantics live in
//! the client and server layers.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision negotiated during the initialize handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC 2.0 request message
///
/// Requests are sent from the client to the MCP server to invoke methods.
/// Each request has a unique ID (monotonically increasing) to match
/// responses.
///
/// # Example
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 1,
///   "method": "tools/list",
///   "params": {}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    #[serde(rename = "jsonrpc")]
    pub jsonrpc: String,

    /// Request identifier (used to match responses)
    pub id: u64,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional, depends on method)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl McpRequest {
    /// Create a new MCP request
    ///
    /// # Arguments
    ///
    /// * `id` - Unique request identifier
    /// * `method` - Method name to invoke
    /// * `params` - Optional method parameters
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response message
///
/// A response either contains a `result` or an `error`, but never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpResponse {
    /// JSON-RPC version (always "2.0")
    #[serde(rename = "jsonrpc")]
    pub jsonrpc: String,

    /// Request identifier (must match the request's ID)
    pub id: u64,

    /// Result payload (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error information (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Create a successful response
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(id: u64, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if the response is successful
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Get the result, or the error if unsuccessful
    pub fn into_result(self) -> Result<serde_json::Value, McpError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            _ => Err(McpError::internal_error(
                "Invalid response: both result and error present",
            )),
        }
    }
}

/// A JSON-RPC 2.0 error object
///
/// Standard JSON-RPC codes plus the tool-call-level codes the registry
/// surfaces. Tool-call-level errors (unknown tool, schema validation, handler
/// failure) are valid protocol outcomes: the client folds them back into the
/// conversation instead of treating the session as broken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpError {
    /// Error code (JSON-RPC defined or MCP-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Parse error (-32700): Invalid JSON was received
pub const CODE_PARSE_ERROR: i32 = -32700;
/// Invalid request (-32600): Not a valid Request object
pub const CODE_INVALID_REQUEST: i32 = -32600;
/// Method not found (-32601)
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
/// Invalid params (-32602)
pub const CODE_INVALID_PARAMS: i32 = -32602;
/// Internal error (-32603)
pub const CODE_INTERNAL_ERROR: i32 = -32603;
/// Unknown tool (-32001): tools/call named a tool absent from the registry
pub const CODE_UNKNOWN_TOOL: i32 = -32001;
/// Schema validation (-32002): arguments do not conform to the declared schema
pub const CODE_SCHEMA_VALIDATION: i32 = -32002;
/// Tool runtime (-32003): the handler itself failed
pub const CODE_TOOL_RUNTIME: i32 = -32003;
/// Resource not found (-32004): resources/read named an unregistered URI
pub const CODE_RESOURCE_NOT_FOUND: i32 = -32004;

impl McpError {
    /// Create a new error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700): Invalid JSON was received
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(CODE_PARSE_ERROR, message)
    }

    /// Invalid request (-32600): The JSON sent is not a valid Request object
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_REQUEST, message)
    }

    /// Method not found (-32601): The method does not exist / is not available
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            CODE_METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Invalid params (-32602): Invalid method parameter(s)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }

    /// Internal error (-32603): Internal JSON-RPC error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, message)
    }

    /// Unknown tool (-32001)
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::new(CODE_UNKNOWN_TOOL, format!("Unknown tool: {}", name.into()))
    }

    /// Schema validation failure (-32002)
    pub fn schema_validation(message: impl Into<String>) -> Self {
        Self::new(CODE_SCHEMA_VALIDATION, message)
    }

    /// Tool runtime failure (-32003)
    pub fn tool_runtime(message: impl Into<String>) -> Self {
        Self::new(CODE_TOOL_RUNTIME, message)
    }

    /// Resource not found (-32004)
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::new(
            CODE_RESOURCE_NOT_FOUND,
            format!("Resource not found: {}", uri.into()),
        )
    }

    /// Whether this error is a tool-call-level outcome the model can correct
    ///
    /// Such errors become error-status tool results rather than session
    /// failures.
    pub fn is_tool_call_error(&self) -> bool {
        matches!(
            self.code,
            CODE_UNKNOWN_TOOL | CODE_SCHEMA_VALIDATION | CODE_TOOL_RUNTIME
        )
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Error {}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// MCP method identifiers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum McpMethod {
    /// Initialize the connection (must be called first)
    Initialize,

    /// List available tools
    ToolsList,

    /// Call a specific tool
    ToolsCall,

    /// List available resources
    ResourcesList,

    /// Read a resource
    ResourcesRead,

    /// Custom method (for extensibility)
    Custom(String),
}

impl McpMethod {
    /// Convert to string for the JSON-RPC method field
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initialize => "initialize",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl From<String> for McpMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "initialize" => Self::Initialize,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            "resources/read" => Self::ResourcesRead,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for McpMethod {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

/// Initialization parameters sent during the handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeParams {
    /// Client protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Client information
    #[serde(rename = "clientInfo")]
    pub client_info: PeerInfo,
}

/// Server capabilities (returned during initialization)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// Server protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Server information
    #[serde(rename = "serverInfo")]
    pub server_info: PeerInfo,
}

/// Identification for either endpoint of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// Endpoint name
    pub name: String,

    /// Endpoint version
    pub version: String,
}

/// Tool descriptor published in the catalog
///
/// Immutable once registered; `name` is unique within a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Tool name (unique identifier)
    pub name: String,

    /// Tool description shown to the model
    pub description: String,

    /// Tool input schema (JSON Schema)
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Resource descriptor published in the catalog
///
/// Immutable once registered; `uri` is unique within a server and may contain
/// `{param}` template segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Resource URI or URI template (e.g. `grid://topology/{region}`)
    pub uri: String,

    /// Resource description
    pub description: String,

    /// MIME type of the payload
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Tool invocation parameters (`tools/call`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallParams {
    /// Name of the tool to call
    pub name: String,

    /// Tool arguments (must match the input schema)
    pub arguments: serde_json::Value,
}

/// Resource read parameters (`resources/read`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceReadParams {
    /// URI of the resource to read
    pub uri: String,
}

/// The full tool and resource catalog of a connected server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    /// Published tools
    pub tools: Vec<ToolDescriptor>,

    /// Published resources
    pub resources: Vec<ResourceDescriptor>,
}

impl Catalog {
    /// Look up a tool descriptor by name
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Whether the catalog publishes a tool with the given name
    pub fn has_tool(&self, name: &str) -> bool {
        self.tool(name).is_some()
    }
}
