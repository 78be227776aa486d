//! MCP (Model Context Protocol) Client Implementation
//!
//! Pure Rust implementation of the MCP client side, built on Tokio and Serde
//! (no external SDK).
//!
//! # Architecture
//!
//! The implementation is organized into three layers:
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types
//! 2. **Transport Layer** (`transport`): stdio transport to a spawned server
//! 3. **Session Layer** (`client`): handshake, discovery, invocation
//!
//! The matching server side lives in [`crate::server`]; both ends share the
//! protocol layer.

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Transport layer: stdio transport
pub mod transport;

// Session layer: high-level MCP client API
pub mod client;

// Retry logic and error resilience
pub mod retry;

// Re-export commonly used types for convenience
pub use protocol::{
    Catalog, InitializeParams, McpError, McpMethod, McpRequest, McpResponse, PeerInfo,
    ResourceDescriptor, ServerCapabilities, ToolCallParams, ToolDescriptor,
};

pub use client::{McpSession, ResourceContent, SessionError, SessionState};
pub use retry::RetryConfig;
pub use transport::{StdioTransport, Transport};
