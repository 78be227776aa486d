//! MCP Server Implementation
//!
//! The server side of the triad: tool/resource registries, the JSON-RPC
//! dispatch and stdio serve loop, and the built-in grid operations catalog.
//!
//! # Architecture
//!
//! - `registry`: name/URI → {descriptor, handler} maps with schema validation
//! - `service`: request dispatch and the newline-delimited serve loop
//! - `catalog`: the demonstration grid tools and resources
//!
//! Registration happens before serving; `McpServer::serve` consumes the
//! server so the catalog is immutable once connections are accepted.

// Tool and resource registries
pub mod registry;

// Request dispatch and serve loop
pub mod service;

// Built-in grid operations catalog
pub mod catalog;

// Re-export commonly used types for convenience
pub use catalog::grid_demo_server;
pub use registry::{
    resource_fn, tool_fn, RegistryError, ResourceHandler, ResourceRegistry, ToolHandler,
    ToolRegistry,
};
pub use service::McpServer;
