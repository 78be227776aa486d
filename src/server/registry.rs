//! Tool and Resource Registries
//!
//! Server-side registries mapping tool name / resource URI to a descriptor
//! and an opaque handler. Handlers are capability-set implementations of one
//! trait each; the registry neither knows nor cares what a handler does
//! beyond its declared schema.
//!
//! # Contract
//!
//! - `register` fails with [`RegistryError::DuplicateName`] if the name/URI
//!   is taken. Descriptors are immutable once registered.
//! - `list` produces the current catalog as a restartable iterator.
//! - `invoke` fails with [`RegistryError::UnknownTool`],
//!   [`RegistryError::SchemaValidation`], or [`RegistryError::ToolRuntime`],
//!   otherwise returns the handler's result unchanged.
//!
//! Registration must complete before the server starts serving; the service
//! layer enforces this by consuming the registries on `serve()`.

use crate::mcp::protocol::{ResourceDescriptor, ToolDescriptor};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Errors surfaced by the registries
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The name or URI is already registered
    #[error("Duplicate name: '{0}' is already registered")]
    DuplicateName(String),

    /// tools/call named a tool absent from the registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not conform to the declared input schema
    #[error("Arguments for '{tool}' rejected by schema: {reason}")]
    SchemaValidation {
        /// Tool whose schema rejected the arguments
        tool: String,
        /// What failed to conform
        reason: String,
    },

    /// The handler itself failed
    #[error("Tool '{tool}' failed: {source}")]
    ToolRuntime {
        /// Tool whose handler failed
        tool: String,
        /// Underlying handler failure
        #[source]
        source: anyhow::Error,
    },

    /// resources/read named an unregistered URI
    #[error("Resource not found: {0}")]
    NotFound(String),
}

/// A tool implementation held by the registry
///
/// Handlers are opaque: the registry validates arguments against the
/// declared schema, then hands them over unchanged.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with schema-validated arguments
    async fn invoke(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A resource implementation held by the registry
///
/// `params` carries the values captured from `{param}` template segments of
/// the registered URI.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Produce the resource payload
    async fn read(&self, params: BTreeMap<String, String>)
        -> anyhow::Result<serde_json::Value>;
}

struct FnToolHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn invoke(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        (self.0)(arguments)
    }
}

/// Wrap a plain function as a [`ToolHandler`]
pub fn tool_fn<F>(f: F) -> Box<dyn ToolHandler>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
{
    Box::new(FnToolHandler(f))
}

struct FnResourceHandler<F>(F);

#[async_trait]
impl<F> ResourceHandler for FnResourceHandler<F>
where
    F: Fn(BTreeMap<String, String>) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn read(
        &self,
        params: BTreeMap<String, String>,
    ) -> anyhow::Result<serde_json::Value> {
        (self.0)(params)
    }
}

/// Wrap a plain function as a [`ResourceHandler`]
pub fn resource_fn<F>(f: F) -> Box<dyn ResourceHandler>
where
    F: Fn(BTreeMap<String, String>) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
{
    Box::new(FnResourceHandler(f))
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Box<dyn ToolHandler>,
}

/// Registry mapping tool name to descriptor and handler
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the name is taken.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Box<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name.clone()));
        }
        tracing::debug!("Registered tool: {}", descriptor.name);
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Iterate over the registered descriptors
    ///
    /// Restartable: call again for a fresh pass over the current catalog.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor)
    }

    /// Whether a tool with the given name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name
    ///
    /// Arguments are validated against the declared schema before the
    /// handler runs; the handler's result is returned unchanged.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, RegistryError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        if let Err(reason) = validate_arguments(&tool.descriptor.input_schema, &arguments) {
            return Err(RegistryError::SchemaValidation {
                tool: name.to_string(),
                reason,
            });
        }

        tool.handler
            .invoke(arguments)
            .await
            .map_err(|source| RegistryError::ToolRuntime {
                tool: name.to_string(),
                source,
            })
    }
}

struct RegisteredResource {
    descriptor: ResourceDescriptor,
    handler: Box<dyn ResourceHandler>,
}

/// Registry mapping resource URI (or URI template) to descriptor and handler
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<RegisteredResource>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the URI is taken.
    pub fn register(
        &mut self,
        descriptor: ResourceDescriptor,
        handler: Box<dyn ResourceHandler>,
    ) -> Result<(), RegistryError> {
        if self.resources.iter().any(|r| r.descriptor.uri == descriptor.uri) {
            return Err(RegistryError::DuplicateName(descriptor.uri.clone()));
        }
        tracing::debug!("Registered resource: {}", descriptor.uri);
        self.resources.push(RegisteredResource {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Iterate over the registered descriptors
    pub fn list(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter().map(|r| &r.descriptor)
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Read a resource by concrete URI
    ///
    /// The URI is matched against registered templates in registration
    /// order; captured `{param}` segments are passed to the handler. Returns
    /// the payload and the registered MIME type.
    pub async fn read(
        &self,
        uri: &str,
    ) -> Result<(serde_json::Value, String), RegistryError> {
        for resource in &self.resources {
            if let Some(params) = match_uri_template(&resource.descriptor.uri, uri) {
                let payload = resource.handler.read(params).await.map_err(|source| {
                    RegistryError::ToolRuntime {
                        tool: resource.descriptor.uri.clone(),
                        source,
                    }
                })?;
                return Ok((payload, resource.descriptor.mime_type.clone()));
            }
        }
        Err(RegistryError::NotFound(uri.to_string()))
    }
}

/// Match a concrete URI against a registered template
///
/// Templates use `{name}` segments: `grid://topology/{region}` matches
/// `grid://topology/northeast` and captures `region = northeast`. Literal
/// segments must match exactly.
fn match_uri_template(template: &str, uri: &str) -> Option<BTreeMap<String, String>> {
    let template_parts: Vec<&str> = template.split('/').collect();
    let uri_parts: Vec<&str> = uri.split('/').collect();

    if template_parts.len() != uri_parts.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (pattern, value) in template_parts.iter().zip(uri_parts.iter()) {
        if let Some(name) = pattern
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
        {
            if value.is_empty() {
                return None;
            }
            params.insert(name.to_string(), (*value).to_string());
        } else if pattern != value {
            return None;
        }
    }
    Some(params)
}

/// Validate arguments against a declared JSON-Schema-like object schema
///
/// Supports the subset the catalog uses: top-level `type: object`,
/// per-property `type` (string, integer, number, boolean, array, object),
/// and `required` keys. Returns a human-readable reason on mismatch.
pub fn validate_arguments(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), String> {
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        // Schemas without a top-level object type are accepted as-is
        return Ok(());
    }

    let Some(args) = arguments.as_object() else {
        return Err("arguments must be an object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !args.contains_key(key) {
                return Err(format!("missing required property '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in args {
            let Some(prop_schema) = properties.get(key) else {
                continue;
            };
            let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("property '{key}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}
