//! Provider Router
//!
//! Maps a `provider:model` selector to a concrete completion backend and
//! normalizes the backends' divergent native tool-call representations into
//! one uniform shape.
//!
//! # Normalization Contract
//!
//! Every backend returns a [`CompletionOutcome`]: either a final textual
//! answer or one-or-more [`ToolCallRequest`]s in the order the model emitted
//! them. Providers disagree on argument encoding (stringified JSON vs.
//! native structures) and on how multiple calls appear in one response; that
//! divergence stops here and never reaches the orchestration loop.
//!
//! # Backends
//!
//! - [`OpenAiBackend`]: OpenAI-compatible Chat Completions API
//! - [`AnthropicBackend`]: Anthropic Messages API
//!
//! The router is stateless beyond its configuration: backends are built once
//! from config and hold no per-conversation state.

pub mod anthropic;
pub mod openai;
pub mod selector;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use selector::{ModelSelector, SelectorError};

use crate::config::ProviderConfig;
use crate::context::{ToolCallRequest, Turn};
use crate::mcp::protocol::ToolDescriptor;
use async_trait::async_trait;
use std::collections::HashMap;

/// Errors surfaced by the provider router
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The selector names a provider that is not configured
    ///
    /// Rejected immediately, with no side effects on the conversation.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The completion request failed at the HTTP level
    #[error("Provider request failed: {0}")]
    Request(String),

    /// The provider did not answer within the configured deadline
    #[error("Provider request timed out after {0}ms")]
    Timeout(u64),

    /// The provider answered with a shape the backend cannot normalize
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Normalized result of one model turn
///
/// The tagged variant the orchestration loop branches on; provider-specific
/// response structures are never inspected outside the backends.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The model yielded a final textual answer
    Final(String),

    /// The model requested one or more tool calls
    ToolCalls {
        /// Assistant text accompanying the calls, if any
        text: Option<String>,

        /// The requested calls, in the order the model emitted them
        requests: Vec<ToolCallRequest>,
    },
}

/// A completion backend for one provider
///
/// Implementations translate the uniform request (system prompt, turn
/// history, tool catalog) into the provider's native wire format and
/// normalize the response into a [`CompletionOutcome`].
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one model turn
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, RouterError>;
}

/// Routes completion requests to the backend named by the selector
pub struct ProviderRouter {
    backends: HashMap<String, Box<dyn CompletionBackend>>,
}

impl ProviderRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Build a router from the configured provider table
    ///
    /// Unrecognized backend kinds are skipped with a warning so one bad
    /// entry does not take down the rest of the configuration.
    pub fn from_config(providers: &HashMap<String, ProviderConfig>) -> Self {
        let mut router = Self::new();
        for (name, cfg) in providers {
            let api_key = cfg.resolve_api_key();
            if api_key.is_none() {
                tracing::warn!(
                    "Provider '{}' has no API key in ${}; requests will be unauthenticated",
                    name,
                    cfg.api_key_env
                );
            }
            let timeout = std::time::Duration::from_secs(cfg.request_timeout_secs);
            match cfg.kind.as_str() {
                "openai-chat" => {
                    router.insert(
                        name,
                        Box::new(OpenAiBackend::new(&cfg.base_url, api_key, timeout)),
                    );
                }
                "anthropic" => {
                    router.insert(
                        name,
                        Box::new(AnthropicBackend::new(&cfg.base_url, api_key, timeout)),
                    );
                }
                other => {
                    tracing::warn!("Skipping provider '{}': unknown backend kind '{}'", name, other);
                }
            }
        }
        router
    }

    /// Register a backend under a provider name
    pub fn insert(&mut self, name: impl Into<String>, backend: Box<dyn CompletionBackend>) {
        self.backends.insert(name.into(), backend);
    }

    /// Whether a provider with the given name is configured
    pub fn has_provider(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Names of the configured providers
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Run one model turn through the backend the selector names
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::UnknownProvider`] (without side effects) if
    /// the selector names an unconfigured provider; otherwise propagates the
    /// backend's outcome.
    pub async fn complete(
        &self,
        selector: &ModelSelector,
        system_prompt: &str,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, RouterError> {
        let backend = self
            .backends
            .get(selector.provider())
            .ok_or_else(|| RouterError::UnknownProvider(selector.provider().to_string()))?;

        tracing::debug!(
            "Routing model turn to {} ({} turns, {} tools)",
            selector,
            turns.len(),
            tools.len()
        );

        backend
            .complete(selector.model(), system_prompt, turns, tools)
            .await
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}
