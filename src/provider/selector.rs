//! Model Selector
//!
//! Parses the `provider:model` identifier used by the host's `model:`
//! directive and carried on the conversation context.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Error raised for a malformed selector string
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    /// The string is not of the form `provider:model`
    #[error("Model selector must be 'provider:model', got '{0}'")]
    Malformed(String),
}

/// A `provider:model` pair selecting a completion backend and model
///
/// Mutable at runtime: the user may switch models between turns. Validation
/// against the configured providers happens in the router; parsing here only
/// checks the shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSelector {
    provider: String,
    model: String,
}

impl ModelSelector {
    /// Build a selector from already-split parts
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// The provider name (e.g. "openai", "anthropic")
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The model name within the provider
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl FromStr for ModelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| SelectorError::Malformed(s.to_string()))?;
        if provider.is_empty() || model.is_empty() {
            return Err(SelectorError::Malformed(s.to_string()));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}
