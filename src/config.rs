// Configuration File Support
//
// TOML configuration for the gridops assistant with environment variable
// overrides. Loaded from the XDG config directory:
// ~/.config/gridops/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// System prompt used when the config does not override it
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a Grid Operations Assistant, an AI specialized in power grid management, \
outage response, maintenance scheduling, and operational analytics. You have access \
to grid topology, sensor data, and operational tools through the Model Context Protocol.

When answering questions:
1. Use available tools to access up-to-date grid data and operational records.
2. Provide evidence-based responses with references to grid events or logs where possible.
3. Acknowledge operational uncertainty when appropriate.
4. Explain complex grid concepts clearly for operators and engineers.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// MCP server process configuration
    pub server: ServerConfig,

    /// Completion provider configurations, keyed by provider name
    pub providers: HashMap<String, ProviderConfig>,

    /// Orchestration loop limits
    pub limits: LimitsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// MCP server process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Command to spawn the MCP server
    pub command: String,

    /// Arguments for the MCP server
    pub args: Vec<String>,

    /// Per-call deadline in seconds for session round trips
    pub call_timeout_secs: u64,

    /// Whether to retry transient failures of idempotent calls
    pub retry: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "gridops".to_string(),
            args: vec!["serve".to_string()],
            call_timeout_secs: 30,
            retry: true,
        }
    }
}

/// One completion provider entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend kind: "openai-chat" or "anthropic"
    pub kind: String,

    /// API base URL (without trailing slash)
    pub base_url: String,

    /// Name of the environment variable holding the API key
    ///
    /// Credentials are pass-through: the key is read from the environment at
    /// startup and never stored in the config file.
    pub api_key_env: String,

    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "openai-chat".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Orchestration loop limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum consecutive tool-dispatch rounds per request
    pub max_tool_rounds: usize,

    /// Initial model selector (`provider:model`)
    pub default_model: String,

    /// System prompt override; empty string means the built-in prompt
    pub system_prompt: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            default_model: "openai:gpt-4o".to_string(),
            system_prompt: String::new(),
        }
    }
}

impl LimitsConfig {
    /// The effective system prompt
    pub fn effective_system_prompt(&self) -> &str {
        if self.system_prompt.is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.system_prompt
        }
    }
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    let mut providers = HashMap::new();
    providers.insert("openai".to_string(), ProviderConfig::default());
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig {
            kind: "anthropic".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            request_timeout_secs: 60,
        },
    );
    providers
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            providers: default_providers(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/gridops/config.toml`
    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("gridops")
            .join("config.toml")
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - GRIDOPS_LOG_LEVEL
    /// - GRIDOPS_LOG_FORMAT
    /// - GRIDOPS_DEFAULT_MODEL
    /// - GRIDOPS_MAX_TOOL_ROUNDS
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("GRIDOPS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("GRIDOPS_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(model) = std::env::var("GRIDOPS_DEFAULT_MODEL") {
            self.limits.default_model = model;
        }
        if let Ok(rounds) = std::env::var("GRIDOPS_MAX_TOOL_ROUNDS") {
            if let Ok(rounds) = rounds.parse::<usize>() {
                if rounds > 0 {
                    self.limits.max_tool_rounds = rounds;
                }
            }
        }
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is internally inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_tool_rounds == 0 {
            anyhow::bail!("limits.max_tool_rounds must be at least 1");
        }
        if self.server.call_timeout_secs == 0 {
            anyhow::bail!("server.call_timeout_secs must be at least 1");
        }

        let selector: Result<crate::provider::ModelSelector, _> =
            self.limits.default_model.parse();
        let selector = selector.map_err(|e| anyhow::anyhow!("limits.default_model: {e}"))?;
        if !self.providers.contains_key(selector.provider()) {
            anyhow::bail!(
                "limits.default_model names unconfigured provider '{}'",
                selector.provider()
            );
        }

        for (name, provider) in &self.providers {
            if provider.base_url.is_empty() {
                anyhow::bail!("provider '{name}' has an empty base_url");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.providers.contains_key("openai"));
        assert!(config.providers.contains_key("anthropic"));
        assert_eq!(config.limits.max_tool_rounds, 8);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from_path("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_config_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[limits]
max_tool_rounds = 3
default_model = "anthropic:claude-3-5-sonnet-20241022"

[server]
command = "python"
args = ["grid_server.py"]
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.limits.max_tool_rounds, 3);
        assert_eq!(config.server.command, "python");
        // Untouched sections fall back to defaults
        assert_eq!(config.logging.level, "info");
        assert!(config.providers.contains_key("anthropic"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml [[").unwrap();

        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_rejects_unconfigured_default_provider() {
        let mut config = Config::default();
        config.limits.default_model = "mystery:model-x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_round_budget() {
        let mut config = Config::default();
        config.limits.max_tool_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_system_prompt_fallback() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.effective_system_prompt(), DEFAULT_SYSTEM_PROMPT);

        let custom = LimitsConfig {
            system_prompt: "short prompt".to_string(),
            ..LimitsConfig::default()
        };
        assert_eq!(custom.effective_system_prompt(), "short prompt");
    }

    #[test]
    fn test_api_key_resolution_ignores_empty_values() {
        let provider = ProviderConfig {
            api_key_env: "GRIDOPS_TEST_EMPTY_KEY".to_string(),
            ..ProviderConfig::default()
        };
        std::env::set_var("GRIDOPS_TEST_EMPTY_KEY", "");
        assert!(provider.resolve_api_key().is_none());
        std::env::remove_var("GRIDOPS_TEST_EMPTY_KEY");
    }
}
