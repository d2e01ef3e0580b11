//! Configuration for the diagnostic service.
//!
//! Settings live in `cefr.json` (camelCase keys). Every field has a default,
//! so a missing file or a partial file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DiagError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "cefr.json";

/// Name of the SQLite database that keeps everything in memory.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_database() -> String {
    "cefr.db".to_string()
}

fn default_purpose() -> String {
    "general".to_string()
}

/// Default capacity of the websocket event channel.
const fn default_event_capacity() -> usize {
    100
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    500
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the SQLite database, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    /// Learning purpose used when a new exam does not name one.
    #[serde(default = "default_purpose")]
    pub default_purpose: String,

    /// Buffered events per websocket broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// LLM gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            database: default_database(),
            default_purpose: default_purpose(),
            event_capacity: default_event_capacity(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Loads `cefr.json` from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or validated.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            DiagError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `cefr.json` from `dir`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or validated.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DiagError::ConfigParseError` for unreadable files or invalid
    /// JSON, and `DiagError::ConfigValidationError` for out-of-range values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(DiagError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| DiagError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `DiagError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(DiagError::config_validation(
                "bind must not be empty",
                "Set bind to an address such as \"127.0.0.1\" in your cefr.json",
            ));
        }

        if self.database.trim().is_empty() {
            return Err(DiagError::config_validation(
                "database must not be empty",
                "Set database to a file path or \":memory:\" in your cefr.json",
            ));
        }

        if self.default_purpose.trim().is_empty() {
            return Err(DiagError::config_validation(
                "defaultPurpose must not be empty",
                "Set defaultPurpose to a learning goal such as \"general\" or \"business\"",
            ));
        }

        if self.event_capacity == 0 {
            return Err(DiagError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your cefr.json",
            ));
        }

        self.gateway.validate()
    }

    /// Returns `true` when the database lives only in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.database == IN_MEMORY_DATABASE
    }

    /// Returns the `host:port` pair the server binds to.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Providers reachable through an OpenAI-compatible chat completions API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatewayProvider {
    /// `OpenAI` (default).
    #[default]
    OpenAi,
    /// A local Ollama server.
    Ollama,
}

impl GatewayProvider {
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Returns the lowercase provider name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    /// Base URL used when the config does not set one.
    #[must_use]
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Whether requests must carry a bearer token.
    #[must_use]
    pub const fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi)
    }
}

impl<'de> Deserialize<'de> for GatewayProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid gateway provider '{s}': expected one of 'openai', 'ollama'"
            ))
        })
    }
}

impl Serialize for GatewayProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// LLM gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Which provider to talk to.
    #[serde(default)]
    pub provider: GatewayProvider,

    /// Overrides the provider's default base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Chat model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature for question generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token limit for question generation.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::default(),
            base_url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl GatewayConfig {
    /// The configured base URL, or the provider default, without a trailing slash.
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(DiagError::config_validation(
                "gateway.model must not be empty",
                "Set gateway.model to a chat model name such as \"gpt-4o-mini\"",
            ));
        }

        if self.timeout_secs == 0 {
            return Err(DiagError::config_validation(
                "gateway.timeoutSecs must be greater than 0",
                "Set gateway.timeoutSecs to at least 1 second in your cefr.json",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DiagError::config_validation(
                format!("gateway.temperature {} is out of range", self.temperature),
                "Set gateway.temperature between 0.0 and 2.0",
            ));
        }

        if self.max_tokens == 0 {
            return Err(DiagError::config_validation(
                "gateway.maxTokens must be greater than 0",
                "Set gateway.maxTokens to at least 100 in your cefr.json",
            ));
        }

        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(DiagError::config_validation(
                    format!("gateway.baseUrl '{url}' is not an HTTP URL"),
                    "Use a URL starting with http:// or https://",
                ));
            }
        }

        Ok(())
    }
}
