//! Configuration system (layered: defaults < TOML file < env).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::SpotterError;
use crate::util::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_OPEN_ROUND_ATTEMPTS: u32 = 3;

/// What to do when a continuation round requests more tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NestedToolCallPolicy {
    /// Log the calls, never dispatch them, and finish the turn normally.
    #[default]
    Ignore,
    /// Fail the continuation message with a protocol error.
    Reject,
}

/// Model provider settings.
#[derive(Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    #[builder(into, default = DEFAULT_MODEL.to_string())]
    pub model: String,
    #[builder(into)]
    pub api_key: Option<String>,
    /// Defaults to `https://api.openai.com/v1` when unset.
    #[builder(into)]
    pub base_url: Option<String>,
    #[builder(into)]
    pub instructions: Option<String>,
    /// Tool declarations passed to the model verbatim.
    #[builder(default)]
    pub tools: Vec<serde_json::Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            instructions: None,
            tools: Vec::new(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("instructions", &self.instructions)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Engine settings.
///
/// ```
/// use spotter::config::{EngineConfig, NestedToolCallPolicy};
///
/// let config = EngineConfig::builder()
///     .handler_timeout_ms(5_000)
///     .nested_tool_calls(NestedToolCallPolicy::Reject)
///     .build();
/// assert_eq!(config.open_round_attempts, 3);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fail a round when no event arrives for this long. `0` disables.
    #[builder(default = DEFAULT_STREAM_IDLE_TIMEOUT_MS)]
    pub stream_idle_timeout_ms: u64,
    /// Per-handler deadline.
    pub handler_timeout_ms: Option<u64>,
    #[builder(default)]
    pub nested_tool_calls: NestedToolCallPolicy,
    /// Attempts when opening a round, including the first.
    #[builder(default = DEFAULT_OPEN_ROUND_ATTEMPTS)]
    pub open_round_attempts: u32,
    #[builder(default)]
    pub provider: ProviderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_idle_timeout_ms: DEFAULT_STREAM_IDLE_TIMEOUT_MS,
            handler_timeout_ms: None,
            nested_tool_calls: NestedToolCallPolicy::default(),
            open_round_attempts: DEFAULT_OPEN_ROUND_ATTEMPTS,
            provider: ProviderConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.open_round_attempts)
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, SpotterError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpotterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SpotterError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with environment variables (loads `.env` if present).
    pub fn from_env() -> Result<Self, SpotterError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then the TOML file, then the environment.
    ///
    /// With no explicit path, [`default_path`](Self::default_path) is used
    /// when it exists.
    pub fn load_layered(path: Option<&Path>) -> Result<Self, SpotterError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    Self::load(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env()?;
        Ok(config)
    }

    /// `~/.spotter/config.toml`.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".spotter"))
            .unwrap_or_else(|| PathBuf::from(".spotter"))
            .join("config.toml")
    }

    /// Overlay process environment variables.
    pub fn apply_env(&mut self) -> Result<(), SpotterError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup. Unparseable values are errors.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SpotterError> {
        if let Some(raw) = lookup("SPOTTER_STREAM_IDLE_TIMEOUT_MS") {
            self.stream_idle_timeout_ms = parse_env("SPOTTER_STREAM_IDLE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("SPOTTER_HANDLER_TIMEOUT_MS") {
            self.handler_timeout_ms = Some(parse_env("SPOTTER_HANDLER_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("SPOTTER_NESTED_TOOL_CALLS") {
            self.nested_tool_calls = parse_env("SPOTTER_NESTED_TOOL_CALLS", &raw)?;
        }
        if let Some(raw) = lookup("SPOTTER_OPEN_ROUND_ATTEMPTS") {
            self.open_round_attempts = parse_env("SPOTTER_OPEN_ROUND_ATTEMPTS", &raw)?;
        }
        if let Some(model) = lookup("SPOTTER_MODEL") {
            self.provider.model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(instructions) = lookup("SPOTTER_INSTRUCTIONS") {
            self.provider.instructions = Some(instructions);
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, SpotterError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| SpotterError::Configuration(format!("invalid {key}={raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stream_idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.handler_timeout(), None);
        assert_eq!(config.nested_tool_calls, NestedToolCallPolicy::Ignore);
        assert_eq!(config.provider.model, DEFAULT_MODEL);
        assert_eq!(config, EngineConfig::builder().build());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = EngineConfig::from_toml_str(
            r#"
            stream_idle_timeout_ms = 5000
            [provider]
            model = "gpt-4.1"
            "#,
        )
        .unwrap();
        config
            .apply_env_from(lookup(&[
                ("SPOTTER_STREAM_IDLE_TIMEOUT_MS", "0"),
                ("SPOTTER_NESTED_TOOL_CALLS", "reject"),
                ("OPENAI_API_KEY", "sk-env"),
            ]))
            .unwrap();

        assert_eq!(config.stream_idle_timeout(), None);
        assert_eq!(config.nested_tool_calls, NestedToolCallPolicy::Reject);
        assert_eq!(config.provider.model, "gpt-4.1");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn bad_env_value_is_a_configuration_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env_from(lookup(&[("SPOTTER_OPEN_ROUND_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, SpotterError::Configuration(msg) if msg.contains("SPOTTER_OPEN_ROUND_ATTEMPTS")));
    }

    #[test]
    fn tool_declarations_load_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[provider.tools]]
            type = "function"
            name = "calculate_1rm"

            [provider.tools.parameters]
            type = "object"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.provider.tools,
            vec![serde_json::json!({
                "type": "function",
                "name": "calculate_1rm",
                "parameters": {"type": "object"}
            })]
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let provider = ProviderConfig::builder().api_key("sk-secret").build();
        assert!(!format!("{provider:?}").contains("sk-secret"));
    }
}
