//! Configuration loading, validation, and management for Chorus.
//!
//! Loads configuration from `~/.chorus/config.toml` with environment
//! variable overrides. Validates all settings at load time so the engine can
//! treat its options as trusted values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Built-in prompt texts used when the config file does not override them.
pub mod defaults {
    /// Fixed platform/legal constraints, placed right after identity.
    pub const PLATFORM_CONSTRAINTS: &str = concat!(
        "You are a fictional character in a group chat platform. ",
        "Never claim to be a real person. ",
        "Never produce content that sexualizes minors, facilitates violence, ",
        "or reveals private information about real people. ",
        "Respect the platform's terms of service at all times.",
    );

    /// Fixed output-format constraints, placed at the very end of the prompt.
    pub const OUTPUT_CONSTRAINTS: &str = concat!(
        "Respond with only your own message text. ",
        "Do not prefix your reply with your name or a timestamp. ",
        "Do not write messages for other participants. ",
        "Do not reproduce the markup tags used in this prompt.",
    );

    /// Default behavior protocol, replaceable per personality or user.
    pub const BEHAVIOR_PROTOCOL: &str = concat!(
        "Stay in character. ",
        "Address the most recent message in the chat log. ",
        "Use memories only when they are relevant to the conversation.",
    );
}

/// The root configuration structure.
///
/// Maps directly to `~/.chorus/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Default model context window, in tokens
    #[serde(default = "default_context_window")]
    pub context_window_tokens: usize,

    /// IANA timezone used when the requester has none
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// History selection settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Cross-channel history settings
    #[serde(default)]
    pub cross_channel: CrossChannelConfig,

    /// Memory retrieval settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Fixed prompt texts
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Diagnostic recording
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_context_window() -> usize {
    131_072
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Characters per token for the fast selection estimate
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Tokens reserved for the `<chat_log>` wrapper markup
    #[serde(default = "default_wrapper_overhead")]
    pub wrapper_overhead_tokens: usize,

    /// Insert a time-gap marker between entries further apart than this
    #[serde(default = "default_time_gap_minutes")]
    pub time_gap_minutes: i64,

    /// Fraction of the window held back for history when sizing memories
    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: f32,
}

fn default_chars_per_token() -> usize {
    4
}
fn default_wrapper_overhead() -> usize {
    50
}
fn default_time_gap_minutes() -> i64 {
    60
}
fn default_reserve_ratio() -> f32 {
    0.5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            wrapper_overhead_tokens: default_wrapper_overhead(),
            time_gap_minutes: default_time_gap_minutes(),
            reserve_ratio: default_reserve_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrun ratio above which the overrun is logged at warn level
    #[serde(default = "default_warn_overrun")]
    pub warn_overrun_ratio: f32,

    /// Hard ceiling on the overrun ratio; groups are discarded past it
    #[serde(default = "default_max_overrun")]
    pub max_overrun_ratio: f32,
}

fn default_warn_overrun() -> f32 {
    0.05
}
fn default_max_overrun() -> f32 {
    0.10
}

impl Default for CrossChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warn_overrun_ratio: default_warn_overrun(),
            max_overrun_ratio: default_max_overrun(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum candidates requested from the retriever
    #[serde(default = "default_memory_limit")]
    pub limit: usize,

    /// Minimum relevance score requested from the retriever
    #[serde(default)]
    pub min_score: f32,
}

fn default_memory_limit() -> usize {
    15
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            limit: default_memory_limit(),
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_platform_constraints")]
    pub platform_constraints: String,

    #[serde(default = "default_output_constraints")]
    pub output_constraints: String,

    #[serde(default = "default_behavior_protocol")]
    pub behavior_protocol: String,
}

fn default_platform_constraints() -> String {
    defaults::PLATFORM_CONSTRAINTS.into()
}
fn default_output_constraints() -> String {
    defaults::OUTPUT_CONSTRAINTS.into()
}
fn default_behavior_protocol() -> String {
    defaults::BEHAVIOR_PROTOCOL.into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            platform_constraints: default_platform_constraints(),
            output_constraints: default_output_constraints(),
            behavior_protocol: default_behavior_protocol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether diagnostic records are captured
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for JSONL diagnostic records (none = keep in memory only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_dir: Option<PathBuf>,

    /// Records kept by the in-memory recorder
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    500
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record_dir: None,
            max_records: default_max_records(),
        }
    }
}

impl ContextConfig {
    /// Load configuration from the default path (~/.chorus/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CHORUS_CONTEXT_WINDOW`
    /// - `CHORUS_TIMEZONE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(window) = std::env::var("CHORUS_CONTEXT_WINDOW") {
            self.context_window_tokens = window.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CHORUS_CONTEXT_WINDOW must be a positive integer, got '{}'",
                    window
                ))
            })?;
        }

        if let Ok(tz) = std::env::var("CHORUS_TIMEZONE") {
            self.default_timezone = tz;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chorus")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_window_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context_window_tokens must be > 0".into(),
            ));
        }

        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "default_timezone '{}' is not an IANA timezone",
                self.default_timezone
            )));
        }

        if self.history.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "history.chars_per_token must be > 0".into(),
            ));
        }

        if self.history.time_gap_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "history.time_gap_minutes must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.history.reserve_ratio) {
            return Err(ConfigError::ValidationError(
                "history.reserve_ratio must be between 0.0 and 1.0".into(),
            ));
        }

        let cc = &self.cross_channel;
        if cc.warn_overrun_ratio < 0.0 || cc.max_overrun_ratio < 0.0 {
            return Err(ConfigError::ValidationError(
                "cross_channel overrun ratios must be >= 0".into(),
            ));
        }
        if cc.warn_overrun_ratio > cc.max_overrun_ratio {
            return Err(ConfigError::ValidationError(
                "cross_channel.warn_overrun_ratio must not exceed max_overrun_ratio".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: default_context_window(),
            default_timezone: default_timezone(),
            history: HistoryConfig::default(),
            cross_channel: CrossChannelConfig::default(),
            memory: MemoryConfig::default(),
            prompt: PromptConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ContextConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.chars_per_token, 4);
        assert_eq!(config.default_timezone, "UTC");
        assert!(config.cross_channel.enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = ContextConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ContextConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.context_window_tokens, config.context_window_tokens);
        assert_eq!(parsed.prompt.output_constraints, config.prompt.output_constraints);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
context_window_tokens = 8000
default_timezone = "America/New_York"

[history]
time_gap_minutes = 30
"#;
        let config: ContextConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.context_window_tokens, 8000);
        assert_eq!(config.history.time_gap_minutes, 30);
        assert_eq!(config.history.wrapper_overhead_tokens, 50);
        assert!((config.cross_channel.max_overrun_ratio - 0.10).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_timezone_rejected() {
        let config = ContextConfig {
            default_timezone: "Mars/Olympus_Mons".into(),
            ..ContextConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_overrun_ratios_rejected() {
        let mut config = ContextConfig::default();
        config.cross_channel.warn_overrun_ratio = 0.5;
        config.cross_channel.max_overrun_ratio = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let config = ContextConfig {
            context_window_tokens: 0,
            ..ContextConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = ContextConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.context_window_tokens, 131_072);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "context_window_tokens = 32000").unwrap();
        writeln!(file, "[prompt]").unwrap();
        writeln!(file, "behavior_protocol = \"Be terse.\"").unwrap();

        let config = ContextConfig::load_from(&path).unwrap();
        assert_eq!(config.context_window_tokens, 32000);
        assert_eq!(config.prompt.behavior_protocol, "Be terse.");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "context_window_tokens = \"lots\"").unwrap();

        let err = ContextConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = ContextConfig::default_toml();
        assert!(toml_str.contains("context_window_tokens"));
        assert!(toml_str.contains("[cross_channel]"));
    }
}
