use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration loaded from `~/.crosswire/config.toml`.
///
/// Every section has serde defaults, so a partial file (or no file at
/// all) yields a runnable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Config {
    /// Load config from the default path. On first run the file does
    /// not exist yet; defaults are used and written out so the next
    /// edit starts from a complete file.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            if let Err(e) = cfg.save_to(&path) {
                warn!(path = %path.display(), error = %e, "could not write default config");
            }
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        let text = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        std::fs::write(&path, text).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.names.is_empty() {
            return Err(ConfigError::Validation(
                "at least one agent name must be configured".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for name in &self.agents.names {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation("agent names must be non-empty".into()));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate agent name (case-insensitive): {name}"
                )));
            }
        }
        if self.supervisor.poll_interval_ms == 0 {
            return Err(ConfigError::Validation("poll_interval_ms must be > 0".into()));
        }
        if self.routing.reply_timeout_ms == 0 || self.routing.reply_poll_ms == 0 {
            return Err(ConfigError::Validation(
                "routing timeouts must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation("retry max_attempts must be > 0".into()));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".crosswire")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Configured agent identities. Directive targets must be one of these.
    #[serde(default = "default_agent_names")]
    pub names: Vec<String>,
    /// Root directory holding one surface directory per agent.
    #[serde(default = "default_surface_root")]
    pub surface_root: String,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            names: default_agent_names(),
            surface_root: default_surface_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Path of the shared trigger/publish text file.
    #[serde(default = "default_channel_path")]
    pub path: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: default_channel_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Fixed sleep between poll cycles.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// One-time delay before the first cycle, so surfaces can come up.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// How long the router waits for a target agent's reply to stabilize.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Poll interval inside the reply stabilization wait.
    #[serde(default = "default_reply_poll_ms")]
    pub reply_poll_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            reply_poll_ms: default_reply_poll_ms(),
        }
    }
}

impl RoutingConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn reply_poll(&self) -> Duration {
        Duration::from_millis(self.reply_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per surface operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts; attempt n waits n * backoff_ms.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Pause between tearing surfaces down and recreating them.
    #[serde(default = "default_recovery_pause_ms")]
    pub pause_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pause_ms: default_recovery_pause_ms(),
        }
    }
}

impl RecoveryConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".into()
}

fn default_agent_names() -> Vec<String> {
    vec!["Gemini".into(), "ChatGPT".into(), "Deepseek".into()]
}

fn default_surface_root() -> String {
    "~/.crosswire/surfaces".into()
}

fn default_channel_path() -> String {
    "~/.crosswire/channel.txt".into()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_startup_delay_ms() -> u64 {
    10_000
}

fn default_reply_timeout_ms() -> u64 {
    300_000
}

fn default_reply_poll_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2_000
}

fn default_recovery_pause_ms() -> u64 {
    15_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
