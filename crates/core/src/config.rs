//! Relay configuration
//!
//! Loaded from a TOML file with `[chat]`, `[telegram]` and `[log]` sections.
//! The default location is `hcrelay.toml` in the platform config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Public hack.chat WebSocket endpoint
pub const DEFAULT_CHAT_URL: &str = "wss://hack.chat/chat-ws";

/// Default Telegram Bot API endpoint
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

const CONFIG_FILE_NAME: &str = "hcrelay.toml";

/// Whole relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub chat: ChatConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Chat room connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub url: String,
    pub channel: String,
    pub nick: String,
    /// Sent as `nick#password` so the server derives a trip code
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Limit on dialing, the handshake and the join
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// The only chat the bot talks to
    pub chat_id: i64,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

/// Chat log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

fn default_chat_url() -> String {
    DEFAULT_CHAT_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_ping_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_telegram_api() -> String {
    DEFAULT_TELEGRAM_API.to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_log_path() -> PathBuf {
    PathBuf::from("hcrelay.log")
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine config directory")]
    NoConfigDir,
}

impl RelayConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate config text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `hcrelay.toml` in the platform config directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("org", "hcrelay", "hcrelay").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chat = &self.chat;
        if chat.nick.trim().is_empty() {
            return Err(ConfigError::Invalid("chat.nick must not be empty".into()));
        }
        // '#' separates the nick from the password on the wire
        if chat.nick.contains('#') {
            return Err(ConfigError::Invalid("chat.nick must not contain '#'".into()));
        }
        if chat.channel.trim().is_empty() {
            return Err(ConfigError::Invalid("chat.channel must not be empty".into()));
        }
        if chat.url.trim().is_empty() {
            return Err(ConfigError::Invalid("chat.url must not be empty".into()));
        }
        for (name, value) in [
            ("chat.reconnect_delay_secs", chat.reconnect_delay_secs),
            ("chat.read_timeout_ms", chat.read_timeout_ms),
            ("chat.ping_interval_secs", chat.ping_interval_secs),
            ("chat.connect_timeout_secs", chat.connect_timeout_secs),
            ("telegram.poll_timeout_secs", self.telegram.poll_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram.token must not be empty".into()));
        }
        Ok(())
    }
}

impl ChatConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}
