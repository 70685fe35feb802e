//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `COURIER`-prefixed environment variables (`__` separates nested
//! keys, e.g. `COURIER_CHAT__WS_URL`).

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "COURIER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chat: ChatSettings,
    pub directory: DirectorySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Messaging endpoint URL.
    pub ws_url: String,
    /// Fixed reconnect delay in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Capacity of the outbound send queue.
    pub outbound_buffer: usize,
    /// Capacity of the inbound frame queue.
    pub inbound_buffer: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:4000/ws/chat".to_string(),
            reconnect_interval_ms: 3000,
            outbound_buffer: 64,
            inbound_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Base URL of the user directory API.
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000/api".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings, layering the optional config file and environment
    /// overrides on top of the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Default configuration rendered as TOML, for `--init-config`.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Settings::default())
            .expect("default settings serialize to TOML")
    }
}
