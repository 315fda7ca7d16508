//! Configuration management for the server.
//!
//! Configuration is read once at startup from the environment (after loading
//! `.env` with dotenvy) and then passed down as plain values. Nothing below
//! this module reads tool settings from the environment.

use super::transport::TransportConfig;
use crate::domains::settings::find_project_root;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Tool discovery and execution.
    pub tools: ToolsConfig,

    /// Persisted secrets.
    pub settings: SettingsConfig,

    /// Transport configuration.
    pub transport: TransportConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

/// When the registry checks the tools directory for changes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoReload {
    /// Only explicit reloads rescan.
    Disabled,
    /// Check on every listing and execute request.
    Continuous,
    /// Check at most once per interval.
    Interval(Duration),
}

/// Configuration for the tools domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory holding the tool manifests.
    pub directory: PathBuf,

    /// Default bound on a single execution.
    pub execute_timeout: Duration,

    /// Auto-reload policy.
    pub auto_reload: AutoReload,

    /// Treat every listing request as a forced reload.
    pub force_reload: bool,
}

/// Configuration for the secrets endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// `.env` file updated by `POST /config`. Defaults to the project root.
    pub env_file: Option<PathBuf>,
}

impl SettingsConfig {
    /// The `.env` file to write, resolving the default against `cwd`.
    pub fn resolve_env_file(&self, cwd: &Path) -> PathBuf {
        self.env_file
            .clone()
            .unwrap_or_else(|| find_project_root(cwd).join(".env"))
    }
}

const DEFAULT_TOOLS_DIR: &str = "./tools";
const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 30;

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_TOOLS_DIR),
            execute_timeout: Duration::from_secs(DEFAULT_EXECUTE_TIMEOUT_SECS),
            auto_reload: AutoReload::Continuous,
            force_reload: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "tooldock".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig::default(),
            tools: ToolsConfig::default(),
            settings: SettingsConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

fn env_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables are prefixed with `MCP_`, e.g. `MCP_TOOLS_DIR`,
    /// `MCP_EXECUTE_TIMEOUT_SEC`, `MCP_AUTO_RELOAD_INTERVAL_MS`.
    ///
    /// Logs emitted while loading are only visible if a subscriber is
    /// already installed; see [`LoggingConfig::from_env`].
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            config.server.name = name;
        }

        config.logging = LoggingConfig::from_env();

        config.tools = ToolsConfig::from_env();

        if let Ok(env_file) = std::env::var("MCP_ENV_FILE") {
            config.settings.env_file = Some(PathBuf::from(env_file));
        }

        config.transport = TransportConfig::from_env();

        config
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_timestamps: true,
        }
    }
}

impl LoggingConfig {
    /// Load the logging section on its own (`.env` included), so logging can
    /// be set up before the rest of the configuration is read.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut logging = Self::default();
        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            logging.level = level;
        }
        logging
    }
}

impl ToolsConfig {
    /// Load the tools section from `MCP_TOOLS_DIR`, `MCP_EXECUTE_TIMEOUT_SEC`,
    /// `MCP_AUTO_RELOAD`, `MCP_AUTO_RELOAD_INTERVAL_MS` and `MCP_FORCE_RELOAD`.
    pub fn from_env() -> Self {
        let mut tools = Self::default();

        if let Ok(dir) = std::env::var("MCP_TOOLS_DIR") {
            tools.directory = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("MCP_EXECUTE_TIMEOUT_SEC") {
            let parsed = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            match parsed {
                Some(timeout) => tools.execute_timeout = timeout,
                None => warn!(value = %raw, "Ignoring invalid MCP_EXECUTE_TIMEOUT_SEC"),
            }
        }

        let enabled = std::env::var("MCP_AUTO_RELOAD")
            .ok()
            .and_then(|v| env_flag(&v))
            .unwrap_or(true);
        let interval_ms = std::env::var("MCP_AUTO_RELOAD_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        tools.auto_reload = match (enabled, interval_ms) {
            (false, _) => AutoReload::Disabled,
            (true, 0) => AutoReload::Continuous,
            (true, ms) => AutoReload::Interval(Duration::from_millis(ms)),
        };

        tools.force_reload = std::env::var("MCP_FORCE_RELOAD")
            .ok()
            .and_then(|v| env_flag(&v))
            .unwrap_or(false);

        info!(
            directory = %tools.directory.display(),
            timeout_ms = tools.execute_timeout.as_millis() as u64,
            auto_reload = ?tools.auto_reload,
            force_reload = tools.force_reload,
            "Tools configuration loaded"
        );

        tools
    }
}
