//! Client configuration
//!
//! Endpoints and timing knobs for the chat client. Stored as JSON and
//! overridable from the environment.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the websocket protocol (`ws` or `wss`)
pub const ENV_WS_PROTOCOL: &str = "TUTORCHAT_WS_PROTOCOL";
/// Environment variable overriding the websocket host
pub const ENV_WS_HOST: &str = "TUTORCHAT_WS_HOST";
/// Environment variable overriding the HTTP API base URL
pub const ENV_API_URL: &str = "TUTORCHAT_API_URL";
/// Environment variable overriding the session file path
pub const ENV_SESSION_PATH: &str = "TUTORCHAT_SESSION_PATH";

/// Chat client configuration
///
/// # Example
/// ```rust,no_run
/// use tutorchat::config::ClientConfig;
///
/// let mut config = ClientConfig::load("tutorchat.json").expect("Failed to load");
/// config.apply_env();
/// config.validate().expect("Invalid config");
/// println!("Chat host: {}", config.ws_host);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Websocket scheme, `ws` or `wss`
    pub ws_protocol: String,
    /// Websocket host (and optional port)
    pub ws_host: String,
    /// Base URL of the REST backend
    pub api_base_url: String,
    /// First reconnect delay in milliseconds
    pub reconnect_floor_ms: u64,
    /// Maximum reconnect delay in milliseconds
    pub reconnect_ceiling_ms: u64,
    /// How long a typing signal stays visible without a refresh
    pub typing_timeout_ms: u64,
    /// Where the logged-in session is persisted
    pub session_path: String,
}

impl ClientConfig {
    /// Load configuration from a JSON file
    ///
    /// Returns defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a JSON file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Apply `TUTORCHAT_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup(ENV_WS_PROTOCOL) {
            self.ws_protocol = v;
        }
        if let Some(v) = lookup(ENV_WS_HOST) {
            self.ws_host = v;
        }
        if let Some(v) = lookup(ENV_API_URL) {
            self.api_base_url = v;
        }
        if let Some(v) = lookup(ENV_SESSION_PATH) {
            self.session_path = v;
        }
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.ws_protocol != "ws" && self.ws_protocol != "wss" {
            return Err(Error::Config(format!(
                "ws_protocol must be 'ws' or 'wss', got '{}'",
                self.ws_protocol
            )));
        }
        if self.ws_host.trim().is_empty() {
            return Err(Error::Config("ws_host is empty".to_string()));
        }
        url::Url::parse(&self.api_base_url)?;
        if self.reconnect_floor_ms == 0 {
            return Err(Error::Config("reconnect_floor_ms must be positive".to_string()));
        }
        if self.reconnect_floor_ms > self.reconnect_ceiling_ms {
            return Err(Error::Config(format!(
                "reconnect_floor_ms ({}) exceeds reconnect_ceiling_ms ({})",
                self.reconnect_floor_ms, self.reconnect_ceiling_ms
            )));
        }
        Ok(())
    }

    /// First reconnect delay
    pub fn reconnect_floor(&self) -> Duration {
        Duration::from_millis(self.reconnect_floor_ms)
    }

    /// Maximum reconnect delay
    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_ceiling_ms)
    }

    /// Typing indicator lifetime
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_protocol: "wss".to_string(),
            ws_host: "localhost:8000".to_string(),
            api_base_url: "http://localhost:8000".to_string(),
            reconnect_floor_ms: 1_000,
            reconnect_ceiling_ms: 16_000,
            typing_timeout_ms: 2_000,
            session_path: "./data/session.json".to_string(),
        }
    }
}
