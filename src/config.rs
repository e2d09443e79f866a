//! Configuration file support for finchat
//!
//! Config is loaded from `~/.finchat/config.toml` (or `$FINCHAT_HOME/config.toml`)
//! Environment variables override config file settings.

use crate::mcp::ProcessSpec;
use crate::storage::finchat_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global config instance (loaded once on first access)
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::load)
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// MCP server process and protocol settings
    pub mcp: McpConfig,

    /// HTTP API settings
    pub server: ServerConfig,
}

/// How to launch and talk to the MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Executable to launch (default: "mongodb-mcp-server")
    pub command: String,
    /// Extra arguments placed before the credential flags
    pub args: Vec<String>,
    /// Extra environment for the child
    pub env: HashMap<String, String>,
    pub connection_string: Option<String>,
    pub api_client_id: Option<String>,
    pub api_client_secret: Option<String>,
    /// Pass `--readOnly` (default: true)
    pub read_only: bool,
    /// Deadline for `tools/call` in seconds (default: 15)
    pub tool_timeout_secs: u64,
    /// Deadline for `initialize` and `tools/list` in seconds (default: 15)
    pub list_timeout_secs: u64,
    /// Run the `initialize` handshake before listing tools (default: true)
    pub handshake: bool,
    /// Fail in-flight requests as soon as the server's stdout closes instead of
    /// letting them run into their deadline (default: true)
    pub fail_pending_on_exit: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: "mongodb-mcp-server".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            connection_string: None,
            api_client_id: None,
            api_client_secret: None,
            read_only: true,
            tool_timeout_secs: 15,
            list_timeout_secs: 15,
            handshake: true,
            fail_pending_on_exit: true,
        }
    }
}

impl McpConfig {
    /// The process to launch, or `None` when a credential is missing.
    pub fn process_spec(&self) -> Option<ProcessSpec> {
        let connection_string = non_empty(self.connection_string.as_deref())?;
        let api_client_id = non_empty(self.api_client_id.as_deref())?;
        let api_client_secret = non_empty(self.api_client_secret.as_deref())?;

        let mut args = self.args.clone();
        args.extend([
            "--connectionString".to_string(),
            connection_string.to_string(),
            "--apiClientId".to_string(),
            api_client_id.to_string(),
            "--apiClientSecret".to_string(),
            api_client_secret.to_string(),
        ]);
        if self.read_only {
            args.push("--readOnly".to_string());
        }

        Some(ProcessSpec {
            command: self.command.clone(),
            args,
            env: self.env.clone(),
        })
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs.max(1))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (default: 127.0.0.1:3000)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Option<PathBuf> {
        finchat_dir().ok().map(|d| d.join("config.toml"))
    }

    /// Load config from file, with environment variable overrides
    pub fn load() -> Self {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load config from file only (no env overrides)
    fn load_from_file() -> Option<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&path).ok()?;
        match Self::from_toml(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                crate::logging::error(&format!("Failed to parse config file: {}", e));
                None
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides. `lookup` is `std::env::var` in
    /// production.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

        if let Some(v) = lookup("FINCHAT_MCP_COMMAND") {
            self.mcp.command = v;
        }
        if let Some(v) = first(&[
            "FINCHAT_MCP_CONNECTION_STRING",
            "NEXT_PUBLIC_MCP_CONNECTION_STRING",
        ]) {
            self.mcp.connection_string = Some(v);
        }
        if let Some(v) = first(&["FINCHAT_MCP_API_CLIENT_ID", "NEXT_PUBLIC_MCP_API_CLIENT_ID"]) {
            self.mcp.api_client_id = Some(v);
        }
        if let Some(v) = first(&[
            "FINCHAT_MCP_API_CLIENT_SECRET",
            "NEXT_PUBLIC_MCP_API_CLIENT_SECRET",
        ]) {
            self.mcp.api_client_secret = Some(v);
        }
        if let Some(v) = lookup("FINCHAT_MCP_READ_ONLY") {
            if let Some(parsed) = parse_env_bool(&v) {
                self.mcp.read_only = parsed;
            }
        }
        if let Some(v) = lookup("FINCHAT_MCP_TOOL_TIMEOUT_SECS") {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.mcp.tool_timeout_secs = secs,
                Err(_) => crate::logging::warn(&format!(
                    "Ignoring FINCHAT_MCP_TOOL_TIMEOUT_SECS={:?}: not a number",
                    v
                )),
            }
        }

        if let Some(v) = lookup("FINCHAT_BIND") {
            self.server.bind = v;
        }
    }

    /// Human-readable summary for `finchat status`. Secrets are masked.
    pub fn display_string(&self) -> String {
        let mask = |v: &Option<String>| match non_empty(v.as_deref()) {
            Some(_) => "(set)",
            None => "(missing)",
        };
        let path = Self::path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(unknown)".to_string());
        format!(
            "Config: {}\n\
             mcp.command = {}\n\
             mcp.connection_string = {}\n\
             mcp.api_client_id = {}\n\
             mcp.api_client_secret = {}\n\
             mcp.read_only = {}\n\
             mcp.tool_timeout_secs = {}\n\
             server.bind = {}",
            path,
            self.mcp.command,
            mask(&self.mcp.connection_string),
            mask(&self.mcp.api_client_id),
            mask(&self.mcp.api_client_secret),
            self.mcp.read_only,
            self.mcp.tool_timeout_secs,
            self.server.bind,
        )
    }
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
