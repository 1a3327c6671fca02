//! Gateway configuration.
//!
//! Loaded from an optional YAML file and overridden by CLI flags; every
//! field other than the child command has a serde default.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Request bodies larger than this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Shell command that starts the child MCP server.
    #[serde(default)]
    pub command: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoint path serving GET/POST/DELETE/OPTIONS.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Header carrying the session id, echoed on every endpoint response.
    #[serde(default = "default_session_header")]
    pub session_header: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    /// Milliseconds to wait for a child reply before synthesizing a timeout.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Paths answering GET with `ok`.
    #[serde(default)]
    pub health_endpoints: Vec<String>,
    /// Static headers applied to every response.
    #[serde(default)]
    pub static_headers: HashMap<String, String>,
    /// CORS origin; `*` mirrors the request origin.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

/// Response strategy for id-bearing POSTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Hold the POST until the child replies, then return one JSON body.
    #[default]
    Batch,
    /// Answer the POST with an SSE stream; replies fan out to the session's
    /// streams.
    Stream,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            host: default_host(),
            port: default_port(),
            endpoint: default_endpoint(),
            session_header: default_session_header(),
            response_mode: ResponseMode::default(),
            batch_timeout_ms: default_batch_timeout_ms(),
            health_endpoints: Vec::new(),
            static_headers: HashMap::new(),
            cors_origin: default_cors_origin(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::Config("child command must not be empty".into()));
        }
        if !self.endpoint.starts_with('/') {
            return Err(Error::Config(format!(
                "endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        for path in &self.health_endpoints {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "health endpoint must start with '/': {path}"
                )));
            }
        }
        if self.session_header.trim().is_empty() {
            return Err(Error::Config("session header name must not be empty".into()));
        }
        if self.batch_timeout_ms == 0 {
            return Err(Error::Config("batch timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Parse repeatable `"Name: Value"` CLI header flags.
pub fn parse_header_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("invalid header, expected 'Name: Value': {pair}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(format!("empty header name: {pair}")));
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_endpoint() -> String {
    "/mcp".to_string()
}
fn default_session_header() -> String {
    "Mcp-Session-Id".to_string()
}
fn default_batch_timeout_ms() -> u64 {
    30000
}
fn default_cors_origin() -> String {
    "*".to_string()
}
