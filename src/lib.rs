//! mcp-bridge library
//!
//! Bridges one stdio MCP child process onto a single Streamable HTTP
//! endpoint serving JSON batch replies and Server-Sent Events streams.
//! The binary in `main.rs` is a thin CLI around [`Gateway`].

pub mod child;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod signals;
pub mod types;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use gateway::Gateway;
