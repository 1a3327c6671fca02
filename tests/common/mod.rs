//! Common test utilities for integration tests
#![allow(dead_code)]

use mcp_bridge::child;
use mcp_bridge::config::GatewayConfig;
use mcp_bridge::Gateway;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Create a test configuration with the given child command; everything
/// else is defaults on 127.0.0.1.
pub fn test_config(command: &str) -> GatewayConfig {
    GatewayConfig {
        command: command.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

pub struct TestGateway {
    pub addr: SocketAddr,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn endpoint(&self) -> String {
        self.url("/mcp")
    }
}

/// Boot the gateway in-process on an ephemeral port against the configured
/// child command. Child-exit handling is intentionally not wired up here:
/// the test process must not be terminated mid-run.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    config.validate().expect("invalid test config");

    let (handle, events) = child::spawn(&config.command).expect("failed to spawn child");
    let listener = TcpListener::bind((config.host.as_str(), 0)).await.expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    let gateway = Gateway::new(config, handle, events.lines);
    tokio::spawn(gateway.run(listener, std::future::pending()));

    TestGateway { addr }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build client")
}

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

/// Parse SSE wire text into frames (`id:` / `event:` / `data:` fields,
/// blank-line separated).
pub fn parse_frames(raw: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    for block in raw.split("\n\n") {
        let mut frame = Frame {
            id: None,
            event: None,
            data: String::new(),
        };
        let mut saw_field = false;
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("id:") {
                frame.id = rest.trim().parse().ok();
                saw_field = true;
            } else if let Some(rest) = line.strip_prefix("event:") {
                frame.event = Some(rest.trim().to_string());
                saw_field = true;
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !frame.data.is_empty() {
                    frame.data.push('\n');
                }
                frame.data.push_str(rest.trim());
                saw_field = true;
            }
        }
        if saw_field {
            frames.push(frame);
        }
    }
    frames
}

/// Read from a live SSE response until `count` complete frames have
/// arrived or the timeout elapses; returns whatever was complete by then.
pub async fn read_frames(
    response: reqwest::Response,
    count: usize,
    timeout: Duration,
) -> Vec<Frame> {
    use futures::StreamExt;

    let mut stream = response.bytes_stream();
    let mut raw = String::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let complete = match raw.rfind("\n\n") {
            Some(idx) => parse_frames(&raw[..idx + 1]),
            None => Vec::new(),
        };
        if complete.len() >= count {
            return complete;
        }
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(bytes))) => raw.push_str(&String::from_utf8_lossy(&bytes)),
            _ => {
                return match raw.rfind("\n\n") {
                    Some(idx) => parse_frames(&raw[..idx + 1]),
                    None => Vec::new(),
                }
            }
        }
    }
}
