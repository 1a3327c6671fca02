//! Child process supervision.
//!
//! Exactly one child exists for the lifetime of the gateway. HTTP handlers
//! enqueue outbound messages on a channel; a single writer task owns stdin,
//! so each serialized message is followed by its newline before the next
//! begins. Stdout is framed into JSON lines for the correlator, stderr is
//! drained to the log, and child exit is published to the caller, which
//! terminates the gateway with the child's exit code.

pub mod framer;

use crate::error::{Error, Result};
use framer::JsonLineCodec;
use futures::StreamExt;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info};

/// Outbound queue depth; senders block once the child stops draining stdin.
const CHANNEL_DEPTH: usize = 64;

/// Write handle for the child's stdin.
#[derive(Clone)]
pub struct ChildHandle {
    outbound: mpsc::Sender<Value>,
}

impl ChildHandle {
    /// Enqueue one JSON-RPC message for the child. Fails only when the
    /// child is gone.
    pub async fn send(&self, msg: Value) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| Error::Child("child stdin closed".into()))
    }
}

/// Read-side subscriptions produced by [`spawn`].
pub struct ChildEvents {
    /// One parsed JSON object per child stdout line, in write order.
    pub lines: mpsc::Receiver<Value>,
    /// Resolves with the child's exit code when it terminates.
    pub exit: oneshot::Receiver<i32>,
}

/// Spawn the child with the configured shell command and wire up its pipes.
pub fn spawn(command: &str) -> Result<(ChildHandle, ChildEvents)> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Child(format!("failed to spawn `{command}`: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Child("no stdin handle".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Child("no stdout handle".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Child("no stderr handle".into()))?;

    info!("Spawned child process: {}", command);

    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (lines_tx, lines_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(write_stdin(stdin, outbound_rx));
    tokio::spawn(read_stdout(stdout, lines_tx));
    tokio::spawn(drain_stderr(stderr));
    tokio::spawn(watch_exit(child, exit_tx));

    Ok((
        ChildHandle {
            outbound: outbound_tx,
        },
        ChildEvents {
            lines: lines_rx,
            exit: exit_rx,
        },
    ))
}

/// Serialize messages one line at a time. The newline is the only framing
/// the child has, so a message must be fully written before the next one
/// starts.
async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Value>) {
    while let Some(msg) = rx.recv().await {
        let mut line = msg.to_string();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!("Failed to write to child stdin: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!("Failed to flush child stdin: {}", e);
            break;
        }
        debug!(
            "Forwarded to child: {}",
            line.trim_end().chars().take(120).collect::<String>()
        );
    }
    debug!("Child stdin writer stopping");
}

async fn read_stdout(stdout: ChildStdout, tx: mpsc::Sender<Value>) {
    let mut frames = FramedRead::new(stdout, JsonLineCodec::default());
    while let Some(next) = frames.next().await {
        match next {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Child stdout read error: {}", e);
                break;
            }
        }
    }
    debug!("Child stdout closed");
}

// Children log startup noise to stderr; an undrained pipe eventually blocks
// the whole process on a full buffer.
async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    info!(target: "child_stderr", "{}", trimmed);
                }
            }
            Err(e) => {
                debug!("Child stderr read error: {}", e);
                break;
            }
        }
    }
}

async fn watch_exit(mut child: Child, exit_tx: oneshot::Sender<i32>) {
    match child.wait().await {
        Ok(status) => {
            error!("Child process exited: {:?}", status);
            let _ = exit_tx.send(status.code().unwrap_or(1));
        }
        Err(e) => {
            error!("Failed to wait on child process: {}", e);
            let _ = exit_tx.send(1);
        }
    }
}
