//! Shutdown signal plumbing.

use tokio::sync::broadcast;
use tracing::{error, info};

/// Install SIGTERM/SIGINT handlers and return a channel that fires once
/// when either arrives. The server subscribes and drains gracefully.
pub fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    let (tx, rx) = broadcast::channel(1);
    let notify = tx.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        if let Err(e) = notify.send(()) {
            error!("Failed to publish shutdown signal: {}", e);
        }
    });

    (tx, rx)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
}

// Windows has no SIGTERM; Ctrl+C is the only shutdown signal.
#[cfg(windows)]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Received Ctrl+C, initiating graceful shutdown");
}
