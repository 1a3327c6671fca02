//! Demultiplexes child stdout back to waiting responses and SSE streams.
//!
//! The child's stdout is one ordered stream with no addressing, so every
//! session is scanned for each message: an id-bearing reply lands on the
//! session that has that id in flight, an id-less notification is broadcast
//! to every session's live streams. Correctness rests on JSON-RPC id
//! uniqueness among the ids currently in flight.

use crate::config::ResponseMode;
use crate::session::SessionRegistry;
use crate::types;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Consume parsed child stdout lines until the channel closes.
pub async fn run(
    registry: Arc<SessionRegistry>,
    mut lines: mpsc::Receiver<Value>,
    mode: ResponseMode,
) {
    while let Some(msg) = lines.recv().await {
        dispatch(&registry, &msg, mode);
    }
    debug!("Child output channel closed; correlator stopping");
}

/// Route one child message to the sessions that want it.
pub fn dispatch(registry: &SessionRegistry, msg: &Value, mode: ResponseMode) {
    match msg.get("id") {
        Some(id) => {
            let key = types::id_key(id);
            let envelope = types::response_envelope(msg);
            for session in registry.snapshot() {
                session.deliver_response(&key, &envelope, mode);
            }
        }
        None => {
            let envelope = types::notification_envelope(msg);
            for session in registry.snapshot() {
                session.broadcast(&envelope);
            }
        }
    }
}
