//! Per-request timeout timers.
//!
//! Every id-bearing POST arms a one-shot timer. Whichever of reply,
//! disconnect, or timer wins removes the pending entry; the losers find
//! nothing and exit silently.

use crate::session::{BatchReply, Session};
use crate::types;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Arm the timer for a batch-mode pending request. On expiry the held
/// response is released with a 504 timeout envelope citing the original id.
pub fn arm_batch(session: Arc<Session>, key: String, id: Value, timeout: Duration) {
    tokio::spawn(async move {
        sleep(timeout).await;
        if let Some(tx) = session.expire_batch(&key) {
            warn!("Request {} in session {} timed out", key, session.id);
            let body = types::rpc_error(types::GATEWAY_ERROR, "Request timeout", id);
            let _ = tx.send(BatchReply { status: 504, body });
        }
    });
}

/// Stream-mode variant: the timeout error goes out as an SSE event on the
/// POST's own stream, which is then ended.
pub fn arm_stream(
    session: Arc<Session>,
    key: String,
    stream_key: String,
    id: Value,
    timeout: Duration,
) {
    tokio::spawn(async move {
        sleep(timeout).await;
        let body = types::rpc_error(types::GATEWAY_ERROR, "Request timeout", id);
        if session.expire_stream(&key, &stream_key, &body) {
            warn!("Request {} in session {} timed out", key, session.id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use crate::session::SessionRegistry;
    use serde_json::json;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn fires_with_timeout_envelope() {
        let registry = SessionRegistry::new();
        let (session, _) = registry.get_or_create(None);

        let (tx, rx) = oneshot::channel();
        session.register_batch("q", json!({"id": "q", "method": "slow"}), tx);
        arm_batch(
            session.clone(),
            "q".into(),
            json!("q"),
            Duration::from_millis(20),
        );

        let reply = rx.await.unwrap();
        assert_eq!(reply.status, 504);
        assert_eq!(
            reply.body,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Request timeout"},
                "id": "q",
            })
        );
    }

    #[tokio::test]
    async fn fires_into_nothing_after_reply() {
        let registry = SessionRegistry::new();
        let (session, _) = registry.get_or_create(None);

        let (tx, rx) = oneshot::channel();
        session.register_batch("7", json!({"id": 7}), tx);
        arm_batch(
            session.clone(),
            "7".into(),
            json!(7),
            Duration::from_millis(20),
        );

        session.deliver_response(
            "7",
            &json!({"jsonrpc": "2.0", "result": null, "id": 7}),
            ResponseMode::Batch,
        );
        let reply = rx.await.unwrap();
        assert_eq!(reply.status, 200);

        // Let the timer fire; it must not panic or touch anything.
        sleep(Duration::from_millis(40)).await;
    }
}
