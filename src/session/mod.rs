//! Session registry and per-session multiplexing state.
//!
//! A session is the correlation context for one remote client: the table of
//! requests in flight, the live HTTP response handles waiting for a write,
//! and the bounded broadcast history that backs `Last-Event-ID` resume.
//! Sessions are created on first contact, shared across handlers and the
//! correlator, and destroyed only by an explicit DELETE.

use crate::config::ResponseMode;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Bound on the per-session broadcast history kept for SSE resume.
pub const HISTORY_LIMIT: usize = 100;

/// One SSE frame queued to a stream slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn to_event(&self) -> axum::response::sse::Event {
        let mut event = axum::response::sse::Event::default();
        if let Some(id) = self.id {
            event = event.id(id.to_string());
        }
        if let Some(name) = &self.event {
            event = event.event(name);
        }
        event.data(&self.data)
    }
}

/// A JSON reply released to a held batch POST.
#[derive(Debug)]
pub struct BatchReply {
    pub status: u16,
    pub body: Value,
}

/// Live HTTP response handle held by the gateway pending a write.
///
/// Batch slots are keyed by the stringified request id and receive exactly
/// one JSON body. Stream slots are keyed by a random UUID and receive SSE
/// frames until closed. Request-id lookups therefore only ever match batch
/// slots, and broadcast only ever targets stream slots.
pub enum ResponseSlot {
    Batch(oneshot::Sender<BatchReply>),
    Stream(mpsc::UnboundedSender<SseFrame>),
}

#[derive(Default)]
struct SessionInner {
    responses: HashMap<String, ResponseSlot>,
    pending: HashMap<String, Value>,
    history: VecDeque<Value>,
    last_event_id: u64,
}

pub struct Session {
    pub id: String,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    /// Register a held batch POST: the original request goes into the
    /// pending table and the response sender into the slot map, atomically.
    pub fn register_batch(&self, key: &str, request: Value, tx: oneshot::Sender<BatchReply>) {
        let mut inner = self.inner.lock();
        inner.pending.insert(key.to_string(), request);
        inner.responses.insert(key.to_string(), ResponseSlot::Batch(tx));
    }

    /// Open an SSE stream under a fresh stream key. When resuming, the
    /// history suffix starting at `resume_from` is queued first with replay
    /// ids `N, N+1, ..`, atomically with registration so no concurrent
    /// broadcast is missed or duplicated.
    pub fn open_stream(
        &self,
        tx: mpsc::UnboundedSender<SseFrame>,
        resume_from: Option<u64>,
    ) -> String {
        let key = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        if let Some(base) = resume_from {
            for (offset, payload) in inner.history.iter().skip(base as usize).enumerate() {
                let _ = tx.send(SseFrame {
                    id: Some(base + offset as u64),
                    event: None,
                    data: payload.to_string(),
                });
            }
        }
        inner.responses.insert(key.clone(), ResponseSlot::Stream(tx));
        key
    }

    /// Stream-mode POST registration: pending entry plus the POST's own SSE
    /// stream, in one step. The stream is keyed by a UUID, never by the
    /// request id.
    pub fn open_request_stream(
        &self,
        key: &str,
        request: Value,
        tx: mpsc::UnboundedSender<SseFrame>,
    ) -> String {
        let stream_key = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        inner.pending.insert(key.to_string(), request);
        inner
            .responses
            .insert(stream_key.clone(), ResponseSlot::Stream(tx));
        stream_key
    }

    /// Remove one response slot (stream teardown on client close).
    pub fn remove_response(&self, key: &str) {
        self.inner.lock().responses.remove(key);
    }

    /// Remove a pending request and its response slot together (client
    /// disconnect before the reply arrived).
    pub fn complete_request(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.pending.remove(key);
        inner.responses.remove(key);
    }

    /// Route one id-bearing child reply into this session.
    ///
    /// Order matters: a live slot under the request-id key wins (direct JSON
    /// reply to the originating POST); otherwise a pending entry marks the
    /// reply as ours and it is broadcast (stream mode) or written to the
    /// first live batch slot (batch mode); otherwise the reply is not ours.
    pub fn deliver_response(&self, key: &str, envelope: &Value, mode: ResponseMode) {
        let mut inner = self.inner.lock();

        let direct = matches!(
            inner.responses.get(key),
            Some(ResponseSlot::Batch(tx)) if !tx.is_closed()
        );
        if direct {
            let Some(ResponseSlot::Batch(tx)) = inner.responses.remove(key) else {
                return;
            };
            inner.pending.remove(key);
            drop(inner);
            let _ = tx.send(BatchReply {
                status: 200,
                body: envelope.clone(),
            });
            debug!("Delivered reply {} to session {}", key, self.id);
            return;
        }

        if inner.pending.remove(key).is_none() {
            return;
        }

        match mode {
            ResponseMode::Stream => {
                Self::broadcast_locked(&mut inner, envelope);
            }
            ResponseMode::Batch => {
                // The originating slot is gone (client closed mid-flight);
                // the first live batch slot wins.
                let fallback = inner.responses.iter().find_map(|(k, slot)| match slot {
                    ResponseSlot::Batch(tx) if !tx.is_closed() => Some(k.clone()),
                    _ => None,
                });
                match fallback {
                    Some(k) => {
                        let Some(ResponseSlot::Batch(tx)) = inner.responses.remove(&k) else {
                            return;
                        };
                        drop(inner);
                        let _ = tx.send(BatchReply {
                            status: 200,
                            body: envelope.clone(),
                        });
                    }
                    None => {
                        warn!(
                            "No live response handle in session {} for reply {}; dropping",
                            self.id, key
                        );
                    }
                }
            }
        }
    }

    /// Broadcast a payload to every live stream: next event id, fan-out,
    /// history append with shift at the bound.
    pub fn broadcast(&self, payload: &Value) {
        let mut inner = self.inner.lock();
        Self::broadcast_locked(&mut inner, payload);
    }

    fn broadcast_locked(inner: &mut SessionInner, payload: &Value) {
        inner.last_event_id += 1;
        let frame = SseFrame {
            id: Some(inner.last_event_id),
            event: None,
            data: payload.to_string(),
        };
        inner.responses.retain(|_, slot| match slot {
            ResponseSlot::Stream(tx) => tx.send(frame.clone()).is_ok(),
            ResponseSlot::Batch(_) => true,
        });
        inner.history.push_back(payload.clone());
        if inner.history.len() > HISTORY_LIMIT {
            inner.history.pop_front();
        }
    }

    /// Timeout expiry for a batch request. Returns the held sender iff the
    /// request is still pending; a reply or disconnect that got there first
    /// leaves nothing to do.
    pub fn expire_batch(&self, key: &str) -> Option<oneshot::Sender<BatchReply>> {
        let mut inner = self.inner.lock();
        inner.pending.remove(key)?;
        match inner.responses.remove(key) {
            Some(ResponseSlot::Batch(tx)) => Some(tx),
            Some(other) => {
                // A stream slot under this key is not ours to end.
                inner.responses.insert(key.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Timeout expiry for a stream-mode request: emit the error payload as
    /// the final event on the POST's own stream and end it. Returns false
    /// when the reply already arrived.
    pub fn expire_stream(&self, key: &str, stream_key: &str, payload: &Value) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.remove(key).is_none() {
            return false;
        }
        inner.last_event_id += 1;
        let frame = SseFrame {
            id: Some(inner.last_event_id),
            event: None,
            data: payload.to_string(),
        };
        if let Some(ResponseSlot::Stream(tx)) = inner.responses.remove(stream_key) {
            let _ = tx.send(frame);
        }
        true
    }

    /// End every live response handle and clear the pending table (DELETE).
    /// Dropping the senders completes held POSTs and terminates streams.
    pub fn end_all(&self) {
        let mut inner = self.inner.lock();
        inner.responses.clear();
        inner.pending.clear();
    }
}

/// Thread-safe map from session id to session. The registry is the only
/// owner of sessions; everything else holds `Arc` clones scoped to one
/// operation.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session named by the header value, or create a fresh one
    /// when the value is absent or unrecognized.
    pub fn get_or_create(&self, header: Option<&str>) -> (Arc<Session>, bool) {
        if let Some(id) = header {
            if let Some(existing) = self.sessions.get(id) {
                return (existing.value().clone(), false);
            }
        }
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id.clone(), session.clone());
        debug!("Created session {}", session.id);
        (session, true)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Point-in-time view for the correlator scan.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
