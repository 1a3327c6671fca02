//! Request handlers for the gateway endpoint and health paths.

use crate::config::ResponseMode;
use crate::gateway::{timeout, AppState};
use crate::session::{Session, SseFrame};
use crate::types;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// POST: parse, forward to the child, then answer according to the message
/// shape and the configured response mode.
pub async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (session, _created) = state
        .registry
        .get_or_create(session_header_value(&state, &headers).as_deref());

    let msg = match serde_json::from_slice::<Value>(&body) {
        Ok(value) if value.is_object() => value,
        _ => {
            let body = types::rpc_error(types::PARSE_ERROR, "Parse error: Invalid JSON", Value::Null);
            return with_session_header(
                &state,
                &session,
                json_response(StatusCode::BAD_REQUEST, &body),
            );
        }
    };

    let Some(id) = msg.get("id").cloned() else {
        // Notification: forward it, nothing will come back for it. Batch
        // mode acknowledges with 204; stream mode still opens the SSE
        // channel so the client can listen for broadcasts.
        return match state.config.response_mode {
            ResponseMode::Batch => {
                if let Err(e) = state.child.send(msg).await {
                    return child_unavailable(&state, &session, e);
                }
                with_session_header(&state, &session, StatusCode::NO_CONTENT.into_response())
            }
            ResponseMode::Stream => {
                // Register the stream before writing to the child so the
                // notification's own echo cannot race past the slot map.
                let (tx, rx) = mpsc::unbounded_channel();
                let stream_key = session.open_stream(tx, None);
                if let Err(e) = state.child.send(msg).await {
                    session.remove_response(&stream_key);
                    return child_unavailable(&state, &session, e);
                }
                sse_response(&state, &session, rx, stream_key)
            }
        };
    };

    let key = types::id_key(&id);
    let timeout_after = Duration::from_millis(state.config.batch_timeout_ms);

    match state.config.response_mode {
        ResponseMode::Batch => {
            let (tx, rx) = oneshot::channel();
            // Register before writing to the child so a fast reply cannot
            // race past the pending table.
            session.register_batch(&key, msg.clone(), tx);
            let guard = PendingGuard {
                session: session.clone(),
                key: key.clone(),
                armed: true,
            };
            if let Err(e) = state.child.send(msg).await {
                return child_unavailable(&state, &session, e);
            }
            timeout::arm_batch(session.clone(), key, id, timeout_after);

            match rx.await {
                Ok(reply) => {
                    guard.disarm();
                    let status =
                        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    with_session_header(&state, &session, json_response(status, &reply.body))
                }
                Err(_) => {
                    // The session was deleted out from under the request;
                    // the response handle was ended without a body.
                    guard.disarm();
                    with_session_header(&state, &session, StatusCode::OK.into_response())
                }
            }
        }
        ResponseMode::Stream => {
            let (tx, rx) = mpsc::unbounded_channel();
            let stream_key = session.open_request_stream(&key, msg.clone(), tx);
            if let Err(e) = state.child.send(msg).await {
                session.complete_request(&key);
                session.remove_response(&stream_key);
                return child_unavailable(&state, &session, e);
            }
            timeout::arm_stream(session.clone(), key, stream_key.clone(), id, timeout_after);
            sse_response(&state, &session, rx, stream_key)
        }
    }
}

/// GET: open an SSE stream on the session, emitting the `connected`
/// prologue and, when `Last-Event-ID` is supplied, the history replay.
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, created) = state
        .registry
        .get_or_create(session_header_value(&state, &headers).as_deref());
    if created {
        debug!("SSE connect created session {}", session.id);
    }

    let resume_from = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let (tx, rx) = mpsc::unbounded_channel();
    // Prologue, then replay, then live events, all through one queue so
    // ordering holds.
    let _ = tx.send(SseFrame {
        id: None,
        event: Some("connected".into()),
        data: json!({ "sessionId": session.id }).to_string(),
    });
    let stream_key = session.open_stream(tx, resume_from);

    sse_response(&state, &session, rx, stream_key)
}

/// DELETE: end every live response handle on the session and remove it.
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header_value(&state, &headers) else {
        let body = types::rpc_error(types::GATEWAY_ERROR, "Missing session ID", Value::Null);
        return json_response(StatusCode::BAD_REQUEST, &body);
    };
    let Some(session) = state.registry.remove(&id) else {
        let body = types::rpc_error(
            types::GATEWAY_ERROR,
            &format!("Session {id} not found"),
            Value::Null,
        );
        return json_response(StatusCode::NOT_FOUND, &body);
    };

    session.end_all();
    debug!("Deleted session {}", id);
    with_session_header(&state, &session, StatusCode::NO_CONTENT.into_response())
}

/// Non-preflight OPTIONS (preflight is answered by the CORS layer).
pub async fn handle_options() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Endpoint fallback for unsupported methods.
pub async fn handle_method_not_allowed(method: Method) -> Response {
    let body = types::rpc_error(
        types::GATEWAY_ERROR,
        &format!("Method {method} not allowed"),
        Value::Null,
    );
    json_response(StatusCode::METHOD_NOT_ALLOWED, &body)
}

/// Static responder for the configured health paths.
pub async fn handle_health() -> &'static str {
    "ok"
}

fn session_header_value(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(state.config.session_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn with_session_header(state: &AppState, session: &Session, mut response: Response) -> Response {
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(state.config.session_header.as_str()),
        HeaderValue::try_from(session.id.as_str()),
    ) {
        response.headers_mut().insert(name, value);
    }
    response
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn child_unavailable(state: &AppState, session: &Session, e: crate::error::Error) -> Response {
    warn!("Dropping request, child unavailable: {}", e);
    let body = types::rpc_error(types::GATEWAY_ERROR, "Child process unavailable", Value::Null);
    with_session_header(
        state,
        session,
        json_response(StatusCode::INTERNAL_SERVER_ERROR, &body),
    )
}

/// Build the SSE response over a frame channel. The cleanup value travels
/// inside the body stream's closure, so dropping the response body (client
/// disconnect or stream end) removes the stream slot; the rest of the
/// session is retained for resume.
fn sse_response(
    state: &AppState,
    session: &Arc<Session>,
    rx: mpsc::UnboundedReceiver<SseFrame>,
    stream_key: String,
) -> Response {
    let cleanup = StreamCleanup {
        session: session.clone(),
        key: stream_key,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |frame| {
        let _owned = &cleanup;
        Ok::<_, Infallible>(frame.to_event())
    });

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    with_session_header(state, session, response)
}

struct StreamCleanup {
    session: Arc<Session>,
    key: String,
}

impl Drop for StreamCleanup {
    fn drop(&mut self) {
        self.session.remove_response(&self.key);
    }
}

/// Removes the pending entry and response slot when a held batch POST is
/// dropped before its reply (client disconnect). Every settled path disarms
/// it first so a later request reusing the id is not clobbered.
struct PendingGuard {
    session: Arc<Session>,
    key: String,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.session.complete_request(&self.key);
        }
    }
}
