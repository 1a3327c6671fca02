//! JSON-RPC message helpers.
//!
//! The gateway is transparent: messages are carried as `serde_json::Value`
//! objects and only the envelope fields needed for routing are inspected
//! (`id`, `method`, `result`, `error`).

use serde_json::{json, Map, Value};

/// JSON-RPC parse error code.
pub const PARSE_ERROR: i64 = -32700;
/// Generic gateway error code.
pub const GATEWAY_ERROR: i64 = -32000;

/// Correlation key for a JSON-RPC id.
///
/// Numbers and strings are normalized to the same textual form, so a numeric
/// id `1` and a string id `"1"` map to the same key. Clients own their id
/// space and must not mix the two forms for concurrent requests in one
/// session.
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalized response envelope for an id-bearing child message.
///
/// `result` is always present (possibly null); `error` is omitted unless the
/// child supplied a non-null one. The id is preserved verbatim.
pub fn response_envelope(msg: &Value) -> Value {
    let mut out = Map::new();
    out.insert("jsonrpc".into(), json!("2.0"));
    out.insert(
        "result".into(),
        msg.get("result").cloned().unwrap_or(Value::Null),
    );
    if let Some(err) = msg.get("error").filter(|e| !e.is_null()) {
        out.insert("error".into(), err.clone());
    }
    out.insert("id".into(), msg.get("id").cloned().unwrap_or(Value::Null));
    Value::Object(out)
}

/// Normalized notification envelope for a child message without an id.
pub fn notification_envelope(msg: &Value) -> Value {
    let mut out = Map::new();
    out.insert("jsonrpc".into(), json!("2.0"));
    out.insert(
        "method".into(),
        msg.get("method").cloned().unwrap_or_else(|| json!("")),
    );
    if let Some(params) = msg.get("params").filter(|p| !p.is_null()) {
        out.insert("params".into(), params.clone());
    }
    Value::Object(out)
}

/// Gateway-synthesized JSON-RPC error envelope.
pub fn rpc_error(code: i64, message: &str, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
}
