//! Integration tests for the HTTP endpoint in batch mode.
//!
//! The child is `cat`, which echoes every forwarded line back: an
//! id-bearing request comes back as a reply with the same id, and a
//! notification comes back as a broadcast.

mod common;

use assert_json_diff::assert_json_eq;
use common::*;
use reqwest::Method;
use serde_json::{json, Value};

#[tokio::test]
async fn notification_returns_204_with_session_header() {
    // Given: a running gateway with an echo child
    let server = start_gateway(test_config("cat")).await;

    // When: a notification is posted
    let response = client()
        .post(server.endpoint())
        .header("content-type", "application/json")
        .body(json!({"jsonrpc": "2.0", "method": "ping"}).to_string())
        .send()
        .await
        .expect("request failed");

    // Then: empty 204 with a session id to echo back
    assert_eq!(response.status(), 204);
    assert!(response.headers().get(SESSION_HEADER).is_some());
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_reply_preserves_a_numeric_id() {
    let server = start_gateway(test_config("cat")).await;

    let response = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "id": 7, "method": "echo"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(body, json!({"jsonrpc": "2.0", "result": null, "id": 7}));
}

#[tokio::test]
async fn batch_reply_preserves_a_string_id() {
    let server = start_gateway(test_config("cat")).await;

    let response = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "id": "q-1", "method": "echo"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], json!("q-1"));
}

#[tokio::test]
async fn batch_reply_carries_the_child_result() {
    // A child that rewrites "params" to "result" turns each request into a
    // well-formed reply carrying the original arguments.
    let server = start_gateway(test_config(r#"sed -u 's/"params"/"result"/'"#)).await;

    let response = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "id": 7, "method": "compute", "params": {"x": 1}}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(body, json!({"jsonrpc": "2.0", "result": {"x": 1}, "id": 7}));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn session_id_is_reused_when_echoed() {
    let server = start_gateway(test_config("cat")).await;

    let first = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "method": "ping"}))
        .send()
        .await
        .unwrap();
    let session_id = first.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let second = client()
        .post(server.endpoint())
        .header(SESSION_HEADER, &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.headers()[SESSION_HEADER].to_str().unwrap(), session_id);

    // An unrecognized id gets a fresh session.
    let third = client()
        .post(server.endpoint())
        .header(SESSION_HEADER, "nonesuch")
        .json(&json!({"jsonrpc": "2.0", "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_ne!(third.headers()[SESSION_HEADER].to_str().unwrap(), session_id);
}

#[tokio::test]
async fn slow_child_times_out_with_504() {
    let mut config = test_config("sleep 60");
    config.batch_timeout_ms = 100;
    let server = start_gateway(config).await;

    let response = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "id": "q", "method": "slow"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 504);
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "Request timeout"},
            "id": "q",
        })
    );
}

#[tokio::test]
async fn invalid_json_body_is_a_parse_error() {
    let server = start_gateway(test_config("cat")).await;

    for body in ["not json{", "[1,2,3]", "42"] {
        let response = client()
            .post(server.endpoint())
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("request failed");

        assert_eq!(response.status(), 400, "body: {body}");
        let reply: Value = response.json().await.unwrap();
        assert_eq!(reply["error"]["code"], -32700);
        assert_eq!(reply["error"]["message"], "Parse error: Invalid JSON");
        assert_eq!(reply["id"], Value::Null);
    }
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let server = start_gateway(test_config("cat")).await;

    let response = client()
        .post(server.endpoint())
        .header("content-type", "application/json")
        .body(vec![b'a'; 5 * 1024 * 1024])
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn delete_without_session_header_is_400() {
    let server = start_gateway(test_config("cat")).await;

    let response = client().delete(server.endpoint()).send().await.unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "Missing session ID"},
            "id": null,
        })
    );
}

#[tokio::test]
async fn delete_unknown_session_is_404() {
    let server = start_gateway(test_config("cat")).await;

    let response = client()
        .delete(server.endpoint())
        .header(SESSION_HEADER, "nonesuch")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "Session nonesuch not found"},
            "id": null,
        })
    );
}

#[tokio::test]
async fn delete_known_session_is_204_once() {
    let server = start_gateway(test_config("cat")).await;

    let created = client()
        .post(server.endpoint())
        .json(&json!({"jsonrpc": "2.0", "method": "ping"}))
        .send()
        .await
        .unwrap();
    let session_id = created.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let deleted = client()
        .delete(server.endpoint())
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let again = client()
        .delete(server.endpoint())
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let server = start_gateway(test_config("cat")).await;

    let response = client()
        .request(Method::PUT, server.endpoint())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 405);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["message"], "Method PUT not allowed");
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn options_returns_204() {
    let mut config = test_config("cat");
    config.static_headers.insert("X-Static".into(), "on".into());
    let server = start_gateway(config).await;

    let response = client()
        .request(Method::OPTIONS, server.endpoint())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["X-Static"], "on");
}

#[tokio::test]
async fn cors_preflight_carries_static_headers() {
    let mut config = test_config("cat");
    config.static_headers.insert("X-Static".into(), "on".into());
    let server = start_gateway(config).await;

    // A real preflight is answered by the CORS layer without reaching the
    // endpoint handler; the static headers must still be applied.
    let response = client()
        .request(Method::OPTIONS, server.endpoint())
        .header("Origin", "https://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["X-Static"], "on");
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://example.com"
    );
}

#[tokio::test]
async fn health_paths_answer_ok_with_static_headers() {
    let mut config = test_config("cat");
    config.health_endpoints.push("/healthz".into());
    config.static_headers.insert("X-Static".into(), "on".into());
    let server = start_gateway(config).await;

    let response = client().get(server.url("/healthz")).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["X-Static"], "on");
    assert_eq!(response.text().await.unwrap(), "ok");
}
