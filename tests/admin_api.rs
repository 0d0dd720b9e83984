//! Admin API through the router, without a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cfgstore::admin::{setup_admin_router, AdminState};
use cfgstore::rpc::RpcDriver;

mod common;

const KEY: &str = "test-key";

fn app() -> Router {
    let store = common::sip_store();
    store.finalize().unwrap();
    let rpc = Arc::new(RpcDriver::new(&store));
    setup_admin_router(AdminState::new(store, rpc, KEY))
}

fn rpc(body: Value) -> Request<Body> {
    Request::post("/admin/rpc")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn line(text: &str) -> Request<Body> {
    Request::post("/admin/rpc/line")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .body(Body::from(text.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let app = app();
    let request = Request::get("/admin/status").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/admin/status")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status() {
    let app = app();
    let request = Request::get("/admin/status")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "live");
    assert_eq!(body["block_version"], 1);
    assert_eq!(body["groups"], 2);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_set_and_get() {
    let app = app();
    let (status, body) = send(
        &app,
        rpc(json!({"cmd": "set", "group": "core", "var": "debug", "value": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"type": "done"}));

    let (_, body) = send(&app, rpc(json!({"cmd": "get", "group": "core", "var": "debug"}))).await;
    assert_eq!(body, json!({"type": "value", "data": 3}));
}

#[tokio::test]
async fn test_rejected_command() {
    let app = app();
    let (status, body) = send(
        &app,
        rpc(json!({"cmd": "set", "group": "core", "var": "debug", "value": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    let (status, body) = send(&app, rpc(json!({"cmd": "reload"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_transaction_over_lines() {
    let app = app();
    assert_eq!(send(&app, line("add_group_instance pool 5")).await.0, StatusCode::OK);
    send(&app, line("set_delayed pool name \"all\"")).await;
    send(&app, line("set_delayed pool.5 name five")).await;

    let (status, body) = send(&app, line("diff")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "diff");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    assert_eq!(send(&app, line("commit")).await.0, StatusCode::OK);
    let (_, body) = send(&app, line("get pool.5 name")).await;
    assert_eq!(body, json!({"type": "value", "data": "five"}));

    let (status, body) = send(&app, line("frobnicate")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown command: frobnicate");
}
