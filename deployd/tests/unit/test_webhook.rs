//! Webhook endpoint and read API tests

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use deployd::models::deployment::{DeploymentRecord, Stage};
use deployd::notify::dispatcher::render_summary;
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use deployd::webhook::signature::{sign, SignatureValidator, SIGNATURE_HEADER};
use platform_api::models::PlatformStatus;

use crate::support::{payload, Harness};

const SECRET: &str = "webhook-secret";
const SHA: &str = "abc123";

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(
        h.orchestrator.clone(),
        SignatureValidator::new(SecretString::from(SECRET)),
        "main".to_string(),
        h.clock.clone(),
    )))
}

fn signed(body: Vec<u8>) -> Request<Body> {
    let signature = format!("sha256={}", sign(&body, SECRET.as_bytes()));
    Request::builder()
        .method("POST")
        .uri("/webhook/deploy")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn test_push_to_main_is_deployed() {
    let h = Harness::new();
    let app = app(&h);
    h.platform.script_status(PlatformStatus::Running);
    h.platform.script_status(PlatformStatus::Success);

    let (status, body) = send(&app, signed(payload("refs/heads/main", SHA, "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "started");
    assert_eq!(body["application_id"], "web");
    assert_eq!(body["version"], "20240101.1");

    h.notifier.wait_for(1).await;
    let record = &h.notifier.records()[0];
    assert_eq!(record.stage, Stage::Succeeded);
    assert_eq!(record.commit_hash(), SHA);
    assert_eq!(record.source_commit.commit_message, "Fix checkout flow");

    let summary = render_summary(record);
    assert!(summary.contains("web"));
    assert!(summary.contains("20240101.1"));
    assert!(summary.contains("succeeded"));
}

#[tokio::test(start_paused = true)]
async fn test_bad_signature_is_rejected() {
    let h = Harness::new();
    let app = app(&h);

    let body = payload("refs/heads/main", SHA, "acme/web");
    let forged = format!("sha256={}", sign(&body, b"wrong-secret"));
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/deploy")
        .header(SIGNATURE_HEADER, forged)
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhook/deploy")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(h.store.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_other_branch_is_ignored() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) =
        send(&app, signed(payload("refs/heads/feature/x", SHA, "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "ignored");

    let (status, body) = send(&app, signed(payload("refs/tags/v1.0.0", SHA, "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "ignored");

    assert!(h.store.all().is_empty());
    assert!(h.platform.triggers.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_dropped() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, signed(b"{\"ref\": 42".to_vec())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "rejected");

    let missing_head = serde_json::to_vec(&serde_json::json!({
        "ref": "refs/heads/main",
        "after": SHA,
        "repository": { "full_name": "acme/web" }
    }))
    .unwrap();
    let (status, body) = send(&app, signed(missing_head)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "rejected");

    assert!(h.store.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_busy_application_queues_and_supersedes() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, signed(payload("refs/heads/main", "aaa111", "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "started");

    let (status, body) = send(&app, signed(payload("refs/heads/main", "bbb222", "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "queued");

    let (status, body) = send(&app, signed(payload("refs/heads/main", "ccc333", "acme/web"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["disposition"], "superseded");

    // Redelivery of the running commit
    let (status, body) = send(&app, signed(payload("refs/heads/main", "aaa111", "acme/web"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "duplicate");
}

#[tokio::test(start_paused = true)]
async fn test_store_unavailable() {
    let h = Harness::new();
    let app = app(&h);
    h.store.fail_writes.store(true, Ordering::SeqCst);

    let (status, body) = send(&app, signed(payload("refs/heads/main", SHA, "acme/web"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "unavailable");
}

#[tokio::test(start_paused = true)]
async fn test_read_api() {
    let h = Harness::new();
    let app = app(&h);
    h.seed("web", 1, Stage::Succeeded).await;
    h.seed("web", 2, Stage::Failed).await;

    let (status, body) = send(&app, get("/deployments/web")).await;
    assert_eq!(status, StatusCode::OK);
    let records: Vec<DeploymentRecord> = serde_json::from_value(body).unwrap();
    assert_eq!(records.len(), 2);
    // Newest first
    assert_eq!(records[0].version.to_string(), "20240101.2");

    let (status, body) = send(&app, get("/deployments/web/20240101.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "succeeded");

    let (status, _) = send(&app, get("/deployments/web/20240101.9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/deployments/web/latest")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/deployments/unknown")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(vec![]));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
