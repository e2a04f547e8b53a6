mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use identity_ca::pki_generator::Generator;
use identity_ca::protocol::{decode_pem, HealthResponse, IssueResponse, Protocol, StatusResponse};
use identity_ca::webserver;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceExt;

fn app(timeout: Duration) -> (Router, common::TestService) {
    let service = common::service();
    let router = webserver::router(Protocol::new(service.clone()), timeout);
    (router, service)
}

async fn post<T: DeserializeOwned>(app: &Router, uri: &str, body: String) -> (StatusCode, T) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_generate_validate_withdraw_over_http() {
    let (app, service) = app(Duration::from_secs(30));

    let (status, issued): (_, IssueResponse) = post(
        &app,
        "/api/v1/generate",
        json!({"uid": "u1", "did": "d1", "password": "pw"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(issued.result, "issue failed: {}", issued.reason);
    assert_eq!(issued.uid, "u1");
    assert_eq!(issued.did, "d1");
    assert!(issued.valid_till.is_some());

    let certificate_pem = decode_pem(&issued.certificate).unwrap();
    let key_pem = decode_pem(&issued.private_key).unwrap();
    assert!(key_pem.contains("ENCRYPTED"));
    assert_eq!(
        service.generator().parse_uid_did(&certificate_pem),
        ("u1".to_string(), "d1".to_string())
    );

    let body = json!({"uid": "u1", "did": "d1", "certificate": issued.certificate}).to_string();
    let (status, validated): (_, StatusResponse) =
        post(&app, "/api/v1/validate", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(validated.result, "validate failed: {}", validated.reason);

    let (_, withdrawn): (_, StatusResponse) = post(&app, "/api/v1/withdrawal", body.clone()).await;
    assert!(withdrawn.result, "withdraw failed: {}", withdrawn.reason);
    assert_eq!(withdrawn.uid, "u1");
    assert_eq!(withdrawn.did, "d1");

    // No active certificate remains.
    let (status, validated): (_, StatusResponse) = post(&app, "/api/v1/validate", body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!validated.result);
    assert!(validated.reason.contains("not found"));
}

#[tokio::test]
async fn test_identity_mismatch_over_http() {
    let (app, _service) = app(Duration::from_secs(30));
    let (_, issued): (_, IssueResponse) = post(
        &app,
        "/api/v1/generate",
        json!({"uid": "u2", "did": "d1"}).to_string(),
    )
    .await;
    assert!(issued.result);

    let (status, validated): (_, StatusResponse) = post(
        &app,
        "/api/v1/validate",
        json!({"uid": "u1", "did": "d1", "certificate": issued.certificate}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!validated.result);
    assert!(validated.reason.contains("mismatch"));
}

#[tokio::test]
async fn test_failures_are_reported_in_body() {
    let (app, _service) = app(Duration::from_secs(30));

    let (status, issued): (_, IssueResponse) = post(
        &app,
        "/api/v1/generate",
        json!({"uid": "u1", "did": "d1", "valid_for": "soon"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!issued.result);
    assert!(issued.certificate.is_empty());
    assert!(issued.reason.contains("generation failed"));

    let (status, validated): (_, StatusResponse) = post(
        &app,
        "/api/v1/validate",
        json!({"uid": "u1", "did": "d1", "certificate": "***"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!validated.result);
    assert!(validated.reason.contains("base64"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, _service) = app(Duration::from_secs(30));

    let (status, body): (_, serde_json::Value) =
        post(&app, "/api/v1/generate", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], json!(false));

    let (status, _): (_, serde_json::Value) = post(
        &app,
        "/api/v1/withdrawal",
        json!({"uid": "u1"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_timeout_reports_unknown_outcome() {
    let (app, _service) = app(Duration::ZERO);
    let (status, issued): (_, IssueResponse) = post(
        &app,
        "/api/v1/generate",
        json!({"uid": "u1", "did": "d1"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!issued.result);
    assert_eq!(issued.uid, "u1");
    assert!(issued.reason.contains("timed out"));
}

#[tokio::test]
async fn test_health() {
    let (app, _service) = app(Duration::from_secs(30));
    let request = Request::builder()
        .uri("/api/v1/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health, HealthResponse::default());
}
