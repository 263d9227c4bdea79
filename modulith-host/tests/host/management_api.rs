// The management surface: listing, enable/disable, status, metrics, audit,
// health probes, and admin gating.
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;

use modulith_host::config::HostConfig;
use modulith_host::middleware::encode_token;

use crate::helpers::{new_registry, server, server_with, TestExtension};

#[tokio::test]
async fn enable_and_disable_through_the_api() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    let server = server(&registry);

    let response = server.post("/extensions/alpha/enable").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"]["state"], "enabled");

    assert_eq!(
        server.get("/ext/alpha/ping").await.status_code(),
        StatusCode::OK
    );

    let response = server.post("/extensions/alpha/disable").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"]["state"], "disabled");
    assert_eq!(
        server.get("/ext/alpha/ping").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn status_and_metrics_endpoints() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();
    let server = server(&registry);

    // Generate some traffic first.
    for _ in 0..3 {
        server.get("/ext/alpha/ping").await;
    }

    let response = server.get("/extensions/alpha/status").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"]["state"], "enabled");
    assert_eq!(body["status"]["resources"]["routes"], 2);

    let response = server.get("/extensions/alpha/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["metrics"]["requests"], 3);
    assert_eq!(body["metrics"]["errors"], 0);
    assert!(body["metrics"]["hooks_executed"].as_u64().unwrap() >= 3);

    // Unknown extensions are 404s.
    assert_eq!(
        server.get("/extensions/ghost/status").await.status_code(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        server.get("/extensions/ghost/metrics").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn prometheus_exposition_includes_extension_labels() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();
    let server = server(&registry);
    server.get("/ext/alpha/ping").await;

    let response = server.get("/metrics/prometheus").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();
    assert!(text.contains("modulith_extension_requests_total{extension=\"alpha\"} 1"));
}

#[tokio::test]
async fn health_probe_endpoint_records_the_result() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();
    let server = server(&registry);

    let response = server.post("/extensions/alpha/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["health"]["healthy"], true);

    let response = server.get("/extensions/alpha/status").await;
    assert_eq!(
        response.json::<Value>()["status"]["last_health"]["healthy"],
        true
    );
}

#[tokio::test]
async fn audit_endpoint_is_filtered_and_bounded() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    let gate = registry.security();
    gate.grant("alpha", "storage.read");
    gate.grant("alpha", "storage.write");
    gate.revoke("alpha", "storage.read");

    let server = server(&registry);
    let response = server.get("/extensions/alpha/audit?limit=2").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let entries = response.json::<Value>()["entries"].as_array().unwrap().clone();
    assert_eq!(entries.len(), 2);
    // Newest first.
    assert_eq!(entries[0]["action"], "permission_revoke");
}

#[tokio::test]
async fn management_mutations_require_admin_when_auth_is_enabled() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();

    let mut config = HostConfig::default();
    config.auth.enabled = true;
    config.auth.jwt_secret = "integration-test-secret".to_string();
    let server = server_with(&registry, config);

    // No token: 401.
    let response = server.post("/extensions/alpha/enable").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // Authenticated but not admin: 403.
    let viewer =
        encode_token("integration-test-secret", "v", None, &["viewer"], 3600).unwrap();
    let response = server
        .post("/extensions/alpha/enable")
        .add_header("Authorization", format!("Bearer {viewer}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    // Admin: allowed.
    let admin = encode_token("integration-test-secret", "a", None, &["admin"], 3600).unwrap();
    let response = server
        .post("/extensions/alpha/enable")
        .add_header("Authorization", format!("Bearer {admin}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Reads stay open.
    assert_eq!(server.get("/extensions").await.status_code(), StatusCode::OK);

    // A garbage token is rejected outright when auth is on.
    let response = server
        .post("/extensions/alpha/disable")
        .add_header("Authorization", "Bearer not-a-jwt")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listing_shows_status_for_every_extension() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry
        .register(Arc::new(TestExtension::named("beta")))
        .await
        .unwrap();
    registry.enable("beta").await.unwrap();

    let server = server(&registry);
    let body = server.get("/extensions").await.json::<Value>();
    let extensions = body["extensions"].as_array().unwrap();
    assert_eq!(extensions.len(), 2);
    assert_eq!(extensions[0]["name"], "alpha");
    assert_eq!(extensions[0]["status"]["state"], "registered");
    assert_eq!(extensions[1]["name"], "beta");
    assert_eq!(extensions[1]["status"]["state"], "enabled");
}
