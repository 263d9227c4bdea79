// Token-bucket rate limiting, at the gate and over HTTP.
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::helpers::{new_registry, server, TestExtension};

#[tokio::test]
async fn five_per_second_bucket_drains_and_refills() {
    let registry = new_registry();
    let gate = registry.security();
    gate.set_rate_limit("files", 5.0);

    // Five consecutive calls pass, the sixth is rejected.
    for i in 0..5 {
        assert!(gate.allow("files"), "call {i} should pass");
    }
    assert!(!gate.allow("files"));

    // After a second at 5 tokens/s the bucket has refilled.
    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert!(gate.allow("files"));

    // Never above capacity: an idle burst still caps at 5.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let mut granted = 0;
    while gate.allow("files") {
        granted += 1;
        assert!(granted <= 5, "bucket exceeded capacity");
    }
    assert_eq!(granted, 5);
}

#[tokio::test]
async fn no_limit_means_every_call_passes() {
    let registry = new_registry();
    let gate = registry.security();
    for _ in 0..100 {
        assert!(gate.allow("unlimited"));
    }
}

#[tokio::test]
async fn rate_limited_requests_surface_as_429_and_are_audited() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();
    registry.security().set_rate_limit("alpha", 2.0);

    let server = server(&registry);
    assert_eq!(server.get("/ext/alpha/ping").await.status_code(), StatusCode::OK);
    assert_eq!(server.get("/ext/alpha/ping").await.status_code(), StatusCode::OK);

    let limited = server.get("/ext/alpha/ping").await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    let body = limited.json::<serde_json::Value>();
    assert_eq!(body["error"]["type"], "rate_limited");

    // The rejection is on the audit trail.
    let entries = registry.audit_entries(Some("alpha"), 10);
    assert!(entries.iter().any(|e| e.action == "rate_limit" && e.result == "rejected"));
}

#[tokio::test]
async fn clearing_the_limit_restores_unlimited_service() {
    let registry = new_registry();
    let gate = registry.security();
    gate.set_rate_limit("files", 1.0);
    assert!(gate.allow("files"));
    assert!(!gate.allow("files"));

    gate.clear_rate_limit("files");
    for _ in 0..10 {
        assert!(gate.allow("files"));
    }
}
