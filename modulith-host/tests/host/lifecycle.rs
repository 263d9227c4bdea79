// Registry lifecycle: state machine, resource accounting, rollback,
// containment.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;

use modulith_host::host_error::HostError;
use modulith_host::registry::{LifecycleState, ResourceCounts};

use crate::helpers::{new_registry, new_registry_with_version, server, TestExtension};

#[tokio::test]
async fn enable_installs_resources_and_routes_are_reachable() {
    let registry = new_registry();
    let extension = Arc::new(TestExtension::named("alpha"));
    let counters = Arc::clone(&extension.counters);
    registry.register(extension).await.unwrap();

    registry.enable("alpha").await.unwrap();

    let status = registry.status("alpha").await.unwrap();
    assert_eq!(status.state, LifecycleState::Enabled);
    assert!(status.enabled_at.is_some());
    assert_eq!(
        status.resources,
        ResourceCounts {
            routes: 2,
            middleware: 1,
            hooks: 1,
            templates: 1,
            assets: 1,
        }
    );
    assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);

    let server = server(&registry);
    let response = server.get("/ext/alpha/ping").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "pong from alpha");

    // The static asset is served below the extension prefix.
    let asset = server.get("/ext/alpha/assets/app.css").await;
    assert_eq!(asset.status_code(), StatusCode::OK);

    // Middleware and hooks observed the request to /ping and the asset.
    assert!(counters.middleware_calls.load(Ordering::SeqCst) >= 1);
    assert!(counters.hook_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn disable_removes_every_registration() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();
    registry.disable("alpha").await.unwrap();

    let status = registry.status("alpha").await.unwrap();
    assert_eq!(status.state, LifecycleState::Disabled);
    assert!(status.enabled_at.is_none());
    assert_eq!(status.resources, ResourceCounts::default());

    let server = server(&registry);
    let response = server.get("/ext/alpha/ping").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disable_removes_registrations_even_when_stop_errors() {
    let registry = new_registry();
    let extension = Arc::new(TestExtension::named("flaky").failing_stop());
    let counters = Arc::clone(&extension.counters);
    registry.register(extension).await.unwrap();
    registry.enable("flaky").await.unwrap();

    // Disable completes despite the stop failure.
    registry.disable("flaky").await.unwrap();
    assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);

    let status = registry.status("flaky").await.unwrap();
    assert_eq!(status.state, LifecycleState::Disabled);
    assert_eq!(status.resources, ResourceCounts::default());
    assert!(status.last_error.is_some());

    let server = server(&registry);
    assert_eq!(
        server.get("/ext/flaky/ping").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn enable_disable_enable_round_trip_is_idempotent() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();

    registry.enable("alpha").await.unwrap();
    let first = registry.status("alpha").await.unwrap();

    registry.disable("alpha").await.unwrap();
    registry.enable("alpha").await.unwrap();
    let second = registry.status("alpha").await.unwrap();

    assert_eq!(first.state, second.state);
    assert_eq!(first.resources, second.resources);

    let server = server(&registry);
    assert_eq!(
        server.get("/ext/alpha/ping").await.status_code(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn register_unregister_register_succeeds() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.unregister("alpha").await.unwrap();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    assert_eq!(
        registry.status("alpha").await.unwrap().state,
        LifecycleState::Registered
    );
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    let err = registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::AlreadyRegistered(name) if name == "alpha"));
}

#[tokio::test]
async fn incompatible_host_version_is_rejected() {
    let registry = new_registry_with_version("2.5.0");
    let err = registry
        .register(Arc::new(
            TestExtension::named("old").with_host_window(Some("1.0.0"), Some("2.0.0")),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::Incompatible { .. }));

    registry
        .register(Arc::new(
            TestExtension::named("current").with_host_window(Some("2.0.0"), Some("3.0.0")),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn initialize_failure_leaves_error_state_and_no_resources() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("broken").failing_initialize()))
        .await
        .unwrap();

    let err = registry.enable("broken").await.unwrap_err();
    assert!(matches!(err, HostError::InitializeFailed { .. }));

    let status = registry.status("broken").await.unwrap();
    assert_eq!(status.state, LifecycleState::Error);
    assert!(status.last_error.is_some());
    assert_eq!(status.resources, ResourceCounts::default());

    let server = server(&registry);
    assert_eq!(
        server.get("/ext/broken/ping").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn start_failure_rolls_back_and_routes_never_became_reachable() {
    let registry = new_registry();
    let extension = Arc::new(TestExtension::named("halfway").failing_start());
    let counters = Arc::clone(&extension.counters);
    registry.register(extension).await.unwrap();

    let err = registry.enable("halfway").await.unwrap_err();
    assert!(matches!(err, HostError::StartFailed { .. }));
    assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(counters.started.load(Ordering::SeqCst), 0);

    assert_eq!(
        registry.status("halfway").await.unwrap().state,
        LifecycleState::Error
    );
    let server = server(&registry);
    assert_eq!(
        server.get("/ext/halfway/ping").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn enable_requires_registered_or_disabled() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();
    registry.enable("alpha").await.unwrap();

    let err = registry.enable("alpha").await.unwrap_err();
    assert!(matches!(err, HostError::InvalidState { .. }));

    let err = registry.disable("missing").await.unwrap_err();
    assert!(matches!(err, HostError::NotFound(_)));
}

#[tokio::test]
async fn route_panic_returns_500_and_disables_the_extension() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("volatile")))
        .await
        .unwrap();
    registry.enable("volatile").await.unwrap();

    let server = server(&registry);
    let response = server.get("/ext/volatile/boom").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["error"]["type"], "panic_recovered");

    // The host keeps running and the extension is out of service.
    let status = registry.status("volatile").await.unwrap();
    assert_eq!(status.state, LifecycleState::Error);
    assert!(status.last_error.as_deref().unwrap().contains("exploded"));
    assert_eq!(
        server.get("/ext/volatile/ping").await.status_code(),
        StatusCode::NOT_FOUND
    );

    // Management surface still answers.
    assert_eq!(server.get("/health").await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn unregister_disables_enabled_extensions_first() {
    let registry = new_registry();
    let extension = Arc::new(TestExtension::named("alpha"));
    let counters = Arc::clone(&extension.counters);
    registry.register(extension).await.unwrap();
    registry.enable("alpha").await.unwrap();

    registry.unregister("alpha").await.unwrap();
    assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    assert!(registry.status("alpha").await.is_none());
    assert!(registry.get("alpha").await.is_none());
}

#[tokio::test]
async fn boot_enable_stops_at_first_failure_but_keeps_earlier_extensions() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("aaa-base")))
        .await
        .unwrap();
    registry
        .register(Arc::new(
            TestExtension::named("bbb-broken").failing_initialize(),
        ))
        .await
        .unwrap();
    registry
        .register(Arc::new(TestExtension::named("ccc-later")))
        .await
        .unwrap();

    let mut config = modulith_host::config::HostConfig::default();
    config.enabled.insert("aaa-base".into(), true);
    config.enabled.insert("bbb-broken".into(), true);
    config.enabled.insert("ccc-later".into(), true);

    let err = registry.enable_from_config(&config).await.unwrap_err();
    assert!(matches!(err, HostError::InitializeFailed { .. }));

    // Documented partial-enable state.
    assert_eq!(
        registry.status("aaa-base").await.unwrap().state,
        LifecycleState::Enabled
    );
    assert_eq!(
        registry.status("bbb-broken").await.unwrap().state,
        LifecycleState::Error
    );
    assert_eq!(
        registry.status("ccc-later").await.unwrap().state,
        LifecycleState::Registered
    );
}

#[tokio::test]
async fn health_probe_is_recorded_in_status() {
    let registry = new_registry();
    registry
        .register(Arc::new(TestExtension::named("alpha")))
        .await
        .unwrap();

    // Probing a non-enabled extension is an invalid state.
    assert!(matches!(
        registry.probe_health("alpha").await.unwrap_err(),
        HostError::InvalidState { .. }
    ));

    registry.enable("alpha").await.unwrap();
    let probe = registry.probe_health("alpha").await.unwrap();
    assert!(probe.healthy);

    let status = registry.status("alpha").await.unwrap();
    assert!(status.last_health.unwrap().healthy);
}
