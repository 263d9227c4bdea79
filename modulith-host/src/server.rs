//! HTTP server assembly.
//!
//! Builds the axum application: the management surface, the `/ext/{*path}`
//! dispatch route, and the middleware stack (CORS, principal extraction,
//! request logging, timeout). The registry is created by the caller so tests
//! and embedders can pre-register extensions before the server exists.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{self, Method};
use axum::{
    routing::{any, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::{CorsConfig, HostConfig};
use crate::handlers;
use crate::middleware::{auth_middleware, logging_middleware};
use crate::registry::ExtensionRegistry;
use crate::services::HostServices;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HostConfig>,
    pub registry: Arc<ExtensionRegistry>,
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }
    let mut cors = CorsLayer::new();
    if config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in &config.allowed_origins {
            if let Ok(origin) = origin.parse::<http::header::HeaderValue>() {
                cors = cors.allow_origin(origin);
            }
        }
    }
    cors.allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Build the application router around an existing registry.
pub fn create_server(config: HostConfig, registry: Arc<ExtensionRegistry>) -> Router {
    if config.server.cors.enabled
        && config.server.cors.allowed_origins.iter().any(|o| o == "*")
    {
        tracing::warn!(
            "CORS is enabled with wildcard origins; configure explicit allowed_origins for production"
        );
    }

    let timeout = Duration::from_secs(config.server.timeout_secs);
    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
    };

    Router::new()
        // Management surface
        .route("/health", get(handlers::health_check))
        .route("/extensions", get(handlers::list_extensions))
        .route("/extensions/{name}/enable", post(handlers::enable_extension))
        .route("/extensions/{name}/disable", post(handlers::disable_extension))
        .route("/extensions/{name}/status", get(handlers::extension_status))
        .route("/extensions/{name}/metrics", get(handlers::extension_metrics))
        .route("/extensions/{name}/audit", get(handlers::extension_audit))
        .route("/extensions/{name}/health", post(handlers::probe_extension_health))
        .route("/metrics", get(handlers::all_metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        // Extension dispatch
        .route("/ext/{*path}", any(handlers::extension_dispatch))
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&config.server.cors))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                ))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}

/// Convenience wiring for a fresh host: in-memory collaborators, a new
/// registry, and the assembled router.
pub fn create_default_server(config: HostConfig) -> (Router, Arc<ExtensionRegistry>) {
    let services = Arc::new(HostServices::in_memory());
    let registry = Arc::new(ExtensionRegistry::new(
        env!("CARGO_PKG_VERSION"),
        services,
    ));
    let app = create_server(config, Arc::clone(&registry));
    (app, registry)
}
