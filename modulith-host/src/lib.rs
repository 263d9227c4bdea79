//! # Modulith Host
//!
//! The in-process extension runtime for a backend application server.
//! Independently-authored extensions plug HTTP routes, middleware, lifecycle
//! hooks, database schemas, configuration, quotas, sharing, and audit logging
//! into one host process, with ordered lifecycle transitions, dependency
//! resolution, panic containment, and safe concurrent mutation.
//!
//! ## Architecture
//!
//! - **`registry`**: the authoritative map of extensions, their lifecycle
//!   state machine, and the request dispatch pipeline
//! - **`resolver`**: topological load ordering, cycle and missing-dependency
//!   detection, disable safety
//! - **`hooks`**: typed, priority-ordered hook dispatch with panic isolation
//! - **`router`**: the dynamic route table and middleware composition
//! - **`security`**: permissions, token-bucket rate limits, resource quotas,
//!   and the audit ring buffer
//! - **`config`** / **`config_watcher`**: YAML-or-JSON configuration with
//!   debounced hot reload
//! - **`metrics`**: per-extension counters and latency aggregates
//! - **`services`**: construction of the per-extension services facade
//! - **`migrations`**: shared migration tracking with checksums
//! - **`server`** / **`handlers`** / **`middleware`**: the management HTTP
//!   surface and the `/ext/{*path}` dispatch route
//! - **`storage`**: the built-in cloud storage extension (shares with
//!   inheritance, role/user quotas, access logging)
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use modulith_host::config::HostConfig;
//! use modulith_host::server::create_default_server;
//! use modulith_host::storage::CloudStorageExtension;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (app, registry) = create_default_server(HostConfig::default());
//! registry.register(Arc::new(CloudStorageExtension::new())).await?;
//! registry.enable("cloud-storage").await?;
//! // `app` is an axum Router ready to serve.
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod config_watcher;
pub mod handlers;
pub mod hooks;
pub mod host_error;
pub mod metrics;
pub mod middleware;
pub mod migrations;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod security;
pub mod server;
pub mod services;
pub mod storage;

pub use host_error::HostError;
pub use registry::ExtensionRegistry;
pub use server::create_server;
