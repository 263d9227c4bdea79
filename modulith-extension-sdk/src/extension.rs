//! The `Extension` trait: the whole contract between an extension and the
//! host.
//!
//! The host calls lifecycle methods in a fixed order and never holds its own
//! locks while doing so. Registration methods are pure descriptions: the host
//! collects their output when enabling and tears everything down when
//! disabling, whether or not `stop` succeeded. Most methods have neutral
//! defaults so a minimal extension only implements `metadata`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;
use crate::hooks::HookRegistration;
use crate::metadata::ExtensionMetadata;
use crate::routes::{ExtensionRouter, MiddlewareRegistration};
use crate::schema::Migration;
use crate::services::ExtensionServices;

/// A permission string an extension wants granted, e.g. `storage.read`.
///
/// Declaring a permission only advertises it; the host decides what to grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(pub String);

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named template contributed by an extension.
#[derive(Debug, Clone)]
pub struct TemplateRegistration {
    pub name: String,
    pub content: String,
}

/// A static asset served under the extension's path prefix.
#[derive(Debug, Clone)]
pub struct StaticAssetRegistration {
    /// Path below `/ext/<name>/`, e.g. `assets/app.css`.
    pub path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The extension contract.
///
/// Lifecycle order on enable: `initialize(services)` → resource collection
/// (`register_*`) → `start`. On disable: `stop`, then unconditional resource
/// removal. `health` may be probed at any time while enabled.
#[async_trait::async_trait]
pub trait Extension: Send + Sync {
    /// Immutable description; called once at registration and cached by the
    /// host.
    fn metadata(&self) -> ExtensionMetadata;

    /// Prepare the extension. The services facade is valid for the whole
    /// extension lifetime; store it.
    async fn initialize(&self, services: Arc<ExtensionServices>) -> Result<(), ExtensionError> {
        let _ = services;
        Ok(())
    }

    /// Begin serving. Routes become reachable only after this returns `Ok`.
    async fn start(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Stop serving. Failure is logged but does not keep resources alive.
    async fn stop(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Liveness probe while enabled.
    async fn health(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Declare routes. All paths are rewritten under `/ext/<name>/`.
    fn register_routes(&self, router: &mut ExtensionRouter) {
        let _ = router;
    }

    /// Declare middleware.
    fn register_middleware(&self) -> Vec<MiddlewareRegistration> {
        Vec::new()
    }

    /// Declare hooks.
    fn register_hooks(&self) -> Vec<HookRegistration> {
        Vec::new()
    }

    /// Declare templates.
    fn register_templates(&self) -> Vec<TemplateRegistration> {
        Vec::new()
    }

    /// Declare static assets.
    fn register_static_assets(&self) -> Vec<StaticAssetRegistration> {
        Vec::new()
    }

    /// JSON schema describing the extension's configuration subtree.
    fn config_schema(&self) -> Value {
        serde_json::json!({})
    }

    /// Validate a configuration subtree without applying it.
    fn validate_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        let _ = raw;
        Ok(())
    }

    /// Apply a validated configuration subtree. Must be idempotent: applying
    /// the same value twice is equivalent to applying it once.
    async fn apply_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        let _ = raw;
        Ok(())
    }

    /// Name of the extension's database schema, when it uses the database.
    /// Must match `^ext_[a-z0-9_]+$`.
    fn database_schema(&self) -> Option<String> {
        None
    }

    /// Schema migrations, applied in order through the host's tracker before
    /// `initialize`. Already-recorded versions are skipped.
    fn migrations(&self) -> Vec<Migration> {
        Vec::new()
    }

    /// Permissions this extension wants granted.
    fn required_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }
}
