//! The extension registry: single source of truth for which extensions exist
//! and in which lifecycle state.
//!
//! ## State machine
//!
//! ```text
//! Registered ──enable──▶ Initializing ──▶ Starting ──▶ Enabled
//!     ▲                       │              │           │
//!     │                       ▼(err)         ▼(err)      ▼ disable
//!     └──unregister ◀── Error ◀─────── Disabled ◀── Stopping
//! ```
//!
//! ## Locking discipline
//!
//! The writer lock over the registry tables is never held across a call into
//! extension code. Every lifecycle transition follows the same shape: reserve
//! the transition under the lock, release, call the extension inside a panic
//! barrier, re-acquire, commit or roll back. Reads (`list`, `status`,
//! `metrics`) copy snapshots out of the lock; callers never hold a reference
//! into registry state.
//!
//! ## Containment
//!
//! Route handlers run inside a panic barrier: a panicking handler produces a
//! 500, the panic handler fires, and the offending extension is transitioned
//! to `error` with its resources force-removed. Hook panics are contained by
//! the dispatcher. Disable always removes every route, middleware
//! registration, and hook that belongs to the extension, even when `stop`
//! fails.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use modulith_extension_sdk::routes::ExtensionRouter;
use modulith_extension_sdk::routes::{route_fn, RouteRegistration};
use modulith_extension_sdk::schema::{schema_for, validate_schema_name};
use modulith_extension_sdk::services::ConfigHandle;
use modulith_extension_sdk::{
    Extension, ExtensionMetadata, HookContext, HookType, TemplateRegistration,
};

use crate::config::HostConfig;
use crate::hooks::{panic_message, HookDispatcher};
use crate::host_error::HostError;
use crate::metrics::{ExtensionMetrics, MetricsCollector};
use crate::middleware::RequestPrincipal;
use crate::resolver::{DependencyNode, DependencyResolver};
use crate::router::{RouteMatch, RouteTable};
use crate::security::SecurityGate;
use crate::services::HostServices;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Registered,
    Initializing,
    Starting,
    Enabled,
    Stopping,
    Disabled,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Registered => "registered",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Starting => "starting",
            LifecycleState::Enabled => "enabled",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of the resources an extension has installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub routes: usize,
    pub middleware: usize,
    pub hooks: usize,
    pub templates: usize,
    pub assets: usize,
}

/// Result of the last health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    pub at: DateTime<Utc>,
    pub healthy: bool,
    pub message: Option<String>,
}

/// Per-extension runtime record. Mutated only by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionStatus {
    pub state: LifecycleState,
    pub registered_at: DateTime<Utc>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub last_health: Option<HealthProbe>,
    pub resources: ResourceCounts,
    pub last_error: Option<String>,
}

/// Snapshot row for the management listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub status: ExtensionStatus,
}

struct ExtensionEntry {
    extension: Arc<dyn Extension>,
    metadata: ExtensionMetadata,
    schema: String,
    status: ExtensionStatus,
    config: ConfigHandle,
    shutdown: Option<CancellationToken>,
    templates: Vec<TemplateRegistration>,
}

struct CollectedResources {
    routes: Vec<RouteRegistration>,
    middleware: Vec<modulith_extension_sdk::MiddlewareRegistration>,
    hooks: Vec<modulith_extension_sdk::HookRegistration>,
    templates: Vec<TemplateRegistration>,
    asset_routes: Vec<RouteRegistration>,
    counts: ResourceCounts,
}

type ReloadCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// The registry.
pub struct ExtensionRegistry {
    host_version: String,
    entries: RwLock<HashMap<String, ExtensionEntry>>,
    routes: Arc<RouteTable>,
    hooks: Arc<HookDispatcher>,
    security: Arc<SecurityGate>,
    metrics: Arc<MetricsCollector>,
    services: Arc<HostServices>,
    reload_callbacks: DashMap<String, ReloadCallback>,
    shutdown: CancellationToken,
}

impl ExtensionRegistry {
    pub fn new(host_version: impl Into<String>, services: Arc<HostServices>) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        Self {
            host_version: host_version.into(),
            entries: RwLock::new(HashMap::new()),
            routes: Arc::new(RouteTable::new()),
            hooks: Arc::new(HookDispatcher::new(Arc::clone(&metrics))),
            security: Arc::new(SecurityGate::new()),
            metrics,
            services,
            reload_callbacks: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    pub fn security(&self) -> Arc<SecurityGate> {
        Arc::clone(&self.security)
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn dispatcher(&self) -> Arc<HookDispatcher> {
        Arc::clone(&self.hooks)
    }

    pub fn host_services(&self) -> Arc<HostServices> {
        Arc::clone(&self.services)
    }

    /// Cancel all extension background work; called on host shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // --- registration ----------------------------------------------------

    /// Register an extension.
    ///
    /// Fails when the name is taken, the host version is outside the
    /// extension's declared window, the declared schema name is invalid, or
    /// the declared dependencies would close a cycle. Never calls extension
    /// lifecycle methods.
    pub async fn register(&self, extension: Arc<dyn Extension>) -> Result<(), HostError> {
        let metadata = extension.metadata();
        let name = metadata.name.clone();

        if !metadata.is_compatible_with(&self.host_version) {
            return Err(HostError::Incompatible {
                name,
                host_version: self.host_version.clone(),
            });
        }

        let schema = match extension.database_schema() {
            Some(declared) => {
                validate_schema_name(&declared)?;
                declared
            }
            None => schema_for(&name),
        };

        let mut entries = self.entries.write().await;
        if entries.contains_key(&name) {
            return Err(HostError::AlreadyRegistered(name));
        }

        // A cycle among already-registered extensions is fatal now; edges to
        // not-yet-registered names stay pending and are validated when the
        // graph is resolved. Every node's edges are restricted to present
        // names here (a cycle can only run through present nodes), so an
        // unresolved forward edge on an earlier registration never blocks a
        // later one.
        let restrict = |deps: &[String]| -> Vec<String> {
            deps.iter()
                .filter(|d| entries.contains_key(*d) || **d == name)
                .cloned()
                .collect()
        };
        let mut resolver = DependencyResolver::new();
        for entry in entries.values() {
            resolver.add(DependencyNode {
                name: entry.metadata.name.clone(),
                version: entry.metadata.version.clone(),
                dependencies: restrict(&entry.metadata.dependencies),
            });
        }
        resolver.add(DependencyNode {
            name: name.clone(),
            version: metadata.version.clone(),
            dependencies: restrict(&metadata.dependencies),
        });
        resolver.resolve()?;

        // Host policy: declared permissions are granted at registration.
        for permission in extension.required_permissions() {
            self.security.grant(&name, permission.as_str());
        }
        self.metrics.ensure(&name);

        entries.insert(
            name.clone(),
            ExtensionEntry {
                extension,
                metadata,
                schema,
                status: ExtensionStatus {
                    state: LifecycleState::Registered,
                    registered_at: Utc::now(),
                    enabled_at: None,
                    last_health: None,
                    resources: ResourceCounts::default(),
                    last_error: None,
                },
                config: ConfigHandle::default(),
                shutdown: None,
                templates: Vec::new(),
            },
        );
        tracing::info!(extension = %name, "extension registered");
        Ok(())
    }

    /// Unregister an extension, disabling it first when enabled.
    pub async fn unregister(&self, name: &str) -> Result<(), HostError> {
        let state = {
            let entries = self.entries.read().await;
            let entry = entries.get(name).ok_or_else(|| HostError::NotFound(name.into()))?;
            entry.status.state
        };

        match state {
            LifecycleState::Enabled => self.disable(name).await?,
            LifecycleState::Initializing | LifecycleState::Starting | LifecycleState::Stopping => {
                return Err(HostError::InvalidState {
                    name: name.to_string(),
                    state: state.to_string(),
                    operation: "unregister".to_string(),
                });
            }
            _ => {}
        }

        let mut entries = self.entries.write().await;
        entries.remove(name).ok_or_else(|| HostError::NotFound(name.into()))?;
        self.security.remove_extension(name);
        self.metrics.remove(name);
        self.reload_callbacks.remove(name);
        tracing::info!(extension = %name, "extension unregistered");
        Ok(())
    }

    // --- enable / disable ------------------------------------------------

    /// Drive an extension to `enabled`.
    pub async fn enable(&self, name: &str) -> Result<(), HostError> {
        // Reserve the transition.
        let (extension, schema, config) = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(name).ok_or_else(|| HostError::NotFound(name.into()))?;
            match entry.status.state {
                LifecycleState::Registered | LifecycleState::Disabled => {}
                other => {
                    return Err(HostError::InvalidState {
                        name: name.to_string(),
                        state: other.to_string(),
                        operation: "enable".to_string(),
                    })
                }
            }
            entry.status.state = LifecycleState::Initializing;
            entry.status.last_error = None;
            (Arc::clone(&entry.extension), entry.schema.clone(), entry.config.clone())
        };

        let shutdown = self.shutdown.child_token();
        let hook_bus = Arc::new(crate::hooks::DispatcherBus(Arc::clone(&self.hooks)));
        let services = match self
            .services
            .build_for(name, &schema, config, hook_bus, shutdown.clone())
        {
            Ok(services) => services,
            Err(err) => {
                self.fail_enable(name, err.to_string()).await;
                return Err(err);
            }
        };

        // Schema migrations run before the extension sees its database.
        let migrations = extension.migrations();
        if !migrations.is_empty() {
            if let Err(err) = self
                .services
                .migrations
                .apply_all(name, &schema, &migrations)
                .await
            {
                self.fail_enable(name, err.to_string()).await;
                return Err(err);
            }
        }

        // Initialize, outside the lock.
        match AssertUnwindSafe(extension.initialize(services)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => {
                self.fail_enable(name, cause.to_string()).await;
                return Err(HostError::InitializeFailed {
                    name: name.to_string(),
                    cause,
                });
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.fail_enable(name, message.clone()).await;
                return Err(HostError::PanicRecovered {
                    extension: name.to_string(),
                    message,
                });
            }
        }

        // Collect resource registrations.
        let collected = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            Self::collect_resources(&extension, name)
        })) {
            Ok(collected) => collected,
            Err(panic) => {
                let message = panic_message(panic);
                self.fail_enable(name, message.clone()).await;
                return Err(HostError::PanicRecovered {
                    extension: name.to_string(),
                    message,
                });
            }
        };

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(name) {
                entry.status.state = LifecycleState::Starting;
            }
        }

        // Start, outside the lock. Routes become reachable only afterwards.
        match AssertUnwindSafe(extension.start()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => {
                self.fail_enable(name, cause.to_string()).await;
                return Err(HostError::StartFailed {
                    name: name.to_string(),
                    cause,
                });
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.fail_enable(name, message.clone()).await;
                return Err(HostError::PanicRecovered {
                    extension: name.to_string(),
                    message,
                });
            }
        }

        // Commit: install resources and flip to enabled.
        {
            let mut entries = self.entries.write().await;

            for hook in collected.hooks {
                if let Err(err) = self.hooks.register(hook) {
                    // Roll back everything installed so far.
                    self.hooks.unregister_extension(name);
                    if let Some(entry) = entries.get_mut(name) {
                        entry.status.state = LifecycleState::Error;
                        entry.status.last_error = Some(err.to_string());
                    }
                    return Err(err);
                }
            }
            self.routes.install_routes(collected.routes);
            self.routes.install_routes(collected.asset_routes);
            self.routes.install_middleware(collected.middleware);

            if let Some(entry) = entries.get_mut(name) {
                entry.status.state = LifecycleState::Enabled;
                entry.status.enabled_at = Some(Utc::now());
                entry.status.resources = collected.counts;
                entry.shutdown = Some(shutdown);
                entry.templates = collected.templates;
            }
        }
        tracing::info!(extension = %name, "extension enabled");
        Ok(())
    }

    /// Drive an extension to `disabled`, removing every installed resource
    /// even when `stop` fails.
    pub async fn disable(&self, name: &str) -> Result<(), HostError> {
        let extension = {
            let mut entries = self.entries.write().await;
            let enabled = Self::enabled_of(&entries);
            let resolver = Self::resolver_of(&entries);

            let entry = entries.get_mut(name).ok_or_else(|| HostError::NotFound(name.into()))?;
            if entry.status.state != LifecycleState::Enabled {
                return Err(HostError::InvalidState {
                    name: name.to_string(),
                    state: entry.status.state.to_string(),
                    operation: "disable".to_string(),
                });
            }
            if !resolver.can_disable(name, &enabled) {
                return Err(HostError::RequiredByDependents {
                    name: name.to_string(),
                    dependents: resolver.dependents_of(name, &enabled),
                });
            }
            entry.status.state = LifecycleState::Stopping;
            if let Some(shutdown) = entry.shutdown.take() {
                shutdown.cancel();
            }
            Arc::clone(&entry.extension)
        };

        let stop_error = match AssertUnwindSafe(extension.stop()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(panic_message(panic)),
        };

        // Unconditional removal, stop outcome notwithstanding.
        let removed_hooks = self.hooks.unregister_extension(name);
        let (removed_routes, removed_middleware) = self.routes.remove_extension(name);

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(name) {
                entry.status.state = LifecycleState::Disabled;
                entry.status.enabled_at = None;
                entry.status.resources = ResourceCounts::default();
                entry.templates.clear();
                if let Some(message) = &stop_error {
                    entry.status.last_error = Some(message.clone());
                }
            }
        }

        if let Some(message) = stop_error {
            tracing::warn!(
                extension = %name,
                error = %message,
                removed_routes,
                removed_middleware,
                removed_hooks,
                "stop failed; resources removed anyway"
            );
        } else {
            tracing::info!(extension = %name, "extension disabled");
        }
        Ok(())
    }

    /// Enable every extension marked enabled in the configuration, in
    /// resolver order. The first failure aborts the remaining enables;
    /// already-enabled extensions stay enabled (documented partial-enable
    /// state).
    pub async fn enable_from_config(&self, config: &HostConfig) -> Result<Vec<String>, HostError> {
        let order = self.resolve_order().await?;
        let mut enabled = Vec::new();
        for name in order {
            if !config.extension_enabled(&name) {
                continue;
            }
            self.enable(&name).await?;
            let subtree = config.extension_config(&name);
            if !subtree.is_null() {
                self.apply_config(&name, subtree).await?;
            }
            enabled.push(name);
        }
        Ok(enabled)
    }

    /// The authoritative load order over all registered extensions.
    pub async fn resolve_order(&self) -> Result<Vec<String>, HostError> {
        let entries = self.entries.read().await;
        Self::resolver_of(&entries).resolve()
    }

    fn resolver_of(entries: &HashMap<String, ExtensionEntry>) -> DependencyResolver {
        DependencyResolver::from_nodes(entries.values().map(|entry| DependencyNode {
            name: entry.metadata.name.clone(),
            version: entry.metadata.version.clone(),
            dependencies: entry.metadata.dependencies.clone(),
        }))
    }

    fn enabled_of(entries: &HashMap<String, ExtensionEntry>) -> HashSet<String> {
        entries
            .values()
            .filter(|entry| entry.status.state == LifecycleState::Enabled)
            .map(|entry| entry.metadata.name.clone())
            .collect()
    }

    async fn fail_enable(&self, name: &str, message: String) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.status.state = LifecycleState::Error;
            entry.status.last_error = Some(message);
        }
    }

    fn collect_resources(extension: &Arc<dyn Extension>, name: &str) -> CollectedResources {
        let mut router = ExtensionRouter::new(name);
        extension.register_routes(&mut router);
        let routes = router.into_routes();
        let middleware = extension.register_middleware();
        let hooks = extension.register_hooks();
        let templates = extension.register_templates();
        let assets = extension.register_static_assets();

        // Static assets are served as plain GET routes below the extension
        // prefix, but counted separately from declared routes.
        let asset_routes: Vec<RouteRegistration> = assets
            .iter()
            .map(|asset| {
                let bytes = asset.bytes.clone();
                let content_type = asset.content_type.clone();
                let handler = route_fn(move |_req| {
                    let bytes = bytes.clone();
                    let content_type = content_type.clone();
                    Box::pin(async move {
                        (
                            [(axum::http::header::CONTENT_TYPE, content_type)],
                            bytes,
                        )
                            .into_response()
                    })
                });
                RouteRegistration {
                    extension: name.to_string(),
                    path: modulith_extension_sdk::routes::normalize_path(&format!(
                        "/ext/{name}/{}",
                        asset.path
                    )),
                    methods: vec![axum::http::Method::GET],
                    handler,
                    protected: false,
                    roles: Vec::new(),
                }
            })
            .collect();

        let counts = ResourceCounts {
            routes: routes.len(),
            middleware: middleware.len(),
            hooks: hooks.len(),
            templates: templates.len(),
            assets: assets.len(),
        };

        CollectedResources {
            routes,
            middleware,
            hooks,
            templates,
            asset_routes,
            counts,
        }
    }

    // --- snapshots -------------------------------------------------------

    pub async fn get(&self, name: &str) -> Option<ExtensionMetadata> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| entry.metadata.clone())
    }

    pub async fn list(&self) -> Vec<ExtensionDescriptor> {
        let entries = self.entries.read().await;
        let mut list: Vec<ExtensionDescriptor> = entries
            .values()
            .map(|entry| ExtensionDescriptor {
                name: entry.metadata.name.clone(),
                version: entry.metadata.version.clone(),
                description: entry.metadata.description.clone(),
                author: entry.metadata.author.clone(),
                dependencies: entry.metadata.dependencies.clone(),
                tags: entry.metadata.tags.clone(),
                status: entry.status.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn status(&self, name: &str) -> Option<ExtensionStatus> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| entry.status.clone())
    }

    pub async fn metrics(&self, name: &str) -> Option<ExtensionMetrics> {
        // Snapshot; the record exists from registration onwards.
        if self.entries.read().await.contains_key(name) {
            self.metrics.snapshot(name)
        } else {
            None
        }
    }

    pub async fn templates_of(&self, name: &str) -> Vec<TemplateRegistration> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|entry| entry.templates.clone())
            .unwrap_or_default()
    }

    // --- configuration ---------------------------------------------------

    /// Validate, apply, and publish a configuration subtree for one
    /// extension, then invoke its reload callback with the same value.
    pub async fn apply_config(&self, name: &str, value: Value) -> Result<(), HostError> {
        let extension = {
            let entries = self.entries.read().await;
            let entry = entries.get(name).ok_or_else(|| HostError::NotFound(name.into()))?;
            Arc::clone(&entry.extension)
        };

        extension.validate_config(&value)?;
        extension.apply_config(&value).await?;

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(name) {
                entry.config.replace(value.clone());
            }
        }
        if let Some(callback) = self.reload_callbacks.get(name) {
            callback(&value);
        }
        Ok(())
    }

    /// Register a host-side callback fired after each successful config
    /// apply for `name`.
    pub fn set_reload_callback(&self, name: &str, callback: ReloadCallback) {
        self.reload_callbacks.insert(name.to_string(), callback);
    }

    // --- health ----------------------------------------------------------

    /// Probe an enabled extension and record the outcome in its status.
    pub async fn probe_health(&self, name: &str) -> Result<HealthProbe, HostError> {
        let extension = {
            let entries = self.entries.read().await;
            let entry = entries.get(name).ok_or_else(|| HostError::NotFound(name.into()))?;
            if entry.status.state != LifecycleState::Enabled {
                return Err(HostError::InvalidState {
                    name: name.to_string(),
                    state: entry.status.state.to_string(),
                    operation: "health probe".to_string(),
                });
            }
            Arc::clone(&entry.extension)
        };

        let probe = match AssertUnwindSafe(extension.health()).catch_unwind().await {
            Ok(Ok(())) => HealthProbe {
                at: Utc::now(),
                healthy: true,
                message: None,
            },
            Ok(Err(err)) => HealthProbe {
                at: Utc::now(),
                healthy: false,
                message: Some(err.to_string()),
            },
            Err(panic) => HealthProbe {
                at: Utc::now(),
                healthy: false,
                message: Some(panic_message(panic)),
            },
        };

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.status.last_health = Some(probe.clone());
        }
        Ok(probe)
    }

    // --- request path ----------------------------------------------------

    /// Route one request through the extension surface: rate gate, pre-request
    /// hooks, the composed handler chain inside a panic barrier, post-response
    /// hooks, metrics.
    pub async fn handle_request(&self, req: Request<Body>) -> Response {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        let route = match self.routes.find(&path, &method) {
            RouteMatch::Found(route) => route,
            RouteMatch::MethodNotAllowed => {
                return (
                    axum::http::StatusCode::METHOD_NOT_ALLOWED,
                    axum::Json(serde_json::json!({
                        "error": {"message": "method not allowed", "type": "method_not_allowed", "code": 405}
                    })),
                )
                    .into_response();
            }
            RouteMatch::NotFound => {
                return (
                    axum::http::StatusCode::NOT_FOUND,
                    axum::Json(serde_json::json!({
                        "error": {"message": "no such extension route", "type": "route_not_found", "code": 404}
                    })),
                )
                    .into_response();
            }
        };
        let extension = route.extension.clone();

        if let Err(err) = self.security.check_rate(&extension) {
            return err.into_response();
        }

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let user_id = req
            .extensions()
            .get::<RequestPrincipal>()
            .map(|p| p.user_id.clone());

        let mut pre_ctx = HookContext::new(HookType::PreRequest, &path)
            .with_method(method.to_string())
            .with_cancel(cancel.clone());
        pre_ctx.user_id = user_id.clone();
        if let Err(err) = self.hooks.execute(HookType::PreRequest, &mut pre_ctx).await {
            // Hook failures never abort the request path.
            tracing::warn!(extension = %extension, error = %err, "pre-request hook failed");
        }

        let chain = self.routes.compose(&route);
        let (response, error) = match AssertUnwindSafe(chain.handle(req)).catch_unwind().await {
            Ok(response) => {
                let error = response
                    .status()
                    .is_server_error()
                    .then(|| response.status().to_string());
                (response, error)
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.contain_route_panic(&extension, &message).await;
                (
                    HostError::PanicRecovered {
                        extension: extension.clone(),
                        message: message.clone(),
                    }
                    .into_response(),
                    Some(message),
                )
            }
        };

        let mut post_ctx = HookContext::new(HookType::PostResponse, &path)
            .with_method(method.to_string())
            .with_cancel(cancel);
        post_ctx.user_id = user_id;
        post_ctx.set("status", response.status().as_u16());
        let _ = self
            .hooks
            .execute_with_result(HookType::PostResponse, &mut post_ctx)
            .await;

        self.metrics.record_request(
            &extension,
            method.as_str(),
            &path,
            started.elapsed(),
            error.as_deref(),
        );
        response
    }

    /// A route handler panicked: invoke the panic handler, transition the
    /// extension to `error`, and force-remove its resources. In-flight
    /// requests finish on their snapshots.
    async fn contain_route_panic(&self, name: &str, message: &str) {
        tracing::error!(extension = %name, "extension panicked in route handler: {message}");
        self.security.record(crate::security::AuditEntry::new(
            name,
            "panic",
            "route_handler",
            "contained",
        ));

        let removed_hooks = self.hooks.unregister_extension(name);
        let (removed_routes, removed_middleware) = self.routes.remove_extension(name);

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.status.state = LifecycleState::Error;
            entry.status.enabled_at = None;
            entry.status.resources = ResourceCounts::default();
            entry.status.last_error = Some(message.to_string());
            if let Some(shutdown) = entry.shutdown.take() {
                shutdown.cancel();
            }
        }
        tracing::warn!(
            extension = %name,
            removed_routes,
            removed_middleware,
            removed_hooks,
            "extension disabled after panic"
        );
    }

    /// Audit entries for one extension, newest first.
    pub fn audit_entries(&self, extension: Option<&str>, limit: usize) -> Vec<crate::security::AuditEntry> {
        self.security.audit_entries(extension, limit)
    }
}
