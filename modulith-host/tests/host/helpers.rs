// Test utilities and helpers shared across the suite.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum_test::TestServer;

use modulith_extension_sdk::hooks::hook_fn;
use modulith_extension_sdk::routes::{middleware_fn, route_fn};
use modulith_extension_sdk::{
    Extension, ExtensionError, ExtensionMetadata, ExtensionRouter, ExtensionServices,
    HookContext, HookRegistration, HookType, MiddlewareRegistration, StaticAssetRegistration,
    TemplateRegistration,
};
use modulith_host::config::HostConfig;
use modulith_host::middleware::encode_token;
use modulith_host::registry::ExtensionRegistry;
use modulith_host::server::create_server;
use modulith_host::services::HostServices;

/// Secret matching `HostConfig::default()`.
pub const DEV_SECRET: &str = "modulith-dev-secret";

#[derive(Default)]
pub struct LifecycleCounters {
    pub initialized: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub hook_calls: AtomicUsize,
    pub middleware_calls: AtomicUsize,
}

/// A configurable extension for lifecycle and failure-path tests.
///
/// Registers two routes (`/ping` and `/boom`), one path-scoped middleware,
/// one pre-request hook, one template, and one static asset, so resource
/// counts are predictable: `{routes: 2, middleware: 1, hooks: 1,
/// templates: 1, assets: 1}`.
pub struct TestExtension {
    name: String,
    version: String,
    dependencies: Vec<String>,
    min_host: Option<String>,
    max_host: Option<String>,
    fail_initialize: bool,
    fail_start: bool,
    fail_stop: bool,
    pub counters: Arc<LifecycleCounters>,
}

impl TestExtension {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            dependencies: Vec::new(),
            min_host: None,
            max_host: None,
            fail_initialize: false,
            fail_start: false,
            fail_stop: false,
            counters: Arc::new(LifecycleCounters::default()),
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_host_window(mut self, min: Option<&str>, max: Option<&str>) -> Self {
        self.min_host = min.map(str::to_string);
        self.max_host = max.map(str::to_string);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait::async_trait]
impl Extension for TestExtension {
    fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata::new(&self.name, &self.version)
            .with_dependencies(self.dependencies.clone())
            .with_host_versions(self.min_host.clone(), self.max_host.clone())
    }

    async fn initialize(&self, _services: Arc<ExtensionServices>) -> Result<(), ExtensionError> {
        if self.fail_initialize {
            return Err(ExtensionError::Initialize {
                message: "configured to fail".to_string(),
            });
        }
        self.counters.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<(), ExtensionError> {
        if self.fail_start {
            return Err(ExtensionError::Start {
                message: "configured to fail".to_string(),
            });
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ExtensionError> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(ExtensionError::Stop {
                message: "configured to fail".to_string(),
            });
        }
        Ok(())
    }

    fn register_routes(&self, router: &mut ExtensionRouter) {
        let name = self.name.clone();
        router.route(
            "/ping",
            vec![axum::http::Method::GET],
            route_fn(move |_req| {
                let name = name.clone();
                Box::pin(async move {
                    axum::response::IntoResponse::into_response(format!("pong from {name}"))
                })
            }),
        );
        router.route(
            "/boom",
            vec![axum::http::Method::GET],
            route_fn(|_req| Box::pin(async move { panic!("route handler exploded") })),
        );
    }

    fn register_middleware(&self) -> Vec<MiddlewareRegistration> {
        let counters = Arc::clone(&self.counters);
        vec![MiddlewareRegistration::new(
            &self.name,
            "counting",
            5,
            middleware_fn(move |req, next| {
                let counters = Arc::clone(&counters);
                Box::pin(async move {
                    counters.middleware_calls.fetch_add(1, Ordering::SeqCst);
                    next.handle(req).await
                })
            }),
        )
        .with_paths(vec![format!("/ext/{}/", self.name)])]
    }

    fn register_hooks(&self) -> Vec<HookRegistration> {
        let counters = Arc::clone(&self.counters);
        vec![HookRegistration::new(
            &self.name,
            "counting",
            HookType::PreRequest,
            0,
            hook_fn(move |_ctx: &mut HookContext| {
                let counters = Arc::clone(&counters);
                Box::pin(async move {
                    counters.hook_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .with_paths(vec![format!("/ext/{}/", self.name)])]
    }

    fn register_templates(&self) -> Vec<TemplateRegistration> {
        vec![TemplateRegistration {
            name: "index".to_string(),
            content: "<html>{{ name }}</html>".to_string(),
        }]
    }

    fn register_static_assets(&self) -> Vec<StaticAssetRegistration> {
        vec![StaticAssetRegistration {
            path: "assets/app.css".to_string(),
            content_type: "text/css".to_string(),
            bytes: b"body { margin: 0 }".to_vec(),
        }]
    }
}

pub fn new_registry() -> Arc<ExtensionRegistry> {
    new_registry_with_version("1.0.0")
}

/// Registry wired with a shared IAM handle so tests can grant roles.
pub fn new_registry_with_iam() -> (
    Arc<ExtensionRegistry>,
    Arc<modulith_extension_sdk::services::memory::MemoryIam>,
) {
    use modulith_extension_sdk::services::memory::{
        MemoryBlobStore, MemoryDatabase, MemoryIam, RecordingPayments,
    };
    let iam = Arc::new(MemoryIam::new());
    let services = HostServices::new(
        Arc::new(MemoryDatabase::new()),
        Arc::new(MemoryBlobStore::new()),
        Arc::clone(&iam) as Arc<dyn modulith_extension_sdk::services::Iam>,
        Arc::new(RecordingPayments::new()),
    );
    (
        Arc::new(ExtensionRegistry::new("1.0.0", Arc::new(services))),
        iam,
    )
}

pub fn new_registry_with_version(host_version: &str) -> Arc<ExtensionRegistry> {
    Arc::new(ExtensionRegistry::new(
        host_version,
        Arc::new(HostServices::in_memory()),
    ))
}

pub fn server_with(registry: &Arc<ExtensionRegistry>, config: HostConfig) -> TestServer {
    let app = create_server(config, Arc::clone(registry));
    TestServer::new(app).unwrap()
}

pub fn server(registry: &Arc<ExtensionRegistry>) -> TestServer {
    server_with(registry, HostConfig::default())
}

pub fn bearer(user: &str, roles: &[&str]) -> String {
    let token = encode_token(DEV_SECRET, user, Some(&format!("{user}@example.com")), roles, 3600)
        .unwrap();
    format!("Bearer {token}")
}
