//! Route and middleware registration types.
//!
//! Extensions never touch the host's HTTP listener directly. They describe
//! routes and middleware with the types here; the host's composer rewrites
//! every path under `/ext/<extension>/`, installs registrations atomically on
//! enable, and removes them unconditionally on disable.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;

/// An HTTP handler owned by an extension.
///
/// Handlers run inside the host's panic barrier; a panicking handler yields a
/// 500 response and disables the offending extension rather than taking the
/// host down.
#[async_trait::async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, req: Request<Body>) -> Response;
}

type BoxRouteFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

struct FnRouteHandler<F>(F);

#[async_trait::async_trait]
impl<F> RouteHandler for FnRouteHandler<F>
where
    F: Fn(Request<Body>) -> BoxRouteFuture + Send + Sync,
{
    async fn handle(&self, req: Request<Body>) -> Response {
        (self.0)(req).await
    }
}

/// Wrap a closure as a [`RouteHandler`].
pub fn route_fn<F>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(Request<Body>) -> BoxRouteFuture + Send + Sync + 'static,
{
    Arc::new(FnRouteHandler(f))
}

/// Middleware wrapping a handler chain.
///
/// `next` is the remainder of the chain (further middleware and finally the
/// route handler). Middleware may short-circuit by not calling `next`.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: Request<Body>, next: Arc<dyn RouteHandler>) -> Response;
}

struct FnMiddleware<F>(F);

#[async_trait::async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Request<Body>, Arc<dyn RouteHandler>) -> BoxRouteFuture + Send + Sync,
{
    async fn handle(&self, req: Request<Body>, next: Arc<dyn RouteHandler>) -> Response {
        (self.0)(req, next).await
    }
}

/// Wrap a closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request<Body>, Arc<dyn RouteHandler>) -> BoxRouteFuture + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// A route as installed in the host's route table.
#[derive(Clone)]
pub struct RouteRegistration {
    pub extension: String,
    /// Full path, always rooted at `/ext/<extension>`.
    pub path: String,
    pub methods: Vec<Method>,
    pub handler: Arc<dyn RouteHandler>,
    /// Reject unauthenticated requests with 401.
    pub protected: bool,
    /// Reject principals lacking any of these roles with 403. Implies
    /// `protected`.
    pub roles: Vec<String>,
}

impl std::fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("extension", &self.extension)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("protected", &self.protected)
            .field("roles", &self.roles)
            .finish()
    }
}

/// A middleware declared by an extension.
///
/// Empty `paths` applies to every request; otherwise the same pattern rules
/// as hooks (`*`, prefix ending in `/`, exact-or-segment). First-registered
/// middleware runs first among equal priorities.
#[derive(Clone)]
pub struct MiddlewareRegistration {
    pub extension: String,
    pub name: String,
    pub priority: i32,
    pub paths: Vec<String>,
    pub handler: Arc<dyn Middleware>,
}

impl MiddlewareRegistration {
    pub fn new(
        extension: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        handler: Arc<dyn Middleware>,
    ) -> Self {
        Self {
            extension: extension.into(),
            name: name.into(),
            priority,
            paths: Vec::new(),
            handler,
        }
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }
}

impl std::fmt::Debug for MiddlewareRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistration")
            .field("extension", &self.extension)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("paths", &self.paths)
            .finish()
    }
}

/// Collecting route builder handed to `Extension::register_routes`.
///
/// All paths are rewritten under `/ext/<extension>`; a path that already
/// carries the extension's own prefix is left alone, anything else (including
/// attempts to address another extension's prefix) is nested under it.
/// [`ExtensionRouter::path_prefix`] returns a sub-router whose routes compose
/// additively and land in the same collection.
#[derive(Clone)]
pub struct ExtensionRouter {
    extension: String,
    base: String,
    routes: Arc<Mutex<Vec<RouteRegistration>>>,
}

impl ExtensionRouter {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            base: String::new(),
            routes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The extension this router collects for.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// A sub-router rooted at `<current base>/<prefix>`.
    pub fn path_prefix(&self, prefix: &str) -> ExtensionRouter {
        let mut base = self.base.clone();
        for segment in prefix.split('/').filter(|s| !s.is_empty()) {
            base.push('/');
            base.push_str(segment);
        }
        ExtensionRouter {
            extension: self.extension.clone(),
            base,
            routes: Arc::clone(&self.routes),
        }
    }

    /// Register an unprotected route.
    pub fn route(&self, path: &str, methods: Vec<Method>, handler: Arc<dyn RouteHandler>) {
        self.push(path, methods, handler, false, Vec::new());
    }

    /// Register a route requiring an authenticated principal.
    pub fn protected_route(
        &self,
        path: &str,
        methods: Vec<Method>,
        handler: Arc<dyn RouteHandler>,
    ) {
        self.push(path, methods, handler, true, Vec::new());
    }

    /// Register a route requiring an authenticated principal holding one of
    /// `roles`.
    pub fn role_route(
        &self,
        path: &str,
        methods: Vec<Method>,
        roles: Vec<String>,
        handler: Arc<dyn RouteHandler>,
    ) {
        self.push(path, methods, handler, true, roles);
    }

    fn push(
        &self,
        path: &str,
        methods: Vec<Method>,
        handler: Arc<dyn RouteHandler>,
        protected: bool,
        roles: Vec<String>,
    ) {
        let path = self.full_path(path);
        self.routes.lock().unwrap().push(RouteRegistration {
            extension: self.extension.clone(),
            path,
            methods,
            handler,
            protected,
            roles,
        });
    }

    fn full_path(&self, path: &str) -> String {
        let root = format!("/ext/{}", self.extension);
        let normalized = normalize_path(path);
        // Already correctly rooted: keep as-is. Anything else is rewritten
        // under the extension root so no extension can register outside its
        // own namespace.
        if self.base.is_empty()
            && (normalized == root || normalized.starts_with(&format!("{root}/")))
        {
            return normalized;
        }
        let mut full = root;
        full.push_str(&self.base);
        if normalized != "/" {
            full.push_str(&normalized);
        }
        full
    }

    /// Drain the collected routes.
    pub fn into_routes(self) -> Vec<RouteRegistration> {
        std::mem::take(&mut *self.routes.lock().unwrap())
    }
}

/// Collapse duplicate slashes and guarantee a single leading `/`.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
