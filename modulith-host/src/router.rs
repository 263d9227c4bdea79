//! Route table and middleware composition.
//!
//! The registry installs an extension's routes and middleware here atomically
//! on enable and removes them unconditionally on disable. Dispatch snapshots
//! the matching route at request entry, so an in-flight request keeps its
//! handler even if the extension is disabled underneath it; new requests
//! simply stop matching.
//!
//! The middleware chain is composed by sorting registrations into execution
//! order (ascending priority, then registration order) and wrapping the
//! handler in reverse, so the first-registered middleware ends up outermost
//! and runs first. Path-scoped middleware is transparent on non-matching
//! requests.

use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};

use modulith_extension_sdk::routes::{
    Middleware, MiddlewareRegistration, RouteHandler, RouteRegistration,
};

use crate::host_error::HostError;
use crate::middleware::RequestPrincipal;
use crate::paths::any_path_matches;

/// Result of a route lookup.
pub enum RouteMatch {
    Found(RouteRegistration),
    MethodNotAllowed,
    NotFound,
}

struct StoredMiddleware {
    registration: MiddlewareRegistration,
    seq: u64,
}

/// The host's dynamic route table.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<Vec<RouteRegistration>>,
    middleware: RwLock<Vec<Arc<StoredMiddleware>>>,
    next_seq: RwLock<u64>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install all of an extension's routes in one step.
    pub fn install_routes(&self, routes: Vec<RouteRegistration>) {
        self.routes.write().unwrap().extend(routes);
    }

    /// Install all of an extension's middleware in one step.
    pub fn install_middleware(&self, registrations: Vec<MiddlewareRegistration>) {
        let mut middleware = self.middleware.write().unwrap();
        for registration in registrations {
            let seq = {
                let mut next = self.next_seq.write().unwrap();
                *next += 1;
                *next
            };
            middleware.push(Arc::new(StoredMiddleware { registration, seq }));
        }
    }

    /// Remove everything `extension` installed. Returns `(routes, middleware)`
    /// removal counts.
    pub fn remove_extension(&self, extension: &str) -> (usize, usize) {
        let removed_routes = {
            let mut routes = self.routes.write().unwrap();
            let before = routes.len();
            routes.retain(|r| r.extension != extension);
            before - routes.len()
        };
        let removed_middleware = {
            let mut middleware = self.middleware.write().unwrap();
            let before = middleware.len();
            middleware.retain(|m| m.registration.extension != extension);
            before - middleware.len()
        };
        (removed_routes, removed_middleware)
    }

    pub fn route_count_for(&self, extension: &str) -> usize {
        self.routes
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.extension == extension)
            .count()
    }

    pub fn middleware_count_for(&self, extension: &str) -> usize {
        self.middleware
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.registration.extension == extension)
            .count()
    }

    /// All installed route paths, for the management listing.
    pub fn paths_for(&self, extension: &str) -> Vec<String> {
        self.routes
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.extension == extension)
            .map(|r| r.path.clone())
            .collect()
    }

    /// Look up the route for `path` + `method`. An empty method list on a
    /// registration matches every method.
    pub fn find(&self, path: &str, method: &Method) -> RouteMatch {
        let routes = self.routes.read().unwrap();
        let mut path_matched = false;
        for route in routes.iter() {
            if route.path != path {
                continue;
            }
            path_matched = true;
            if route.methods.is_empty() || route.methods.contains(method) {
                return RouteMatch::Found(route.clone());
            }
        }
        if path_matched {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    /// Compose the full handler chain for a matched route: auth gate inside,
    /// middleware wrapped outside in reverse execution order.
    pub fn compose(&self, route: &RouteRegistration) -> Arc<dyn RouteHandler> {
        let mut handler: Arc<dyn RouteHandler> = Arc::clone(&route.handler);
        if route.protected || !route.roles.is_empty() {
            handler = Arc::new(AuthGate {
                roles: route.roles.clone(),
                inner: handler,
            });
        }

        let mut chain: Vec<Arc<StoredMiddleware>> =
            self.middleware.read().unwrap().iter().cloned().collect();
        chain.sort_by_key(|m| (m.registration.priority, m.seq));

        for stored in chain.into_iter().rev() {
            handler = Arc::new(ScopedMiddleware {
                paths: stored.registration.paths.clone(),
                middleware: Arc::clone(&stored.registration.handler),
                next: handler,
            });
        }
        handler
    }
}

/// `RequireAuth` / `RequireRole` composed from the route's registration
/// flags. Rejects with 401 when no principal was established and 403 when a
/// role requirement is unmet.
struct AuthGate {
    roles: Vec<String>,
    inner: Arc<dyn RouteHandler>,
}

#[async_trait::async_trait]
impl RouteHandler for AuthGate {
    async fn handle(&self, req: Request<Body>) -> Response {
        let Some(principal) = req.extensions().get::<RequestPrincipal>().cloned() else {
            return HostError::Unauthorized.into_response();
        };
        if !self.roles.is_empty()
            && !self.roles.iter().any(|role| principal.roles.contains(role))
        {
            return HostError::RoleRequired {
                role: self.roles.join("|"),
            }
            .into_response();
        }
        self.inner.handle(req).await
    }
}

/// One layer of the Russian-doll chain. Transparent when the registration is
/// path-scoped and the request path does not match.
struct ScopedMiddleware {
    paths: Vec<String>,
    middleware: Arc<dyn Middleware>,
    next: Arc<dyn RouteHandler>,
}

#[async_trait::async_trait]
impl RouteHandler for ScopedMiddleware {
    async fn handle(&self, req: Request<Body>) -> Response {
        if !any_path_matches(&self.paths, req.uri().path()) {
            return self.next.handle(req).await;
        }
        self.middleware
            .handle(req, Arc::clone(&self.next))
            .await
    }
}
