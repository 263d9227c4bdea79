//! Hook types and the shared dispatch context.
//!
//! Hooks are callbacks at named, typed points in the request and lifecycle
//! timeline. Extensions declare them via [`HookRegistration`]; the host's
//! dispatcher orders them by ascending priority (registration order breaks
//! ties), applies the optional path filters, and runs them sequentially on
//! the caller's task inside a panic barrier.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ExtensionError;

/// The closed set of dispatch points.
///
/// New hook types are a host-version change, never something an extension can
/// invent; dispatch tables are keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    PreRequest,
    PostRequest,
    PreResponse,
    PostResponse,
    Error,
    Auth,
    Authorization,
    PreDatabase,
    PostDatabase,
    BeforeUpload,
    AfterUpload,
    BeforeDownload,
    AfterDownload,
    PostLogin,
    PostSignup,
}

impl HookType {
    /// Every hook type, in a stable order. Used by the dispatcher to build
    /// its per-type tables.
    pub const ALL: [HookType; 15] = [
        HookType::PreRequest,
        HookType::PostRequest,
        HookType::PreResponse,
        HookType::PostResponse,
        HookType::Error,
        HookType::Auth,
        HookType::Authorization,
        HookType::PreDatabase,
        HookType::PostDatabase,
        HookType::BeforeUpload,
        HookType::AfterUpload,
        HookType::BeforeDownload,
        HookType::AfterDownload,
        HookType::PostLogin,
        HookType::PostSignup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreRequest => "pre_request",
            HookType::PostRequest => "post_request",
            HookType::PreResponse => "pre_response",
            HookType::PostResponse => "post_response",
            HookType::Error => "error",
            HookType::Auth => "auth",
            HookType::Authorization => "authorization",
            HookType::PreDatabase => "pre_database",
            HookType::PostDatabase => "post_database",
            HookType::BeforeUpload => "before_upload",
            HookType::AfterUpload => "after_upload",
            HookType::BeforeDownload => "before_download",
            HookType::AfterDownload => "after_download",
            HookType::PostLogin => "post_login",
            HookType::PostSignup => "post_signup",
        }
    }
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable context threaded through one dispatch.
///
/// Hooks within a dispatch run sequentially, so the open `data` map needs no
/// locking. Keys are documented per hook type (e.g. `user_id`, `file_name`,
/// `file_size` for the upload hooks); values are plain JSON so unrelated
/// extensions can interoperate without sharing types.
#[derive(Debug)]
pub struct HookContext {
    /// The dispatch point being executed.
    pub hook_type: HookType,
    /// Request path, when the dispatch originates from an HTTP request.
    pub path: String,
    /// HTTP method, when applicable.
    pub method: Option<String>,
    /// Authenticated principal, when known.
    pub user_id: Option<String>,
    /// Error message for `Error` dispatches.
    pub error: Option<String>,
    /// Open key/value payload shared by all hooks of one dispatch.
    pub data: HashMap<String, serde_json::Value>,
    /// Caller's cancellation token; hooks should observe it and return
    /// promptly once cancelled.
    pub cancel: CancellationToken,
}

impl HookContext {
    pub fn new(hook_type: HookType, path: impl Into<String>) -> Self {
        Self {
            hook_type,
            path: path.into(),
            method: None,
            user_id: None,
            error: None,
            data: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Insert a data value, serializing it to JSON.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.into(), value);
        }
    }

    /// Read a data value back out, deserializing from JSON.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A hook callback.
///
/// Implementations must be `Send + Sync`; the dispatcher shares them behind
/// an `Arc` and may run them from any worker.
#[async_trait::async_trait]
pub trait HookHandler: Send + Sync {
    async fn execute(&self, ctx: &mut HookContext) -> Result<(), ExtensionError>;
}

type BoxHookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExtensionError>> + Send + 'a>>;

struct FnHookHandler<F>(F);

#[async_trait::async_trait]
impl<F> HookHandler for FnHookHandler<F>
where
    F: for<'a> Fn(&'a mut HookContext) -> BoxHookFuture<'a> + Send + Sync,
{
    async fn execute(&self, ctx: &mut HookContext) -> Result<(), ExtensionError> {
        (self.0)(ctx).await
    }
}

/// Wrap a closure as a [`HookHandler`].
///
/// ```rust
/// use modulith_extension_sdk::hooks::{hook_fn, HookContext};
///
/// let handler = hook_fn(|ctx: &mut HookContext| {
///     Box::pin(async move {
///         ctx.set("seen", true);
///         Ok(())
///     })
/// });
/// ```
pub fn hook_fn<F>(f: F) -> Arc<dyn HookHandler>
where
    F: for<'a> Fn(&'a mut HookContext) -> BoxHookFuture<'a> + Send + Sync + 'static,
{
    Arc::new(FnHookHandler(f))
}

/// A hook declared by an extension.
///
/// `(extension, name)` must be unique within one hook type; lower `priority`
/// runs first. An empty `paths` list matches every path; otherwise each
/// pattern is `*` (all), a prefix ending in `/`, or an exact segment match.
#[derive(Clone)]
pub struct HookRegistration {
    pub extension: String,
    pub name: String,
    pub hook_type: HookType,
    pub priority: i32,
    pub paths: Vec<String>,
    pub handler: Arc<dyn HookHandler>,
}

impl HookRegistration {
    pub fn new(
        extension: impl Into<String>,
        name: impl Into<String>,
        hook_type: HookType,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) -> Self {
        Self {
            extension: extension.into(),
            name: name.into(),
            hook_type,
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

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("extension", &self.extension)
            .field("name", &self.name)
            .field("hook_type", &self.hook_type)
            .field("priority", &self.priority)
            .field("paths", &self.paths)
            .finish()
    }
}
