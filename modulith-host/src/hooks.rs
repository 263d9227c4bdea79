//! Typed, priority-ordered hook dispatch with panic isolation.
//!
//! The dispatcher owns one ordered list per [`HookType`]. Registration keeps
//! the list sorted by ascending priority with registration order breaking
//! ties; dispatch clones the matching slice out of the lock and runs the
//! hooks sequentially on the caller's task. Each invocation sits inside a
//! panic barrier: a panicking hook is converted into an error, the configured
//! panic handler fires (default: log), and dispatch continues with the
//! remaining hooks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::FutureExt;

use modulith_extension_sdk::{HookContext, HookRegistration, HookType};

use crate::host_error::HostError;
use crate::metrics::MetricsCollector;
use crate::paths::any_path_matches;

/// Callback invoked whenever extension code panics inside a barrier.
pub type PanicHandler = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Per-hook outcome from [`HookDispatcher::execute_with_result`].
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub extension: String,
    pub hook: String,
    pub hook_type: HookType,
    pub error: Option<String>,
    pub latency_ms: u64,
}

struct StoredHook {
    registration: HookRegistration,
    seq: u64,
}

/// The host's hook dispatcher.
pub struct HookDispatcher {
    hooks: RwLock<HashMap<HookType, Vec<Arc<StoredHook>>>>,
    metrics: Arc<MetricsCollector>,
    panic_handler: RwLock<Option<PanicHandler>>,
    next_seq: RwLock<u64>,
}

impl HookDispatcher {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            metrics,
            panic_handler: RwLock::new(None),
            next_seq: RwLock::new(0),
        }
    }

    /// Replace the default log-only panic handler.
    pub fn set_panic_handler(&self, handler: PanicHandler) {
        *self.panic_handler.write().unwrap() = Some(handler);
    }

    fn on_panic(&self, extension: &str, message: &str) {
        let guard = self.panic_handler.read().unwrap();
        match guard.as_ref() {
            Some(handler) => handler(extension, message),
            None => {
                tracing::error!(extension = %extension, "extension panicked in hook: {message}")
            }
        }
    }

    /// Register a hook. `(extension, name)` must be unique within the hook's
    /// type.
    pub fn register(&self, registration: HookRegistration) -> Result<(), HostError> {
        let mut hooks = self.hooks.write().unwrap();
        let list = hooks.entry(registration.hook_type).or_default();
        if list.iter().any(|h| {
            h.registration.extension == registration.extension
                && h.registration.name == registration.name
        }) {
            return Err(HostError::AlreadyRegistered(format!(
                "hook {}/{} ({})",
                registration.extension, registration.name, registration.hook_type
            )));
        }

        let seq = {
            let mut next = self.next_seq.write().unwrap();
            *next += 1;
            *next
        };
        list.push(Arc::new(StoredHook { registration, seq }));
        // Ascending priority; the sequence number preserves registration
        // order among equal priorities.
        list.sort_by_key(|h| (h.registration.priority, h.seq));
        Ok(())
    }

    /// Remove every hook registered by `extension`. Returns how many were
    /// removed.
    pub fn unregister_extension(&self, extension: &str) -> usize {
        let mut hooks = self.hooks.write().unwrap();
        let mut removed = 0;
        for list in hooks.values_mut() {
            let before = list.len();
            list.retain(|h| h.registration.extension != extension);
            removed += before - list.len();
        }
        removed
    }

    /// Number of hooks currently installed for `extension`.
    pub fn count_for(&self, extension: &str) -> usize {
        self.hooks
            .read()
            .unwrap()
            .values()
            .flatten()
            .filter(|h| h.registration.extension == extension)
            .count()
    }

    fn matching(&self, hook_type: HookType, path: &str) -> Vec<Arc<StoredHook>> {
        self.hooks
            .read()
            .unwrap()
            .get(&hook_type)
            .map(|list| {
                list.iter()
                    .filter(|h| any_path_matches(&h.registration.paths, path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn run_one(&self, stored: &StoredHook, ctx: &mut HookContext) -> Option<HostError> {
        let registration = &stored.registration;
        let started = Instant::now();

        let outcome = AssertUnwindSafe(registration.handler.execute(ctx))
            .catch_unwind()
            .await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                self.metrics
                    .record_hook(&registration.extension, &registration.name, latency, None);
                None
            }
            Ok(Err(cause)) => {
                let message = cause.to_string();
                self.metrics.record_hook(
                    &registration.extension,
                    &registration.name,
                    latency,
                    Some(&message),
                );
                tracing::warn!(
                    extension = %registration.extension,
                    hook = %registration.name,
                    hook_type = %registration.hook_type,
                    error = %message,
                    "hook failed"
                );
                Some(HostError::HookExecution {
                    extension: registration.extension.clone(),
                    hook: registration.name.clone(),
                    hook_type: registration.hook_type,
                    cause,
                })
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.metrics.record_hook(
                    &registration.extension,
                    &registration.name,
                    latency,
                    Some(&message),
                );
                self.on_panic(&registration.extension, &message);
                Some(HostError::PanicRecovered {
                    extension: registration.extension.clone(),
                    message,
                })
            }
        }
    }

    /// Dispatch `ctx` through every matching hook.
    ///
    /// All matching hooks run even when an earlier one fails; the returned
    /// error is the first failure only.
    pub async fn execute(&self, hook_type: HookType, ctx: &mut HookContext) -> Result<(), HostError> {
        let hooks = self.matching(hook_type, &ctx.path.clone());
        let mut first_error = None;
        for stored in hooks {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if let Some(err) = self.run_one(&stored, ctx).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dispatch collecting a per-hook outcome instead of an error.
    ///
    /// Used for side-effect hook types (audit logging, post-transfer
    /// bookkeeping) where no failure may abort the caller; failures are
    /// logged and reported in the outcome list.
    pub async fn execute_with_result(
        &self,
        hook_type: HookType,
        ctx: &mut HookContext,
    ) -> Vec<HookOutcome> {
        let hooks = self.matching(hook_type, &ctx.path.clone());
        let mut outcomes = Vec::with_capacity(hooks.len());
        for stored in hooks {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();
            let error = self.run_one(&stored, ctx).await.map(|e| e.to_string());
            outcomes.push(HookOutcome {
                extension: stored.registration.extension.clone(),
                hook: stored.registration.name.clone(),
                hook_type,
                error,
                latency_ms: started.elapsed().as_millis() as u64,
            });
        }
        outcomes
    }
}

/// [`modulith_extension_sdk::HookBus`] implementation over the host
/// dispatcher, injected into every services facade so extensions can fire
/// their own domain hook points (upload, download, login) for others to
/// observe.
pub struct DispatcherBus(pub Arc<HookDispatcher>);

#[async_trait::async_trait]
impl modulith_extension_sdk::HookBus for DispatcherBus {
    async fn dispatch(
        &self,
        hook_type: HookType,
        ctx: &mut HookContext,
    ) -> Result<(), modulith_extension_sdk::ExtensionError> {
        self.0
            .execute(hook_type, ctx)
            .await
            .map_err(|err| modulith_extension_sdk::ExtensionError::hook(err.to_string()))
    }

    async fn fire(&self, hook_type: HookType, ctx: &mut HookContext) {
        let outcomes = self.0.execute_with_result(hook_type, ctx).await;
        for outcome in outcomes.iter().filter(|o| o.error.is_some()) {
            tracing::warn!(
                extension = %outcome.extension,
                hook = %outcome.hook,
                hook_type = %outcome.hook_type,
                error = %outcome.error.as_deref().unwrap_or(""),
                "side-effect hook failed"
            );
        }
    }
}

/// Best-effort extraction of a panic payload message.
pub fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
