//! The services facade injected into every extension at `initialize`.
//!
//! Each service is a narrow view onto an external collaborator the host owns:
//! a schema-isolated database handle, a logger that tags records with the
//! extension name, a blob-storage facade, a configuration accessor, an IAM
//! role-check view, and the payment-event sink. Extensions hold the facade
//! for their whole lifetime; all views are cheap to clone and safe to use
//! from any task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ExtensionError;
use crate::events::PaymentEvent;
use crate::hooks::{HookContext, HookType};
use crate::schema::validate_schema_name;

/// Narrow database interface.
///
/// Every call carries the schema it must be scoped to; implementations set
/// the search path (or an equivalent namespace mechanism) before running the
/// statement. Rows come back as JSON objects so the contract stays free of
/// any particular SQL driver.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn execute(
        &self,
        schema: &str,
        statement: &str,
        params: Vec<Value>,
    ) -> Result<u64, ExtensionError>;

    async fn query(
        &self,
        schema: &str,
        statement: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, ExtensionError>;
}

/// Blob storage facade.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ExtensionError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExtensionError>;
    async fn delete(&self, key: &str) -> Result<(), ExtensionError>;
}

/// Role-check view onto the identity service.
#[async_trait::async_trait]
pub trait Iam: Send + Sync {
    async fn roles_of(&self, user_id: &str) -> Vec<String>;

    async fn has_role(&self, user_id: &str, role: &str) -> bool {
        self.roles_of(user_id).await.iter().any(|r| r == role)
    }
}

/// Sink for payment events.
///
/// The provider is a value constructed at host startup and injected here;
/// there is no process-global client. Tests supply a recording fake.
#[async_trait::async_trait]
pub trait PaymentEvents: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> Result<(), ExtensionError>;
}

/// Dispatch access to the host's hook tables.
///
/// Extensions fire their own domain hook points through this bus (e.g. the
/// storage extension fires `BeforeUpload` so other extensions can observe
/// uploads). Registration stays on the `Extension` contract; the bus only
/// dispatches.
#[async_trait::async_trait]
pub trait HookBus: Send + Sync {
    /// Gating dispatch: every matching hook runs, the first failure is
    /// returned.
    async fn dispatch(
        &self,
        hook_type: HookType,
        ctx: &mut HookContext,
    ) -> Result<(), ExtensionError>;

    /// Side-effect dispatch: failures are logged by the host and never
    /// surface to the caller.
    async fn fire(&self, hook_type: HookType, ctx: &mut HookContext);
}

/// Database handle pinned to one extension's schema.
///
/// Constructed by the host from the extension's declared schema name after
/// validation; every statement issued through it is scoped to that schema,
/// which is what keeps one extension out of another's tables.
#[derive(Clone)]
pub struct SchemaDb {
    inner: Arc<dyn Database>,
    schema: String,
}

impl SchemaDb {
    pub fn new(inner: Arc<dyn Database>, schema: &str) -> Result<Self, ExtensionError> {
        validate_schema_name(schema)?;
        Ok(Self {
            inner,
            schema: schema.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn execute(&self, statement: &str, params: Vec<Value>) -> Result<u64, ExtensionError> {
        self.inner.execute(&self.schema, statement, params).await
    }

    pub async fn query(
        &self,
        statement: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, ExtensionError> {
        self.inner.query(&self.schema, statement, params).await
    }
}

/// Logger that tags every record with the owning extension.
#[derive(Clone, Debug)]
pub struct ScopedLogger {
    extension: String,
}

impl ScopedLogger {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(extension = %self.extension, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(extension = %self.extension, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(extension = %self.extension, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(extension = %self.extension, "{message}");
    }
}

/// Read view onto the extension's configuration subtree.
///
/// The host swaps the value on hot reload; readers always see the last
/// successfully applied configuration.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    value: Arc<RwLock<Value>>,
}

impl ConfigHandle {
    pub fn new(initial: Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
        }
    }

    /// Snapshot of the whole subtree.
    pub fn get(&self) -> Value {
        self.value.read().unwrap().clone()
    }

    /// Single top-level key of the subtree.
    pub fn key(&self, key: &str) -> Option<Value> {
        self.value.read().unwrap().get(key).cloned()
    }

    /// Replace the subtree. Host-side use only.
    pub fn replace(&self, value: Value) {
        *self.value.write().unwrap() = value;
    }
}

/// The full facade handed to `Extension::initialize`.
pub struct ExtensionServices {
    extension: String,
    db: SchemaDb,
    logger: ScopedLogger,
    storage: Arc<dyn BlobStore>,
    config: ConfigHandle,
    iam: Arc<dyn Iam>,
    payments: Arc<dyn PaymentEvents>,
    hooks: Arc<dyn HookBus>,
    shutdown: CancellationToken,
}

impl ExtensionServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        extension: impl Into<String>,
        db: SchemaDb,
        storage: Arc<dyn BlobStore>,
        config: ConfigHandle,
        iam: Arc<dyn Iam>,
        payments: Arc<dyn PaymentEvents>,
        hooks: Arc<dyn HookBus>,
        shutdown: CancellationToken,
    ) -> Self {
        let extension = extension.into();
        let logger = ScopedLogger::new(extension.clone());
        Self {
            extension,
            db,
            logger,
            storage,
            config,
            iam,
            payments,
            hooks,
            shutdown,
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn db(&self) -> &SchemaDb {
        &self.db
    }

    pub fn logger(&self) -> &ScopedLogger {
        &self.logger
    }

    pub fn storage(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.storage)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn iam(&self) -> Arc<dyn Iam> {
        Arc::clone(&self.iam)
    }

    pub fn payments(&self) -> Arc<dyn PaymentEvents> {
        Arc::clone(&self.payments)
    }

    pub fn hooks(&self) -> Arc<dyn HookBus> {
        Arc::clone(&self.hooks)
    }

    /// Cancelled when the host shuts down or the extension is disabled;
    /// background work spawned by the extension should observe it.
    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// In-memory reference implementations of the collaborator traits.
///
/// The host wires these in by default so the framework runs self-contained;
/// production deployments substitute real backends behind the same traits.
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    /// Statement-journaling database. Records every statement with its schema
    /// scope; queries return no rows. Sufficient for migration tracking and
    /// for asserting schema isolation in tests.
    #[derive(Default)]
    pub struct MemoryDatabase {
        journal: Mutex<Vec<(String, String)>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        /// `(schema, statement)` pairs in execution order.
        pub fn journal(&self) -> Vec<(String, String)> {
            self.journal.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Database for MemoryDatabase {
        async fn execute(
            &self,
            schema: &str,
            statement: &str,
            _params: Vec<Value>,
        ) -> Result<u64, ExtensionError> {
            self.journal
                .lock()
                .unwrap()
                .push((schema.to_string(), statement.to_string()));
            Ok(0)
        }

        async fn query(
            &self,
            schema: &str,
            statement: &str,
            _params: Vec<Value>,
        ) -> Result<Vec<Value>, ExtensionError> {
            self.journal
                .lock()
                .unwrap()
                .push((schema.to_string(), statement.to_string()));
            Ok(Vec::new())
        }
    }

    /// Heap-backed blob store.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ExtensionError> {
            self.blobs.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExtensionError> {
            Ok(self.blobs.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<(), ExtensionError> {
            self.blobs.lock().unwrap().remove(key);
            Ok(())
        }
    }

    /// Static role table.
    #[derive(Default)]
    pub struct MemoryIam {
        roles: Mutex<HashMap<String, Vec<String>>>,
    }

    impl MemoryIam {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn grant_role(&self, user_id: impl Into<String>, role: impl Into<String>) {
            self.roles
                .lock()
                .unwrap()
                .entry(user_id.into())
                .or_default()
                .push(role.into());
        }
    }

    #[async_trait::async_trait]
    impl Iam for MemoryIam {
        async fn roles_of(&self, user_id: &str) -> Vec<String> {
            self.roles
                .lock()
                .unwrap()
                .get(user_id)
                .cloned()
                .unwrap_or_default()
        }
    }

    /// Hook bus that dispatches to nothing. For facades built outside a
    /// running host.
    #[derive(Default)]
    pub struct NoopHookBus;

    #[async_trait::async_trait]
    impl HookBus for NoopHookBus {
        async fn dispatch(
            &self,
            _hook_type: HookType,
            _ctx: &mut HookContext,
        ) -> Result<(), ExtensionError> {
            Ok(())
        }

        async fn fire(&self, _hook_type: HookType, _ctx: &mut HookContext) {}
    }

    /// Recording payment-event sink for tests.
    #[derive(Default)]
    pub struct RecordingPayments {
        events: Mutex<Vec<PaymentEvent>>,
    }

    impl RecordingPayments {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<PaymentEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PaymentEvents for RecordingPayments {
        async fn publish(&self, event: PaymentEvent) -> Result<(), ExtensionError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}
