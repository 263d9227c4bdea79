//! Construction of the per-extension services facade.
//!
//! The host owns one set of collaborator handles (database, blob store, IAM,
//! payment provider) and cuts a narrow, extension-scoped view from them for
//! every `initialize` call: the database handle is pinned to the extension's
//! schema, the logger tags records with the extension name, and the shutdown
//! token is a child of the host's own token so disabling an extension cancels
//! its background work without touching anyone else's.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use modulith_extension_sdk::services::{
    memory::{MemoryBlobStore, MemoryDatabase, MemoryIam, RecordingPayments},
    BlobStore, ConfigHandle, Database, HookBus, Iam, PaymentEvents, SchemaDb,
};
use modulith_extension_sdk::ExtensionServices;

use crate::host_error::HostError;
use crate::migrations::MigrationTracker;

/// The host's collaborator handles, injected at startup.
pub struct HostServices {
    pub database: Arc<dyn Database>,
    pub blob_store: Arc<dyn BlobStore>,
    pub iam: Arc<dyn Iam>,
    pub payments: Arc<dyn PaymentEvents>,
    pub migrations: MigrationTracker,
}

impl HostServices {
    pub fn new(
        database: Arc<dyn Database>,
        blob_store: Arc<dyn BlobStore>,
        iam: Arc<dyn Iam>,
        payments: Arc<dyn PaymentEvents>,
    ) -> Self {
        let migrations = MigrationTracker::new(Arc::clone(&database));
        Self {
            database,
            blob_store,
            iam,
            payments,
            migrations,
        }
    }

    /// Self-contained in-memory wiring; the default for development and the
    /// test suite. Production wiring substitutes real backends behind the
    /// same traits.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryIam::new()),
            Arc::new(RecordingPayments::new()),
        )
    }

    /// Build the facade for one extension.
    pub fn build_for(
        &self,
        extension: &str,
        schema: &str,
        config: ConfigHandle,
        hooks: Arc<dyn HookBus>,
        shutdown: CancellationToken,
    ) -> Result<Arc<ExtensionServices>, HostError> {
        let db = SchemaDb::new(Arc::clone(&self.database), schema)?;
        Ok(Arc::new(ExtensionServices::new(
            extension,
            db,
            Arc::clone(&self.blob_store),
            config,
            Arc::clone(&self.iam),
            Arc::clone(&self.payments),
            hooks,
            shutdown,
        )))
    }
}
