//! Migration tracking across all extensions.
//!
//! One shared table, `ext_migrations`, records every applied migration with a
//! checksum of its up-text. The tracker validates the target schema name
//! before any DDL is issued and guarantees `(extension, version)` uniqueness:
//! re-applying a recorded version is a no-op, not an error, so boot is
//! idempotent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use modulith_extension_sdk::schema::{validate_schema_name, Migration};
use modulith_extension_sdk::services::Database;

use crate::host_error::HostError;

/// Schema holding the shared tracking table.
const TRACKING_SCHEMA: &str = "ext_host";

/// DDL for the shared tracking table.
const TRACKING_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS ext_migrations (\
 extension TEXT NOT NULL,\
 version TEXT NOT NULL,\
 description TEXT NOT NULL,\
 applied_at TIMESTAMPTZ NOT NULL,\
 checksum TEXT NOT NULL,\
 UNIQUE (extension, version))";

pub struct MigrationTracker {
    db: Arc<dyn Database>,
    applied: Mutex<HashSet<(String, String)>>,
}

impl MigrationTracker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            applied: Mutex::new(HashSet::new()),
        }
    }

    /// Create the shared tracking table.
    pub async fn ensure_table(&self) -> Result<(), HostError> {
        self.db
            .execute(TRACKING_SCHEMA, TRACKING_TABLE_DDL, vec![])
            .await?;
        Ok(())
    }

    /// Apply one migration inside the extension's schema.
    ///
    /// Returns `true` when the migration ran, `false` when `(extension,
    /// version)` was already recorded.
    pub async fn apply(
        &self,
        extension: &str,
        schema: &str,
        migration: &Migration,
    ) -> Result<bool, HostError> {
        validate_schema_name(schema)?;

        let key = (extension.to_string(), migration.version.clone());
        if self.applied.lock().unwrap().contains(&key) {
            return Ok(false);
        }

        self.db.execute(schema, &migration.up, vec![]).await?;

        let checksum = migration.checksum();
        self.db
            .execute(
                TRACKING_SCHEMA,
                "INSERT INTO ext_migrations (extension, version, description, applied_at, checksum) \
                 VALUES ($1, $2, $3, NOW(), $4)",
                vec![
                    json!(extension),
                    json!(migration.version),
                    json!(migration.description),
                    json!(checksum),
                ],
            )
            .await?;

        self.applied.lock().unwrap().insert(key);
        tracing::info!(
            extension = %extension,
            version = %migration.version,
            checksum = %checksum,
            "migration applied"
        );
        Ok(true)
    }

    /// Apply migrations in order; returns how many actually ran.
    pub async fn apply_all(
        &self,
        extension: &str,
        schema: &str,
        migrations: &[Migration],
    ) -> Result<usize, HostError> {
        let mut ran = 0;
        for migration in migrations {
            if self.apply(extension, schema, migration).await? {
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Versions recorded for one extension, sorted.
    pub fn applied_versions(&self, extension: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .applied
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == extension)
            .map(|(_, v)| v.clone())
            .collect();
        versions.sort_unstable();
        versions
    }
}
