//! Database schema naming and migration primitives.
//!
//! Every extension owns exactly one schema, `ext_<lowercase-name>`, and all
//! DDL is validated against the naming rule before it ever reaches the
//! database. Migrations carry a checksum of their up-text so a shared
//! tracking table can detect drift later.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ExtensionError;

/// Hard cap shared with common SQL identifier limits.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Validate a schema name against `^ext_[a-z0-9_]+$` and the length limit.
pub fn validate_schema_name(name: &str) -> Result<(), ExtensionError> {
    let invalid = || ExtensionError::InvalidSchemaName {
        name: name.to_string(),
    };

    if name.len() > MAX_SCHEMA_NAME_LEN {
        return Err(invalid());
    }
    let Some(rest) = name.strip_prefix("ext_") else {
        return Err(invalid());
    };
    if rest.is_empty() {
        return Err(invalid());
    }
    if !rest
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Canonical schema name for an extension.
pub fn schema_for(extension: &str) -> String {
    let sanitized: String = extension
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("ext_{sanitized}")
}

/// One schema migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    /// Monotonic version within the extension, e.g. `0001`.
    pub version: String,
    pub description: String,
    /// The up-SQL, run with the extension's schema as search path.
    pub up: String,
}

impl Migration {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        up: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            up: up.into(),
        }
    }

    /// SHA-256 over the up-text, hex encoded. Recorded at apply time; future
    /// integrity checks compare against it.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.up.as_bytes());
        hex::encode(hasher.finalize())
    }
}
