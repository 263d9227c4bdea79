//! Host configuration.
//!
//! The configuration file is YAML or JSON; loading tries YAML first and
//! falls back to JSON. Unknown top-level keys are preserved across a
//! round-trip so foreign tooling can stash data next to ours. Per-extension
//! configuration lives in the `config` map keyed by extension name;
//! `enabled` drives boot-time enablement; `loadOrder` is advisory only, and the
//! dependency resolver's output is authoritative.
//!
//! Environment overrides follow the same pattern as the rest of the stack:
//! explicit variables, validated values, never silent fallbacks.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host_error::HostError;

/// Default admin JWT secret; rejected by validation when auth is enabled.
const DEFAULT_JWT_SECRET: &str = "modulith-dev-secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout_secs: default_timeout_secs(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec![],
        }
    }
}

/// Management-surface authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
        }
    }
}

/// The host configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Which extensions to enable at boot.
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,

    /// Per-extension configuration subtrees, keyed by extension name.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Build tags, advisory.
    #[serde(default, rename = "buildTags")]
    pub build_tags: Vec<String>,

    /// Advisory ordering hint; the resolver's output is authoritative.
    #[serde(default, rename = "loadOrder")]
    pub load_order: Vec<String>,

    /// Unknown top-level keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl HostConfig {
    /// Parse configuration bytes: YAML first, JSON as the fallback.
    pub fn parse(content: &str) -> Result<Self, HostError> {
        match serde_yaml::from_str::<HostConfig>(content) {
            Ok(config) => Ok(config),
            Err(yaml_err) => serde_json::from_str::<HostConfig>(content).map_err(|json_err| {
                HostError::config(format!(
                    "configuration is neither valid YAML ({yaml_err}) nor valid JSON ({json_err})"
                ))
            }),
        }
    }

    /// Load from a file, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HostError::config(format!("cannot read configuration file: {e}")))?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `MODULITH_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), HostError> {
        if let Ok(host) = env::var("MODULITH_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = env::var("MODULITH_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| HostError::config(format!("invalid MODULITH_PORT: {port}")))?;
            if port > 0 {
                self.server.port = port;
            }
        }
        if let Ok(enabled) = env::var("MODULITH_AUTH_ENABLED") {
            self.auth.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(secret) = env::var("MODULITH_ADMIN_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.server.host.is_empty() {
            return Err(HostError::config("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(HostError::config("server port must be between 1 and 65535"));
        }
        if self.server.timeout_secs == 0 {
            return Err(HostError::config("server timeout cannot be 0"));
        }
        if self.auth.enabled && self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(HostError::config(
                "insecure admin JWT secret; set MODULITH_ADMIN_JWT_SECRET when auth is enabled",
            ));
        }
        if self.server.cors.enabled && self.server.cors.allowed_origins.is_empty() {
            return Err(HostError::config(
                "CORS enabled but no allowed origins specified",
            ));
        }
        Ok(())
    }

    /// The configuration subtree for one extension; `null` when absent.
    pub fn extension_config(&self, name: &str) -> Value {
        self.config.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Whether the extension should be enabled at boot.
    pub fn extension_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }
}
