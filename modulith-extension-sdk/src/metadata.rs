//! Extension metadata and host-version compatibility.

use serde::{Deserialize, Serialize};

/// Immutable description of an extension.
///
/// The host never mutates metadata after registration; runtime state lives in
/// the registry's own status records. `dependencies` name other extensions by
/// their unique `name` and feed the dependency resolver: a cycle among
/// registered extensions is rejected at registration time, while an edge to a
/// not-yet-registered name stays pending and is rejected when the load order
/// is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    /// Unique extension name. Also determines the route prefix
    /// (`/ext/<name>`) and the database schema (`ext_<name>`).
    pub name: String,
    /// Version string. Compared lexically; see [`ExtensionMetadata::is_compatible_with`].
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Author or vendor.
    pub author: String,
    /// Names of extensions that must be enabled before this one.
    pub dependencies: Vec<String>,
    /// Minimum host version this extension supports (inclusive).
    pub min_host_version: Option<String>,
    /// Maximum host version this extension supports (inclusive).
    pub max_host_version: Option<String>,
    /// Free-form tags for discovery and filtering.
    pub tags: Vec<String>,
}

impl ExtensionMetadata {
    /// Create metadata with the given name and version and empty everything
    /// else.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            dependencies: Vec::new(),
            min_host_version: None,
            max_host_version: None,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_host_versions(
        mut self,
        min: Option<impl Into<String>>,
        max: Option<impl Into<String>>,
    ) -> Self {
        self.min_host_version = min.map(Into::into);
        self.max_host_version = max.map(Into::into);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether the given host version falls inside this extension's declared
    /// `[min_host_version, max_host_version]` window.
    ///
    /// Versions are opaque strings and the comparison is lexicographic.
    /// Callers wanting semantic-version ordering must encode it into the
    /// strings themselves (e.g. zero-padded components).
    pub fn is_compatible_with(&self, host_version: &str) -> bool {
        if let Some(min) = &self.min_host_version {
            if host_version < min.as_str() {
                return false;
            }
        }
        if let Some(max) = &self.max_host_version {
            if host_version > max.as_str() {
                return false;
            }
        }
        true
    }
}
