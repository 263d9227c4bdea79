//! Extension-side error types.
//!
//! [`ExtensionError`] is the error surface of extension code itself: lifecycle
//! failures, configuration rejections, hook failures, and storage problems.
//! The host wraps these into its own error taxonomy (with HTTP response
//! mapping) via `#[from]` conversions.

use thiserror::Error;

/// Errors produced by extension code.
///
/// Each variant corresponds to a distinct phase of the extension contract so
/// the host can attribute failures precisely when it rolls back a partially
/// enabled extension or marks it as errored.
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// `initialize` failed; the extension never became ready.
    #[error("initialize failed: {message}")]
    Initialize { message: String },

    /// `start` failed after resources were registered.
    #[error("start failed: {message}")]
    Start { message: String },

    /// `stop` failed during disable; resources are removed regardless.
    #[error("stop failed: {message}")]
    Stop { message: String },

    /// A health probe reported the extension unhealthy.
    #[error("health check failed: {message}")]
    Health { message: String },

    /// Configuration was rejected by `validate_config` or `apply_config`.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A hook handler failed.
    #[error("hook failed: {message}")]
    Hook { message: String },

    /// A database operation issued through the services facade failed.
    #[error("database error: {message}")]
    Database { message: String },

    /// A blob storage operation failed.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// A declared database schema name does not satisfy `^ext_[a-z0-9_]+$`
    /// or exceeds the 63-character limit.
    #[error("invalid schema name: {name}")]
    InvalidSchemaName { name: String },

    /// JSON (de)serialization failure inside extension code.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExtensionError {
    /// Shorthand for a configuration rejection.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a hook failure.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
        }
    }
}
