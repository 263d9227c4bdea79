//! Host error taxonomy.
//!
//! Every failure mode of the runtime is a distinct variant so callers can
//! recover programmatically instead of parsing strings. The `IntoResponse`
//! impl maps the taxonomy onto HTTP for the management surface and the
//! extension dispatch path: rate limits surface as 429, quota exhaustion as
//! 402, permission and file-type rejections as 403.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use modulith_extension_sdk::{ExtensionError, HookType};

/// Errors raised by the host runtime.
#[derive(Error, Debug)]
pub enum HostError {
    /// An extension with this name is already registered.
    #[error("extension already registered: {0}")]
    AlreadyRegistered(String),

    /// No extension with this name is known to the registry.
    #[error("extension not found: {0}")]
    NotFound(String),

    /// The host version is outside the extension's declared window.
    #[error("extension {name} is incompatible with host version {host_version}")]
    Incompatible { name: String, host_version: String },

    /// The dependency graph contains a cycle closed at `{0}`.
    #[error("dependency cycle detected at extension: {0}")]
    CycleDetected(String),

    /// `{from}` depends on `{to}`, which is not registered.
    #[error("missing dependency: {from} requires {to}")]
    MissingDependency { from: String, to: String },

    /// A currently-enabled extension still depends on the one being disabled.
    #[error("extension {name} is required by enabled extensions: {}", dependents.join(", "))]
    RequiredByDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// The operation is not legal in the extension's current state.
    #[error("extension {name} is {state}; cannot {operation}")]
    InvalidState {
        name: String,
        state: String,
        operation: String,
    },

    /// `initialize` failed during enable; resources were rolled back.
    #[error("initialize failed for {name}")]
    InitializeFailed {
        name: String,
        #[source]
        cause: ExtensionError,
    },

    /// `start` failed during enable; resources were rolled back.
    #[error("start failed for {name}")]
    StartFailed {
        name: String,
        #[source]
        cause: ExtensionError,
    },

    /// A hook handler failed. Dispatch continues past the failure; this is
    /// the first failure of the dispatch.
    #[error("hook {hook} of {extension} failed during {hook_type}")]
    HookExecution {
        extension: String,
        hook: String,
        hook_type: HookType,
        #[source]
        cause: ExtensionError,
    },

    /// Extension code panicked inside a barrier.
    #[error("extension {extension} panicked: {message}")]
    PanicRecovered { extension: String, message: String },

    /// A resource or storage quota would be exceeded.
    #[error("quota exceeded for {resource}: {used} used of {max}")]
    QuotaExceeded { resource: String, used: u64, max: u64 },

    /// The extension's token bucket is empty.
    #[error("rate limit exceeded for extension {extension}")]
    RateLimited { extension: String },

    /// The file's extension appears on the effective blocked list.
    #[error("file type is blocked: .{file_type}")]
    FileTypeBlocked { file_type: String },

    /// An allowed-list is in force and the file's extension is not on it.
    #[error("file type is not allowed: .{file_type}")]
    FileTypeNotAllowed { file_type: String },

    /// A share must carry exactly one principal.
    #[error("share must have exactly one of user id, email, or token")]
    InvalidShare,

    /// The share matched but its expiry has passed.
    #[error("share has expired")]
    ShareExpired,

    /// No such share.
    #[error("share not found")]
    ShareNotFound,

    /// The extension lacks a required permission.
    #[error("extension {extension} lacks permission {permission}")]
    PermissionDenied {
        extension: String,
        permission: String,
    },

    /// The request carries no authenticated principal.
    #[error("authentication required")]
    Unauthorized,

    /// The principal lacks a required role.
    #[error("role required: {role}")]
    RoleRequired { role: String },

    /// Host configuration is invalid.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An extension-side failure outside the enable path.
    #[error("extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HostError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            HostError::AlreadyRegistered(_) => (StatusCode::CONFLICT, "already_registered"),
            HostError::NotFound(_) => (StatusCode::NOT_FOUND, "extension_not_found"),
            HostError::Incompatible { .. } => (StatusCode::BAD_REQUEST, "incompatible_version"),
            HostError::CycleDetected(_) => (StatusCode::BAD_REQUEST, "dependency_cycle"),
            HostError::MissingDependency { .. } => (StatusCode::BAD_REQUEST, "missing_dependency"),
            HostError::RequiredByDependents { .. } => (StatusCode::CONFLICT, "required_by_dependents"),
            HostError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
            HostError::InitializeFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "initialize_failed")
            }
            HostError::StartFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "start_failed"),
            HostError::HookExecution { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "hook_execution_error")
            }
            HostError::PanicRecovered { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "panic_recovered")
            }
            HostError::QuotaExceeded { .. } => (StatusCode::PAYMENT_REQUIRED, "quota_exceeded"),
            HostError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            HostError::FileTypeBlocked { .. } => (StatusCode::FORBIDDEN, "file_type_blocked"),
            HostError::FileTypeNotAllowed { .. } => {
                (StatusCode::FORBIDDEN, "file_type_not_allowed")
            }
            HostError::InvalidShare => (StatusCode::BAD_REQUEST, "invalid_share"),
            HostError::ShareExpired => (StatusCode::FORBIDDEN, "share_expired"),
            HostError::ShareNotFound => (StatusCode::NOT_FOUND, "share_not_found"),
            HostError::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "permission_denied"),
            HostError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication_error"),
            HostError::RoleRequired { .. } => (StatusCode::FORBIDDEN, "role_required"),
            HostError::Config { .. } => (StatusCode::BAD_REQUEST, "configuration_error"),
            HostError::Extension(ExtensionError::InvalidSchemaName { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_schema_name")
            }
            HostError::Extension(_) => (StatusCode::INTERNAL_SERVER_ERROR, "extension_error"),
            HostError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
        }
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16()
            }
        }));
        (status, body).into_response()
    }
}
