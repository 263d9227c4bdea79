//! # Modulith Extension SDK
//!
//! The contract crate for Modulith extensions. An extension is a
//! self-contained unit that plugs routes, middleware, lifecycle hooks,
//! configuration, database schemas, and permissions into a running Modulith
//! host process.
//!
//! ## Overview
//!
//! The SDK provides everything an extension author compiles against:
//!
//! - **`Extension` trait**: metadata, lifecycle (`initialize` / `start` /
//!   `stop` / `health`), resource registration, and configuration callbacks
//! - **Hook types**: the closed set of dispatch points an extension can
//!   attach to, plus the shared [`HookContext`]
//! - **Route and middleware registration**: handler traits and the
//!   [`ExtensionRouter`] collecting builder
//! - **Services facade**: the narrow interfaces the host injects at
//!   `initialize` time (schema-isolated database, scoped logger, blob
//!   storage, IAM view, configuration accessor, payment events)
//! - **Payment event shapes**: the canonical event structs whose field names
//!   external payment plugins match on
//!
//! ## Quick Start
//!
//! ```rust
//! use modulith_extension_sdk::{Extension, ExtensionMetadata, ExtensionRouter};
//!
//! struct HelloExtension;
//!
//! #[async_trait::async_trait]
//! impl Extension for HelloExtension {
//!     fn metadata(&self) -> ExtensionMetadata {
//!         ExtensionMetadata::new("hello", "1.0.0")
//!     }
//!
//!     fn register_routes(&self, router: &mut ExtensionRouter) {
//!         // Routes land under /ext/hello/...
//!     }
//! }
//! ```
//!
//! The host drives every registered extension through an ordered lifecycle
//! and never holds its own locks across calls into extension code. Extensions
//! own their domain tables under an `ext_<name>` schema and must not touch
//! another extension's tables; the [`services::SchemaDb`] handle enforces the
//! schema scope on every statement.

pub mod error;
pub mod events;
pub mod extension;
pub mod hooks;
pub mod metadata;
pub mod routes;
pub mod schema;
pub mod services;

pub use error::ExtensionError;
pub use events::PaymentEvent;
pub use extension::{Extension, Permission, StaticAssetRegistration, TemplateRegistration};
pub use hooks::{HookContext, HookHandler, HookRegistration, HookType};
pub use metadata::ExtensionMetadata;
pub use routes::{
    ExtensionRouter, Middleware, MiddlewareRegistration, RouteHandler, RouteRegistration,
};
pub use services::{ExtensionServices, HookBus};
