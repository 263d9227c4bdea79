//! The built-in cloud storage extension.
//!
//! The canonical extension: it exercises every core contract end to end,
//! lifecycle, schema migrations, routes under `/ext/cloud-storage/`, domain
//! hooks (`BeforeUpload` / `AfterUpload` / `BeforeDownload` /
//! `AfterDownload`), configuration apply, permissions, and quotas. Objects
//! form a folder tree; shares grant access directly or by inheritance;
//! uploads pass the ordered quota gate; every transfer lands in the access
//! log.

pub mod access_log;
pub mod quotas;
pub mod shares;

use std::sync::{Arc, RwLock};

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use modulith_extension_sdk::hooks::hook_fn;
use modulith_extension_sdk::routes::route_fn;
use modulith_extension_sdk::schema::Migration;
use modulith_extension_sdk::{
    Extension, ExtensionError, ExtensionMetadata, ExtensionRouter, ExtensionServices,
    HookContext, HookRegistration, HookType, Permission,
};

use crate::host_error::HostError;
use crate::middleware::RequestPrincipal;

use access_log::AccessLogStore;
use quotas::{check_upload_allowed, spawn_usage_update, QuotaStore, RoleQuota};
use shares::{
    generate_share_token, new_share, AccessPrincipal, ObjectStore, PermissionLevel, ShareStore,
    StorageObject,
};

/// Upload body cap, independent of per-user quota limits.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Extension configuration subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageConfig {
    #[serde(default)]
    role_quotas: Vec<RoleQuota>,
}

struct StorageState {
    services: RwLock<Option<Arc<ExtensionServices>>>,
    objects: ObjectStore,
    shares: ShareStore,
    quotas: QuotaStore,
    access_log: AccessLogStore,
}

impl StorageState {
    fn services(&self) -> Result<Arc<ExtensionServices>, HostError> {
        self.services
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| HostError::config("storage extension is not initialized"))
    }

    fn blob_key(&self, object_id: &str) -> String {
        format!("cloud-storage/{object_id}")
    }
}

/// The extension.
pub struct CloudStorageExtension {
    state: Arc<StorageState>,
}

impl CloudStorageExtension {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StorageState {
                services: RwLock::new(None),
                objects: ObjectStore::new(),
                shares: ShareStore::new(),
                quotas: QuotaStore::new(),
                access_log: AccessLogStore::new(),
            }),
        }
    }
}

impl Default for CloudStorageExtension {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Extension for CloudStorageExtension {
    fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata::new("cloud-storage", "1.4.0")
            .with_description("File storage with shares, inheritance, quotas, and access logging")
            .with_author("Modulith Contributors")
            .with_tags(vec!["storage".into(), "shares".into(), "quotas".into()])
    }

    fn database_schema(&self) -> Option<String> {
        Some("ext_cloud_storage".to_string())
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![
            Migration::new(
                "0001",
                "objects table",
                "CREATE TABLE IF NOT EXISTS ext_cloud_storage_objects (\
                 id TEXT PRIMARY KEY, name TEXT NOT NULL, parent_id TEXT,\
                 owner_id TEXT NOT NULL, size_bytes BIGINT NOT NULL,\
                 is_folder BOOLEAN NOT NULL, created_at TIMESTAMPTZ NOT NULL)",
            ),
            Migration::new(
                "0002",
                "shares table",
                "CREATE TABLE IF NOT EXISTS ext_cloud_storage_shares (\
                 id TEXT PRIMARY KEY, object_id TEXT NOT NULL,\
                 shared_with_user_id TEXT, shared_with_email TEXT, share_token TEXT,\
                 permission_level TEXT NOT NULL, inherit_to_children BOOLEAN NOT NULL,\
                 is_public BOOLEAN NOT NULL, expires_at TIMESTAMPTZ,\
                 created_by TEXT NOT NULL, created_at TIMESTAMPTZ NOT NULL,\
                 updated_at TIMESTAMPTZ NOT NULL)",
            ),
            Migration::new(
                "0003",
                "quota tables",
                "CREATE TABLE IF NOT EXISTS ext_cloud_storage_quotas (\
                 user_id TEXT PRIMARY KEY, storage_used_bytes BIGINT NOT NULL,\
                 bandwidth_used_bytes BIGINT NOT NULL, files_count BIGINT NOT NULL,\
                 period_resets_at TIMESTAMPTZ NOT NULL)",
            ),
        ]
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new("storage.read"),
            Permission::new("storage.write"),
            Permission::new("storage.share"),
        ]
    }

    async fn initialize(&self, services: Arc<ExtensionServices>) -> Result<(), ExtensionError> {
        services.logger().info("initializing cloud storage");

        // A permissive default so a fresh host can serve uploads before any
        // role quotas are configured; configuration apply replaces this.
        self.state.quotas.set_role_quota(RoleQuota {
            role: "user".to_string(),
            max_storage_bytes: 10 * 1024 * 1024 * 1024,
            max_bandwidth_bytes: 50 * 1024 * 1024 * 1024,
            max_upload_size_bytes: 512 * 1024 * 1024,
            max_files_count: 100_000,
            allowed_extensions: vec![],
            blocked_extensions: vec!["exe".into(), "bat".into(), "cmd".into()],
        });

        *self.state.services.write().unwrap() = Some(services);
        Ok(())
    }

    async fn start(&self) -> Result<(), ExtensionError> {
        if let Ok(services) = self.state.services() {
            services.logger().info("cloud storage started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ExtensionError> {
        if let Ok(services) = self.state.services() {
            services.logger().info("cloud storage stopping");
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ExtensionError> {
        self.state.services().map(|_| ()).map_err(|_| {
            ExtensionError::Health {
                message: "services facade missing".to_string(),
            }
        })
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role_quotas": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["role", "max_storage_bytes", "max_bandwidth_bytes",
                                     "max_upload_size_bytes", "max_files_count"]
                    }
                }
            }
        })
    }

    fn validate_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        if raw.is_null() {
            return Ok(());
        }
        let config: StorageConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ExtensionError::config(format!("invalid storage config: {e}")))?;
        for quota in &config.role_quotas {
            if quota.role.is_empty() {
                return Err(ExtensionError::config("role quota with empty role name"));
            }
            if quota.max_upload_size_bytes == 0 {
                return Err(ExtensionError::config(format!(
                    "role {} has zero max_upload_size_bytes",
                    quota.role
                )));
            }
        }
        Ok(())
    }

    async fn apply_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        if raw.is_null() {
            return Ok(());
        }
        let config: StorageConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ExtensionError::config(format!("invalid storage config: {e}")))?;
        if !config.role_quotas.is_empty() {
            self.state.quotas.replace_role_quotas(config.role_quotas);
        }
        Ok(())
    }

    fn register_routes(&self, router: &mut ExtensionRouter) {
        let state = Arc::clone(&self.state);
        router.protected_route(
            "/objects",
            vec![Method::POST],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { create_object(state, req).await })
            }),
        );

        let state = Arc::clone(&self.state);
        router.protected_route(
            "/upload",
            vec![Method::POST],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { upload(state, req).await })
            }),
        );

        let state = Arc::clone(&self.state);
        router.route(
            "/download",
            vec![Method::GET],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { download(state, req).await })
            }),
        );

        let state = Arc::clone(&self.state);
        router.protected_route(
            "/shares",
            vec![Method::POST, Method::GET, Method::DELETE],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { shares_endpoint(state, req).await })
            }),
        );

        let state = Arc::clone(&self.state);
        router.protected_route(
            "/usage",
            vec![Method::GET],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { usage(state, req).await })
            }),
        );

        let state = Arc::clone(&self.state);
        router.role_route(
            "/access-log",
            vec![Method::GET],
            vec!["admin".to_string()],
            route_fn(move |req| {
                let state = Arc::clone(&state);
                Box::pin(async move { access_log_endpoint(state, req).await })
            }),
        );
    }

    fn register_hooks(&self) -> Vec<HookRegistration> {
        // Transfer bookkeeping runs as side-effect hooks so other extensions
        // firing the same hook types land in the same access log.
        let state = Arc::clone(&self.state);
        let after_upload = hook_fn(move |ctx: &mut HookContext| {
            let state = Arc::clone(&state);
            Box::pin(async move {
                record_transfer(&state, ctx, "upload");
                Ok(())
            })
        });

        let state = Arc::clone(&self.state);
        let after_download = hook_fn(move |ctx: &mut HookContext| {
            let state = Arc::clone(&state);
            Box::pin(async move {
                record_transfer(&state, ctx, "download");
                Ok(())
            })
        });

        vec![
            HookRegistration::new(
                "cloud-storage",
                "access-log-upload",
                HookType::AfterUpload,
                10,
                after_upload,
            ),
            HookRegistration::new(
                "cloud-storage",
                "access-log-download",
                HookType::AfterDownload,
                10,
                after_download,
            ),
        ]
    }
}

fn record_transfer(state: &StorageState, ctx: &HookContext, action: &str) {
    let object_id: String = ctx.get("object_id").unwrap_or_default();
    let bytes: u64 = ctx.get("file_size").unwrap_or(0);
    let success: bool = ctx.get("success").unwrap_or(true);
    state.access_log.record(
        ctx.user_id.as_deref(),
        &object_id,
        action,
        bytes,
        success,
        ctx.get::<String>("file_name").unwrap_or_default(),
    );
}

// --- handlers -------------------------------------------------------------

fn json_response(status: StatusCode, value: Value) -> Response {
    (status, axum::Json(value)).into_response()
}

fn query_param(req: &Request<Body>, key: &str) -> Option<String> {
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    })
}

fn principal_of(req: &Request<Body>) -> Option<RequestPrincipal> {
    req.extensions().get::<RequestPrincipal>().cloned()
}

async fn create_object(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({"error": "unreadable body"})),
    };

    #[derive(Deserialize)]
    struct CreateObject {
        name: String,
        #[serde(default)]
        parent_id: Option<String>,
        #[serde(default)]
        is_folder: bool,
    }
    let body: CreateObject = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(e) => {
            return json_response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()}))
        }
    };

    if let Some(parent_id) = &body.parent_id {
        match state.objects.get(parent_id) {
            Some(parent) if parent.is_folder => {}
            Some(_) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": "parent is not a folder"}),
                )
            }
            None => {
                return json_response(StatusCode::NOT_FOUND, json!({"error": "parent not found"}))
            }
        }
    }

    let object = StorageObject {
        id: uuid::Uuid::new_v4().to_string(),
        name: body.name,
        parent_id: body.parent_id,
        owner_id: principal.user_id,
        size_bytes: 0,
        is_folder: body.is_folder,
        created_at: Utc::now(),
    };
    state.objects.insert(object.clone());
    json_response(StatusCode::CREATED, json!({ "object": object }))
}

async fn upload(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let services = match state.services() {
        Ok(services) => services,
        Err(err) => return err.into_response(),
    };

    let file_name = match req
        .headers()
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        Some(name) if !name.is_empty() => name,
        _ => {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({"error": "missing X-File-Name header"}),
            )
        }
    };
    let parent_id = query_param(&req, "parent_id");

    let bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({"error": "unreadable body"})),
    };
    let size = bytes.len() as u64;

    // Effective quota of the requester, from their IAM roles.
    let roles = services.iam().roles_of(&principal.user_id).await;
    let now = Utc::now();
    let effective = state.quotas.effective_for(&principal.user_id, &roles, now);
    let usage = state.quotas.usage_of(&principal.user_id, now);

    if let Err(err) = check_upload_allowed(&effective, &usage, size, &file_name) {
        state.access_log.record(
            Some(&principal.user_id),
            "-",
            "upload",
            size,
            false,
            err.to_string(),
        );
        return err.into_response();
    }

    let object = StorageObject {
        id: uuid::Uuid::new_v4().to_string(),
        name: file_name.clone(),
        parent_id,
        owner_id: principal.user_id.clone(),
        size_bytes: size,
        is_folder: false,
        created_at: now,
    };

    // Gating hooks may veto the transfer (virus scanning and friends).
    let mut before = HookContext::new(HookType::BeforeUpload, "/ext/cloud-storage/upload")
        .with_user(principal.user_id.clone());
    before.set("object_id", &object.id);
    before.set("file_name", &file_name);
    before.set("file_size", size);
    if let Err(err) = services.hooks().dispatch(HookType::BeforeUpload, &mut before).await {
        state.access_log.record(
            Some(&principal.user_id),
            &object.id,
            "upload",
            size,
            false,
            err.to_string(),
        );
        return json_response(StatusCode::FORBIDDEN, json!({"error": err.to_string()}));
    }

    if let Err(err) = services
        .storage()
        .put(&state.blob_key(&object.id), bytes.to_vec())
        .await
    {
        return HostError::Extension(err).into_response();
    }
    state.objects.insert(object.clone());

    // Usage bookkeeping is fire-and-forget with a bounded lifetime.
    {
        let quotas = Arc::clone(&state);
        let user_id = principal.user_id.clone();
        spawn_usage_update(services.shutdown(), move || {
            quotas.quotas.record_upload(&user_id, size);
        });
    }

    let mut after = HookContext::new(HookType::AfterUpload, "/ext/cloud-storage/upload")
        .with_user(principal.user_id.clone());
    after.set("object_id", &object.id);
    after.set("file_name", &file_name);
    after.set("file_size", size);
    after.set("success", true);
    services.hooks().fire(HookType::AfterUpload, &mut after).await;

    json_response(StatusCode::CREATED, json!({ "object": object }))
}

async fn download(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(err) => return err.into_response(),
    };

    let Some(object_id) = query_param(&req, "object_id") else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "missing object_id"}),
        );
    };
    let Some(object) = state.objects.get(&object_id) else {
        return json_response(StatusCode::NOT_FOUND, json!({"error": "object not found"}));
    };
    if object.is_folder {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "cannot download a folder"}),
        );
    }

    let principal = principal_of(&req);
    let access_principal = AccessPrincipal {
        user_id: principal.as_ref().map(|p| p.user_id.clone()),
        email: principal.as_ref().and_then(|p| p.email.clone()),
        token: query_param(&req, "token"),
    };

    let now = Utc::now();
    let is_owner = access_principal.user_id.as_deref() == Some(object.owner_id.as_str());
    if !is_owner {
        let level = state
            .shares
            .resolve_access(&state.objects, &object_id, &access_principal, now);
        if level.is_none() {
            let err = if state.shares.has_expired_match(&object_id, &access_principal, now) {
                HostError::ShareExpired
            } else {
                HostError::ShareNotFound
            };
            state.access_log.record(
                access_principal.user_id.as_deref(),
                &object_id,
                "download",
                0,
                false,
                err.to_string(),
            );
            return err.into_response();
        }
    }

    // Bandwidth gate runs against the requester when one is authenticated.
    if let Some(user_id) = &access_principal.user_id {
        let roles = services.iam().roles_of(user_id).await;
        let effective = state.quotas.effective_for(user_id, &roles, now);
        let usage = state.quotas.usage_of(user_id, now);
        if usage.bandwidth_used_bytes + object.size_bytes > effective.max_bandwidth_bytes {
            return HostError::QuotaExceeded {
                resource: "bandwidth".to_string(),
                used: usage.bandwidth_used_bytes,
                max: effective.max_bandwidth_bytes,
            }
            .into_response();
        }
    }

    let mut before = HookContext::new(HookType::BeforeDownload, "/ext/cloud-storage/download");
    before.user_id = access_principal.user_id.clone();
    before.set("object_id", &object_id);
    before.set("file_size", object.size_bytes);
    if let Err(err) = services
        .hooks()
        .dispatch(HookType::BeforeDownload, &mut before)
        .await
    {
        return json_response(StatusCode::FORBIDDEN, json!({"error": err.to_string()}));
    }

    let bytes = match services.storage().get(&state.blob_key(&object_id)).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            return json_response(StatusCode::NOT_FOUND, json!({"error": "blob missing"}))
        }
        Err(err) => return HostError::Extension(err).into_response(),
    };

    // Anonymous link/public downloads bill the owner; authenticated
    // requesters bill themselves.
    {
        let billed = access_principal
            .user_id
            .clone()
            .unwrap_or_else(|| object.owner_id.clone());
        let size = object.size_bytes;
        let quotas = Arc::clone(&state);
        spawn_usage_update(services.shutdown(), move || {
            quotas.quotas.record_download(&billed, size);
        });
    }

    let mut after = HookContext::new(HookType::AfterDownload, "/ext/cloud-storage/download");
    after.user_id = access_principal.user_id.clone();
    after.set("object_id", &object_id);
    after.set("file_name", &object.name);
    after.set("file_size", object.size_bytes);
    after.set("success", true);
    services.hooks().fire(HookType::AfterDownload, &mut after).await;

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", object.name)),
        ],
        bytes,
    )
        .into_response()
}

async fn shares_endpoint(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let method = req.method().clone();
    if method == Method::POST {
        create_share(state, req).await
    } else if method == Method::GET {
        list_shares(state, req).await
    } else if method == Method::DELETE {
        revoke_share(state, req).await
    } else {
        json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({"error": "method not allowed"}),
        )
    }
}

/// Sharing requires owning the object or holding an admin-level share on it.
fn can_manage_shares(state: &StorageState, object: &StorageObject, user_id: &str) -> bool {
    if object.owner_id == user_id {
        return true;
    }
    state.shares.resolve_access(
        &state.objects,
        &object.id,
        &AccessPrincipal::user(user_id),
        Utc::now(),
    ) == Some(PermissionLevel::Admin)
}

async fn create_share(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({"error": "unreadable body"})),
    };

    #[derive(Deserialize)]
    struct CreateShare {
        object_id: String,
        #[serde(default)]
        shared_with_user_id: Option<String>,
        #[serde(default)]
        shared_with_email: Option<String>,
        #[serde(default)]
        generate_token: bool,
        permission_level: PermissionLevel,
        #[serde(default)]
        inherit_to_children: bool,
        #[serde(default)]
        is_public: bool,
        #[serde(default)]
        expires_at: Option<chrono::DateTime<Utc>>,
    }
    let body: CreateShare = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(e) => {
            return json_response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()}))
        }
    };

    let Some(object) = state.objects.get(&body.object_id) else {
        return json_response(StatusCode::NOT_FOUND, json!({"error": "object not found"}));
    };
    if !can_manage_shares(&state, &object, &principal.user_id) {
        return HostError::RoleRequired {
            role: "owner|admin-share".to_string(),
        }
        .into_response();
    }

    let mut share = new_share(&body.object_id, &principal.user_id, body.permission_level);
    share.shared_with_user_id = body.shared_with_user_id;
    share.shared_with_email = body.shared_with_email;
    share.inherit_to_children = body.inherit_to_children;
    share.is_public = body.is_public;
    share.expires_at = body.expires_at;
    if body.generate_token {
        share.share_token = Some(generate_share_token());
    }

    if let Err(err) = state.shares.insert(share.clone()) {
        return err.into_response();
    }
    state.access_log.record(
        Some(&principal.user_id),
        &body.object_id,
        "share_created",
        0,
        true,
        share.permission_level.as_str(),
    );
    json_response(StatusCode::CREATED, json!({ "share": share }))
}

async fn list_shares(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let Some(object_id) = query_param(&req, "object_id") else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "missing object_id"}),
        );
    };
    let Some(object) = state.objects.get(&object_id) else {
        return json_response(StatusCode::NOT_FOUND, json!({"error": "object not found"}));
    };
    if !can_manage_shares(&state, &object, &principal.user_id) {
        return HostError::RoleRequired {
            role: "owner|admin-share".to_string(),
        }
        .into_response();
    }
    json_response(
        StatusCode::OK,
        json!({ "shares": state.shares.for_object(&object_id) }),
    )
}

async fn revoke_share(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let Some(share_id) = query_param(&req, "id") else {
        return json_response(StatusCode::BAD_REQUEST, json!({"error": "missing id"}));
    };
    let Some(share) = state.shares.get(&share_id) else {
        return HostError::ShareNotFound.into_response();
    };
    let Some(object) = state.objects.get(&share.object_id) else {
        return json_response(StatusCode::NOT_FOUND, json!({"error": "object not found"}));
    };
    if share.created_by != principal.user_id
        && !can_manage_shares(&state, &object, &principal.user_id)
    {
        return HostError::RoleRequired {
            role: "owner|admin-share".to_string(),
        }
        .into_response();
    }

    match state.shares.remove(&share_id) {
        Ok(removed) => {
            state.access_log.record(
                Some(&principal.user_id),
                &removed.object_id,
                "share_revoked",
                0,
                true,
                "",
            );
            json_response(StatusCode::OK, json!({ "revoked": removed.id }))
        }
        Err(err) => err.into_response(),
    }
}

async fn usage(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let Some(principal) = principal_of(&req) else {
        return HostError::Unauthorized.into_response();
    };
    let services = match state.services() {
        Ok(services) => services,
        Err(err) => return err.into_response(),
    };
    let now = Utc::now();
    let roles = services.iam().roles_of(&principal.user_id).await;
    let effective = state.quotas.effective_for(&principal.user_id, &roles, now);
    let usage = state.quotas.usage_of(&principal.user_id, now);
    json_response(
        StatusCode::OK,
        json!({ "effective": effective, "usage": usage }),
    )
}

async fn access_log_endpoint(state: Arc<StorageState>, req: Request<Body>) -> Response {
    let limit = query_param(&req, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100usize);
    let user = query_param(&req, "user_id");
    json_response(
        StatusCode::OK,
        json!({ "entries": state.access_log.recent(user.as_deref(), limit) }),
    )
}
