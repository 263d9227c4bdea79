// Share inheritance, expiry, and link tokens, end to end through the
// storage extension's HTTP surface.
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use modulith_host::storage::CloudStorageExtension;

use crate::helpers::{bearer, new_registry_with_iam, server};

async fn storage_server() -> (TestServer, Arc<modulith_host::registry::ExtensionRegistry>) {
    let (registry, iam) = new_registry_with_iam();
    iam.grant_role("owner", "user");
    iam.grant_role("reader", "user");
    registry
        .register(Arc::new(CloudStorageExtension::new()))
        .await
        .unwrap();
    registry.enable("cloud-storage").await.unwrap();
    (server(&registry), registry)
}

async fn create_object(
    server: &TestServer,
    user: &str,
    name: &str,
    parent_id: Option<&str>,
    is_folder: bool,
) -> String {
    let response = server
        .post("/ext/cloud-storage/objects")
        .add_header("Authorization", bearer(user, &["user"]))
        .json(&json!({
            "name": name,
            "parent_id": parent_id,
            "is_folder": is_folder,
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()["object"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn upload_file(server: &TestServer, user: &str, name: &str, parent_id: &str) -> String {
    let response = server
        .post(&format!("/ext/cloud-storage/upload?parent_id={parent_id}"))
        .add_header("Authorization", bearer(user, &["user"]))
        .add_header("X-File-Name", name)
        .bytes(b"file-content".to_vec().into())
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()["object"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn share(server: &TestServer, user: &str, body: Value) -> Value {
    let response = server
        .post("/ext/cloud-storage/shares")
        .add_header("Authorization", bearer(user, &["user"]))
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()["share"].clone()
}

#[tokio::test]
async fn closest_ancestor_share_grants_access_to_descendants() {
    let (server, _registry) = storage_server().await;

    let root = create_object(&server, "owner", "root", None, true).await;
    let sub = create_object(&server, "owner", "sub", Some(&root), true).await;
    let file = upload_file(&server, "owner", "f.txt", &sub).await;

    // root shared at view with inheritance, sub at edit with inheritance.
    share(
        &server,
        "owner",
        json!({
            "object_id": root,
            "shared_with_user_id": "reader",
            "permission_level": "view",
            "inherit_to_children": true,
        }),
    )
    .await;
    share(
        &server,
        "owner",
        json!({
            "object_id": sub,
            "shared_with_user_id": "reader",
            "permission_level": "edit",
            "inherit_to_children": true,
        }),
    )
    .await;

    // The file has no direct share; inheritance lets the reader in.
    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("reader", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().as_ref(), b"file-content".as_slice());

    // A stranger stays out.
    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("stranger", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_inheriting_share_does_not_reach_children() {
    let (server, _registry) = storage_server().await;

    let root = create_object(&server, "owner", "root", None, true).await;
    let file = upload_file(&server, "owner", "a.txt", &root).await;

    share(
        &server,
        "owner",
        json!({
            "object_id": root,
            "shared_with_user_id": "reader",
            "permission_level": "view",
            "inherit_to_children": false,
        }),
    )
    .await;

    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("reader", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>()["error"]["type"],
        "share_not_found"
    );
}

#[tokio::test]
async fn expired_share_grants_no_access() {
    let (server, _registry) = storage_server().await;

    let root = create_object(&server, "owner", "root", None, true).await;
    let file = upload_file(&server, "owner", "doc.txt", &root).await;

    share(
        &server,
        "owner",
        json!({
            "object_id": file,
            "shared_with_user_id": "reader",
            "permission_level": "admin",
            "expires_at": (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
        }),
    )
    .await;

    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("reader", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error"]["type"], "share_expired");
}

#[tokio::test]
async fn link_tokens_and_public_shares_work_without_authentication() {
    let (server, _registry) = storage_server().await;

    let root = create_object(&server, "owner", "root", None, true).await;
    let file = upload_file(&server, "owner", "shared.txt", &root).await;

    let token_share = share(
        &server,
        "owner",
        json!({
            "object_id": file,
            "generate_token": true,
            "permission_level": "view",
        }),
    )
    .await;
    let token = token_share["share_token"].as_str().unwrap();

    // Anonymous download with the link token.
    let response = server
        .get(&format!(
            "/ext/cloud-storage/download?object_id={file}&token={token}"
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Wrong token: no access.
    let response = server
        .get(&format!(
            "/ext/cloud-storage/download?object_id={file}&token=wrong"
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // Public share on another file: anyone may read.
    let open = upload_file(&server, "owner", "open.txt", &root).await;
    share(
        &server,
        "owner",
        json!({
            "object_id": open,
            "is_public": true,
            "permission_level": "view",
        }),
    )
    .await;
    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={open}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn share_with_two_principals_is_invalid() {
    let (server, _registry) = storage_server().await;
    let root = create_object(&server, "owner", "root", None, true).await;

    let response = server
        .post("/ext/cloud-storage/shares")
        .add_header("Authorization", bearer("owner", &["user"]))
        .json(&json!({
            "object_id": root,
            "shared_with_user_id": "reader",
            "shared_with_email": "reader@example.com",
            "permission_level": "view",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["type"], "invalid_share");
}

#[tokio::test]
async fn only_owners_and_admin_level_shares_manage_sharing() {
    let (server, _registry) = storage_server().await;
    let root = create_object(&server, "owner", "root", None, true).await;

    // A viewer cannot create shares on someone else's object.
    let response = server
        .post("/ext/cloud-storage/shares")
        .add_header("Authorization", bearer("reader", &["user"]))
        .json(&json!({
            "object_id": root,
            "shared_with_user_id": "third",
            "permission_level": "view",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    // Granting the reader an admin-level share delegates share management.
    share(
        &server,
        "owner",
        json!({
            "object_id": root,
            "shared_with_user_id": "reader",
            "permission_level": "admin",
        }),
    )
    .await;
    let response = server
        .post("/ext/cloud-storage/shares")
        .add_header("Authorization", bearer("reader", &["user"]))
        .json(&json!({
            "object_id": root,
            "shared_with_user_id": "third",
            "permission_level": "view",
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
}

#[tokio::test]
async fn revoking_a_share_removes_access() {
    let (server, _registry) = storage_server().await;
    let root = create_object(&server, "owner", "root", None, true).await;
    let file = upload_file(&server, "owner", "f.txt", &root).await;

    let created = share(
        &server,
        "owner",
        json!({
            "object_id": file,
            "shared_with_user_id": "reader",
            "permission_level": "view",
        }),
    )
    .await;
    let share_id = created["id"].as_str().unwrap();

    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("reader", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = server
        .delete(&format!("/ext/cloud-storage/shares?id={share_id}"))
        .add_header("Authorization", bearer("owner", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = server
        .get(&format!("/ext/cloud-storage/download?object_id={file}"))
        .add_header("Authorization", bearer("reader", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // Revoking twice is ShareNotFound.
    let response = server
        .delete(&format!("/ext/cloud-storage/shares?id={share_id}"))
        .add_header("Authorization", bearer("owner", &["user"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
