//! Share records and the inheritance resolver.
//!
//! A share grants a principal (user id, email, or link token; exactly one,
//! or none for a public share) a permission level on one object. Folders can
//! share downward: a share with `inherit_to_children` covers every
//! descendant. Resolution walks the parent chain iteratively, at most
//! [`MAX_INHERIT_DEPTH`] levels, which also bounds corrupted (cyclic) parent
//! chains. The closest ancestor wins; ties at one depth take the highest
//! level.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::host_error::HostError;

/// Ancestor-walk bound. Deep trees beyond this stop inheriting; cycles in a
/// corrupted parent chain terminate here instead of hanging.
pub const MAX_INHERIT_DEPTH: usize = 20;

/// Totally ordered permission levels: `view < edit < admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    View,
    Edit,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::View => "view",
            PermissionLevel::Edit => "edit",
            PermissionLevel::Admin => "admin",
        }
    }
}

/// A stored object: file or folder. `parent_id` forms the folder tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObject {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub owner_id: String,
    pub size_bytes: u64,
    pub is_folder: bool,
    pub created_at: DateTime<Utc>,
}

/// One share row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: String,
    pub object_id: String,
    pub shared_with_user_id: Option<String>,
    pub shared_with_email: Option<String>,
    pub share_token: Option<String>,
    pub permission_level: PermissionLevel,
    pub inherit_to_children: bool,
    pub is_public: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShareRecord {
    /// Exactly one principal must be set (user id, email, or token) unless
    /// the share is public, which matches any caller and carries none.
    pub fn validate(&self) -> Result<(), HostError> {
        let principals = [
            self.shared_with_user_id.is_some(),
            self.shared_with_email.is_some(),
            self.share_token.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        let valid = if self.is_public {
            principals == 0
        } else {
            principals == 1
        };
        if valid {
            Ok(())
        } else {
            Err(HostError::InvalidShare)
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, principal: &AccessPrincipal) -> bool {
        if self.is_public {
            return true;
        }
        if let (Some(shared), Some(caller)) = (&self.shared_with_user_id, &principal.user_id) {
            if shared == caller {
                return true;
            }
        }
        if let (Some(shared), Some(caller)) = (&self.shared_with_email, &principal.email) {
            if shared.eq_ignore_ascii_case(caller) {
                return true;
            }
        }
        if let (Some(shared), Some(caller)) = (&self.share_token, &principal.token) {
            if shared == caller {
                return true;
            }
        }
        false
    }
}

/// The requesting principal. All fields empty means anonymous; anonymous
/// callers only match public shares.
#[derive(Debug, Clone, Default)]
pub struct AccessPrincipal {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub token: Option<String>,
}

impl AccessPrincipal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }
}

/// URL-safe random link token.
pub fn generate_share_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// In-memory object table.
#[derive(Default)]
pub struct ObjectStore {
    objects: RwLock<HashMap<String, StorageObject>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, object: StorageObject) {
        self.objects.write().unwrap().insert(object.id.clone(), object);
    }

    pub fn get(&self, id: &str) -> Option<StorageObject> {
        self.objects.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<StorageObject> {
        self.objects.write().unwrap().remove(id)
    }

    pub fn list_children(&self, parent_id: Option<&str>) -> Vec<StorageObject> {
        let mut children: Vec<StorageObject> = self
            .objects
            .read()
            .unwrap()
            .values()
            .filter(|o| o.parent_id.as_deref() == parent_id)
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }
}

/// In-memory share table with the inheritance resolver.
#[derive(Default)]
pub struct ShareStore {
    shares: RwLock<HashMap<String, ShareRecord>>,
}

impl ShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, share: ShareRecord) -> Result<(), HostError> {
        share.validate()?;
        self.shares.write().unwrap().insert(share.id.clone(), share);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ShareRecord> {
        self.shares.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Result<ShareRecord, HostError> {
        self.shares
            .write()
            .unwrap()
            .remove(id)
            .ok_or(HostError::ShareNotFound)
    }

    pub fn for_object(&self, object_id: &str) -> Vec<ShareRecord> {
        let mut shares: Vec<ShareRecord> = self
            .shares
            .read()
            .unwrap()
            .values()
            .filter(|s| s.object_id == object_id)
            .cloned()
            .collect();
        shares.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        shares
    }

    /// Resolve the principal's access to `object_id`.
    ///
    /// 1. A matching, non-expired share on the object itself wins at its
    ///    level (several matches take the highest).
    /// 2. Otherwise the closest ancestor with a matching, non-expired,
    ///    inheriting share wins; same-depth ties take the highest level.
    /// 3. Otherwise no access.
    pub fn resolve_access(
        &self,
        objects: &ObjectStore,
        object_id: &str,
        principal: &AccessPrincipal,
        now: DateTime<Utc>,
    ) -> Option<PermissionLevel> {
        let direct = self.best_match(object_id, principal, now, false);
        if direct.is_some() {
            return direct;
        }

        let mut current = objects.get(object_id)?.parent_id;
        for _ in 0..MAX_INHERIT_DEPTH {
            let ancestor_id = current?;
            if let Some(level) = self.best_match(&ancestor_id, principal, now, true) {
                return Some(level);
            }
            current = objects.get(&ancestor_id)?.parent_id;
        }
        None
    }

    /// Whether a direct share on the object would have matched the principal
    /// but has expired. Used to distinguish "expired" from "never shared" in
    /// error reporting; inherited shares are not consulted.
    pub fn has_expired_match(
        &self,
        object_id: &str,
        principal: &AccessPrincipal,
        now: DateTime<Utc>,
    ) -> bool {
        self.shares
            .read()
            .unwrap()
            .values()
            .filter(|s| s.object_id == object_id)
            .any(|s| s.is_expired_at(now) && s.matches(principal))
    }

    fn best_match(
        &self,
        object_id: &str,
        principal: &AccessPrincipal,
        now: DateTime<Utc>,
        require_inherit: bool,
    ) -> Option<PermissionLevel> {
        self.shares
            .read()
            .unwrap()
            .values()
            .filter(|s| s.object_id == object_id)
            .filter(|s| !require_inherit || s.inherit_to_children)
            .filter(|s| !s.is_expired_at(now))
            .filter(|s| s.matches(principal))
            .map(|s| s.permission_level)
            .max()
    }
}

/// Builder for share rows.
pub fn new_share(
    object_id: impl Into<String>,
    created_by: impl Into<String>,
    permission_level: PermissionLevel,
) -> ShareRecord {
    let now = Utc::now();
    ShareRecord {
        id: uuid::Uuid::new_v4().to_string(),
        object_id: object_id.into(),
        shared_with_user_id: None,
        shared_with_email: None,
        share_token: None,
        permission_level,
        inherit_to_children: false,
        is_public: false,
        expires_at: None,
        created_by: created_by.into(),
        created_at: now,
        updated_at: now,
    }
}
