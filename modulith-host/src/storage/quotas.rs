//! Three-layer effective quotas and the upload gate.
//!
//! A user's effective quota combines: the field-wise maximum over the quotas
//! of every role they hold, then any per-user override (set fields replace,
//! unset fields leave the role-derived value alone). Extension lists merge
//! differently: allowed lists by union, blocked lists by intersection. A
//! file type is blocked only when every role blocks it. Usage counters are
//! monotonic within a period and reset at the period boundary.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::host_error::HostError;

/// Bound on the fire-and-forget usage update tasks.
pub const USAGE_UPDATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-role quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleQuota {
    pub role: String,
    pub max_storage_bytes: u64,
    pub max_bandwidth_bytes: u64,
    pub max_upload_size_bytes: u64,
    pub max_files_count: u64,
    /// Empty means no allow-list restriction.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub blocked_extensions: Vec<String>,
}

/// Optional per-user override. Set fields replace the role-derived value;
/// `None` leaves it alone. Expired overrides are ignored entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserQuotaOverride {
    pub user_id: String,
    pub max_storage_bytes: Option<u64>,
    pub max_bandwidth_bytes: Option<u64>,
    pub max_upload_size_bytes: Option<u64>,
    pub max_files_count: Option<u64>,
    pub allowed_extensions: Option<Vec<String>>,
    pub blocked_extensions: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// The quota a user actually gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveQuota {
    pub max_storage_bytes: u64,
    pub max_bandwidth_bytes: u64,
    pub max_upload_size_bytes: u64,
    pub max_files_count: u64,
    pub allowed_extensions: Vec<String>,
    pub blocked_extensions: Vec<String>,
}

/// Running usage counters; monotonic within a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageQuota {
    pub user_id: String,
    pub storage_used_bytes: u64,
    pub bandwidth_used_bytes: u64,
    pub files_count: u64,
    pub period_resets_at: DateTime<Utc>,
}

impl StorageQuota {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            storage_used_bytes: 0,
            bandwidth_used_bytes: 0,
            files_count: 0,
            period_resets_at: now + chrono::Duration::days(30),
        }
    }

    /// Bandwidth resets at the period boundary; stored bytes and file counts
    /// persist across periods.
    fn roll_period_if_elapsed(&mut self, now: DateTime<Utc>) {
        if now >= self.period_resets_at {
            self.bandwidth_used_bytes = 0;
            self.period_resets_at = now + chrono::Duration::days(30);
        }
    }
}

/// Combine role quotas and an optional override into the effective quota.
pub fn effective_quota(
    role_quotas: &[RoleQuota],
    user_override: Option<&UserQuotaOverride>,
    now: DateTime<Utc>,
) -> EffectiveQuota {
    let mut effective = EffectiveQuota {
        max_storage_bytes: 0,
        max_bandwidth_bytes: 0,
        max_upload_size_bytes: 0,
        max_files_count: 0,
        allowed_extensions: Vec::new(),
        blocked_extensions: Vec::new(),
    };

    for (i, quota) in role_quotas.iter().enumerate() {
        effective.max_storage_bytes = effective.max_storage_bytes.max(quota.max_storage_bytes);
        effective.max_bandwidth_bytes =
            effective.max_bandwidth_bytes.max(quota.max_bandwidth_bytes);
        effective.max_upload_size_bytes = effective
            .max_upload_size_bytes
            .max(quota.max_upload_size_bytes);
        effective.max_files_count = effective.max_files_count.max(quota.max_files_count);

        // Allowed lists merge by union, blocked lists by intersection: a type
        // is blocked only when every role blocks it.
        for ext in &quota.allowed_extensions {
            let ext = ext.to_ascii_lowercase();
            if !effective.allowed_extensions.contains(&ext) {
                effective.allowed_extensions.push(ext);
            }
        }
        let blocked: Vec<String> = quota
            .blocked_extensions
            .iter()
            .map(|e| e.to_ascii_lowercase())
            .collect();
        if i == 0 {
            effective.blocked_extensions = blocked;
        } else {
            effective.blocked_extensions.retain(|e| blocked.contains(e));
        }
    }
    effective.allowed_extensions.sort_unstable();
    effective.blocked_extensions.sort_unstable();

    if let Some(user_override) = user_override {
        let expired = user_override.expires_at.is_some_and(|at| at <= now);
        if !expired {
            if let Some(v) = user_override.max_storage_bytes {
                effective.max_storage_bytes = v;
            }
            if let Some(v) = user_override.max_bandwidth_bytes {
                effective.max_bandwidth_bytes = v;
            }
            if let Some(v) = user_override.max_upload_size_bytes {
                effective.max_upload_size_bytes = v;
            }
            if let Some(v) = user_override.max_files_count {
                effective.max_files_count = v;
            }
            if let Some(v) = &user_override.allowed_extensions {
                effective.allowed_extensions =
                    v.iter().map(|e| e.to_ascii_lowercase()).collect();
                effective.allowed_extensions.sort_unstable();
            }
            if let Some(v) = &user_override.blocked_extensions {
                effective.blocked_extensions =
                    v.iter().map(|e| e.to_ascii_lowercase()).collect();
                effective.blocked_extensions.sort_unstable();
            }
        }
    }
    effective
}

/// Lower-cased extension of a file name; empty when there is none.
pub fn file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// The ordered upload gate. Each rejection carries its own error kind.
pub fn check_upload_allowed(
    quota: &EffectiveQuota,
    usage: &StorageQuota,
    size: u64,
    filename: &str,
) -> Result<(), HostError> {
    if size > quota.max_upload_size_bytes {
        return Err(HostError::QuotaExceeded {
            resource: "upload_size".to_string(),
            used: size,
            max: quota.max_upload_size_bytes,
        });
    }
    if usage.storage_used_bytes + size > quota.max_storage_bytes {
        return Err(HostError::QuotaExceeded {
            resource: "storage".to_string(),
            used: usage.storage_used_bytes,
            max: quota.max_storage_bytes,
        });
    }
    if usage.files_count >= quota.max_files_count {
        return Err(HostError::QuotaExceeded {
            resource: "files".to_string(),
            used: usage.files_count,
            max: quota.max_files_count,
        });
    }
    let ext = file_extension(filename);
    if quota.blocked_extensions.contains(&ext) {
        return Err(HostError::FileTypeBlocked { file_type: ext });
    }
    if !quota.allowed_extensions.is_empty() && !quota.allowed_extensions.contains(&ext) {
        return Err(HostError::FileTypeNotAllowed { file_type: ext });
    }
    Ok(())
}

/// Role quotas, user overrides, and usage counters for the extension.
#[derive(Default)]
pub struct QuotaStore {
    role_quotas: RwLock<HashMap<String, RoleQuota>>,
    overrides: RwLock<HashMap<String, UserQuotaOverride>>,
    usage: RwLock<HashMap<String, StorageQuota>>,
}

impl QuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role_quota(&self, quota: RoleQuota) {
        self.role_quotas
            .write()
            .unwrap()
            .insert(quota.role.clone(), quota);
    }

    /// Replace every role quota in one step; configuration apply uses this
    /// so repeated applies converge to the same state.
    pub fn replace_role_quotas(&self, quotas: Vec<RoleQuota>) {
        let mut table = self.role_quotas.write().unwrap();
        table.clear();
        for quota in quotas {
            table.insert(quota.role.clone(), quota);
        }
    }

    pub fn set_override(&self, user_override: UserQuotaOverride) {
        self.overrides
            .write()
            .unwrap()
            .insert(user_override.user_id.clone(), user_override);
    }

    pub fn clear_override(&self, user_id: &str) {
        self.overrides.write().unwrap().remove(user_id);
    }

    /// The effective quota for a user holding `roles`.
    pub fn effective_for(&self, user_id: &str, roles: &[String], now: DateTime<Utc>) -> EffectiveQuota {
        let table = self.role_quotas.read().unwrap();
        let role_quotas: Vec<RoleQuota> = roles
            .iter()
            .filter_map(|role| table.get(role).cloned())
            .collect();
        let overrides = self.overrides.read().unwrap();
        effective_quota(&role_quotas, overrides.get(user_id), now)
    }

    /// Current usage snapshot, rolling the period if it elapsed.
    pub fn usage_of(&self, user_id: &str, now: DateTime<Utc>) -> StorageQuota {
        let mut usage = self.usage.write().unwrap();
        let entry = usage
            .entry(user_id.to_string())
            .or_insert_with(|| StorageQuota::new(user_id, now));
        entry.roll_period_if_elapsed(now);
        entry.clone()
    }

    /// Record a completed upload: storage and file count grow monotonically.
    pub fn record_upload(&self, user_id: &str, size: u64) {
        let now = Utc::now();
        let mut usage = self.usage.write().unwrap();
        let entry = usage
            .entry(user_id.to_string())
            .or_insert_with(|| StorageQuota::new(user_id, now));
        entry.roll_period_if_elapsed(now);
        entry.storage_used_bytes += size;
        entry.files_count += 1;
    }

    /// Record a deletion, releasing storage.
    pub fn record_delete(&self, user_id: &str, size: u64) {
        let mut usage = self.usage.write().unwrap();
        if let Some(entry) = usage.get_mut(user_id) {
            entry.storage_used_bytes = entry.storage_used_bytes.saturating_sub(size);
            entry.files_count = entry.files_count.saturating_sub(1);
        }
    }

    /// Record download bandwidth against `user_id`.
    pub fn record_download(&self, user_id: &str, size: u64) {
        let now = Utc::now();
        let mut usage = self.usage.write().unwrap();
        let entry = usage
            .entry(user_id.to_string())
            .or_insert_with(|| StorageQuota::new(user_id, now));
        entry.roll_period_if_elapsed(now);
        entry.bandwidth_used_bytes += size;
    }
}

/// Fire-and-forget usage update with a bounded lifetime.
///
/// The task races the update against a 30-second timeout and the extension's
/// shutdown token, so a disabled extension never leaks a worker.
pub fn spawn_usage_update<F>(shutdown: CancellationToken, update: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(USAGE_UPDATE_TIMEOUT) => {
                tracing::warn!("usage update timed out");
            }
            _ = async { tokio::task::spawn_blocking(update).await.ok() } => {}
        }
    });
}
