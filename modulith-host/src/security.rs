//! Security, quota and rate-limit gate.
//!
//! One gate instance serves the whole host. It tracks, per extension: the set
//! of granted permission strings (O(1) membership checks, audited mutation),
//! a token-bucket rate limiter, and resource quotas with live usage gauges.
//! Every grant, revoke, rate rejection, and sensitive action lands in a
//! bounded audit ring buffer.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::host_error::HostError;

/// Audit ring buffer capacity; older entries fall off the back.
pub const AUDIT_CAPACITY: usize = 10_000;

/// One audited action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub extension: String,
    pub action: String,
    pub resource: String,
    pub user_id: Option<String>,
    pub result: String,
    pub details: String,
}

impl AuditEntry {
    pub fn new(
        extension: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            extension: extension.into(),
            action: action.into(),
            resource: resource.into(),
            user_id: None,
            result: result.into(),
            details: String::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Quota limits for one extension's host-level resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub max_memory_mb: u64,
    pub max_workers: u64,
    pub max_db_conns: u64,
    pub max_storage_mb: u64,
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_workers: 16,
            max_db_conns: 8,
            max_storage_mb: 1024,
        }
    }
}

/// The resource kinds a quota governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Workers,
    DbConnections,
    Storage,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory_mb",
            ResourceKind::Workers => "workers",
            ResourceKind::DbConnections => "db_connections",
            ResourceKind::Storage => "storage_mb",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ResourceUsage {
    memory_mb: u64,
    workers: u64,
    db_conns: u64,
    storage_mb: u64,
}

impl ResourceUsage {
    fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Memory => self.memory_mb,
            ResourceKind::Workers => self.workers,
            ResourceKind::DbConnections => self.db_conns,
            ResourceKind::Storage => self.storage_mb,
        }
    }

    fn get_mut(&mut self, kind: ResourceKind) -> &mut u64 {
        match kind {
            ResourceKind::Memory => &mut self.memory_mb,
            ResourceKind::Workers => &mut self.workers,
            ResourceKind::DbConnections => &mut self.db_conns,
            ResourceKind::Storage => &mut self.storage_mb,
        }
    }
}

impl ResourceQuota {
    fn limit(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Memory => self.max_memory_mb,
            ResourceKind::Workers => self.max_workers,
            ResourceKind::DbConnections => self.max_db_conns,
            ResourceKind::Storage => self.max_storage_mb,
        }
    }
}

/// Token bucket with continuous refill.
///
/// `capacity` and `refill_rate` are both the configured requests-per-second.
/// Refill and consumption happen atomically under the bucket's lock.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_second: f64) -> Self {
        Self {
            tokens: requests_per_second,
            capacity: requests_per_second,
            refill_rate: requests_per_second,
            last_refill: Instant::now(),
        }
    }

    fn try_consume_at(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }
}

#[derive(Default)]
struct AuditLog {
    entries: VecDeque<AuditEntry>,
}

impl AuditLog {
    fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() == AUDIT_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn recent(&self, extension: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| extension.map_or(true, |x| e.extension == x))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// The host-wide gate.
pub struct SecurityGate {
    permissions: DashMap<String, HashSet<String>>,
    limiters: DashMap<String, Mutex<TokenBucket>>,
    quotas: DashMap<String, ResourceQuota>,
    usage: DashMap<String, ResourceUsage>,
    audit: Mutex<AuditLog>,
}

impl SecurityGate {
    pub fn new() -> Self {
        Self {
            permissions: DashMap::new(),
            limiters: DashMap::new(),
            quotas: DashMap::new(),
            usage: DashMap::new(),
            audit: Mutex::new(AuditLog::default()),
        }
    }

    // --- permissions -----------------------------------------------------

    /// Grant a permission and audit the grant.
    pub fn grant(&self, extension: &str, permission: &str) {
        self.permissions
            .entry(extension.to_string())
            .or_default()
            .insert(permission.to_string());
        self.record(AuditEntry::new(extension, "permission_grant", permission, "granted"));
    }

    /// Revoke a permission and audit the revoke.
    pub fn revoke(&self, extension: &str, permission: &str) {
        if let Some(mut set) = self.permissions.get_mut(extension) {
            set.remove(permission);
        }
        self.record(AuditEntry::new(extension, "permission_revoke", permission, "revoked"));
    }

    /// O(1) membership check, no audit.
    pub fn check_permission(&self, extension: &str, permission: &str) -> bool {
        self.permissions
            .get(extension)
            .map(|set| set.contains(permission))
            .unwrap_or(false)
    }

    /// Like [`Self::check_permission`] but audits the denial.
    pub fn require_permission(&self, extension: &str, permission: &str) -> Result<(), HostError> {
        if self.check_permission(extension, permission) {
            return Ok(());
        }
        self.record(AuditEntry::new(extension, "permission_check", permission, "denied"));
        Err(HostError::PermissionDenied {
            extension: extension.to_string(),
            permission: permission.to_string(),
        })
    }

    pub fn permissions_of(&self, extension: &str) -> Vec<String> {
        let mut perms: Vec<String> = self
            .permissions
            .get(extension)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        perms.sort_unstable();
        perms
    }

    // --- rate limiting ---------------------------------------------------

    /// Configure the extension's bucket: capacity and refill rate both equal
    /// `requests_per_second`. Replaces any existing bucket.
    pub fn set_rate_limit(&self, extension: &str, requests_per_second: f64) {
        self.limiters.insert(
            extension.to_string(),
            Mutex::new(TokenBucket::new(requests_per_second)),
        );
    }

    /// Remove the extension's bucket; subsequent calls are always allowed.
    pub fn clear_rate_limit(&self, extension: &str) {
        self.limiters.remove(extension);
    }

    /// Consume one token. No configured limit means always allowed.
    pub fn allow(&self, extension: &str) -> bool {
        match self.limiters.get(extension) {
            Some(bucket) => bucket.lock().unwrap().try_consume(),
            None => true,
        }
    }

    /// [`Self::allow`] with a typed rejection that lands in the audit log.
    pub fn check_rate(&self, extension: &str) -> Result<(), HostError> {
        if self.allow(extension) {
            return Ok(());
        }
        self.record(AuditEntry::new(extension, "rate_limit", "requests", "rejected"));
        Err(HostError::RateLimited {
            extension: extension.to_string(),
        })
    }

    /// Remaining tokens, for introspection. `None` when no limit is set.
    pub fn remaining_tokens(&self, extension: &str) -> Option<f64> {
        self.limiters.get(extension).map(|bucket| {
            let mut bucket = bucket.lock().unwrap();
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill);
            bucket.tokens =
                (bucket.tokens + elapsed.as_secs_f64() * bucket.refill_rate).min(bucket.capacity);
            bucket.last_refill = now;
            bucket.tokens
        })
    }

    // --- resource quotas -------------------------------------------------

    pub fn set_resource_quota(&self, extension: &str, quota: ResourceQuota) {
        self.quotas.insert(extension.to_string(), quota);
    }

    pub fn resource_quota(&self, extension: &str) -> ResourceQuota {
        self.quotas
            .get(extension)
            .map(|q| *q)
            .unwrap_or_default()
    }

    /// Reject when `current + amount` would exceed the configured maximum.
    pub fn check_resource_quota(
        &self,
        extension: &str,
        kind: ResourceKind,
        amount: u64,
    ) -> Result<(), HostError> {
        let quota = self.resource_quota(extension);
        let used = self
            .usage
            .get(extension)
            .map(|u| u.get(kind))
            .unwrap_or(0);
        let max = quota.limit(kind);
        if used + amount > max {
            self.record(
                AuditEntry::new(extension, "quota_check", kind.as_str(), "rejected")
                    .with_details(format!("requested {amount}, used {used}, max {max}")),
            );
            return Err(HostError::QuotaExceeded {
                resource: kind.as_str().to_string(),
                used,
                max,
            });
        }
        Ok(())
    }

    /// Check then take `amount` of the resource.
    pub fn consume_resource(
        &self,
        extension: &str,
        kind: ResourceKind,
        amount: u64,
    ) -> Result<(), HostError> {
        self.check_resource_quota(extension, kind, amount)?;
        *self
            .usage
            .entry(extension.to_string())
            .or_default()
            .get_mut(kind) += amount;
        Ok(())
    }

    /// Return `amount` of the resource. Saturates at zero.
    pub fn release_resource(&self, extension: &str, kind: ResourceKind, amount: u64) {
        if let Some(mut usage) = self.usage.get_mut(extension) {
            let slot = usage.get_mut(kind);
            *slot = slot.saturating_sub(amount);
        }
    }

    pub fn resource_usage(&self, extension: &str, kind: ResourceKind) -> u64 {
        self.usage.get(extension).map(|u| u.get(kind)).unwrap_or(0)
    }

    // --- audit -----------------------------------------------------------

    /// Append an entry to the ring buffer.
    pub fn record(&self, entry: AuditEntry) {
        self.audit.lock().unwrap().push(entry);
    }

    /// Newest-first entries, optionally filtered by extension, bounded by
    /// `limit`.
    pub fn audit_entries(&self, extension: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        self.audit.lock().unwrap().recent(extension, limit)
    }

    /// Drop all per-extension state on unregister.
    pub fn remove_extension(&self, extension: &str) {
        self.permissions.remove(extension);
        self.limiters.remove(extension);
        self.quotas.remove(extension);
        self.usage.remove(extension);
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new()
    }
}
