//! Access logging for the storage extension.
//!
//! Every upload, download, and share mutation lands here, ring-buffered to
//! the most recent 10,000 entries. The hook handlers the extension registers
//! for `AfterUpload` / `AfterDownload` write through this store, so any other
//! extension firing those hook types shows up in the same log.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum retained entries.
pub const ACCESS_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub object_id: String,
    pub action: String,
    pub bytes: u64,
    pub success: bool,
    pub details: String,
}

#[derive(Default)]
pub struct AccessLogStore {
    entries: RwLock<VecDeque<AccessLogEntry>>,
}

impl AccessLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        user_id: Option<&str>,
        object_id: &str,
        action: &str,
        bytes: u64,
        success: bool,
        details: impl Into<String>,
    ) {
        let mut entries = self.entries.write().unwrap();
        if entries.len() == ACCESS_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(AccessLogEntry {
            timestamp: Utc::now(),
            user_id: user_id.map(str::to_string),
            object_id: object_id.to_string(),
            action: action.to_string(),
            bytes,
            success,
            details: details.into(),
        });
    }

    /// Newest first, optionally filtered by user, bounded by `limit`.
    pub fn recent(&self, user_id: Option<&str>, limit: usize) -> Vec<AccessLogEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| user_id.map_or(true, |u| e.user_id.as_deref() == Some(u)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}
