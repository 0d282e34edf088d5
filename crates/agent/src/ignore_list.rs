// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version Ignore List (spec §4.3): a durable set of update versions the
//! agent refuses to install, consulted before every update attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredVersion {
    pub version: String,
    pub first_ignored_at_ms: u64,
    pub reason: String,
    pub failed_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IgnoreListRecord {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    versions: HashMap<String, IgnoredVersion>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Durable set of permanently-skipped versions, guarded by an in-process
/// lock; all writes rewrite the whole file.
pub struct VersionIgnoreList {
    path: PathBuf,
    lock: Mutex<()>,
}

impl VersionIgnoreList {
    pub fn new(update_dir: &Path) -> Self {
        Self { path: update_dir.join("ignored_versions.json"), lock: Mutex::new(()) }
    }

    fn read_record(&self) -> Result<IgnoreListRecord, AgentError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AgentError::Storage(format!("ignore list is corrupt: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IgnoreListRecord::default()),
            Err(e) => Err(AgentError::Storage(format!("read ignore list: {e}"))),
        }
    }

    fn write_record(&self, record: &IgnoreListRecord) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| AgentError::Storage(format!("serialize ignore list: {e}")))?;
        crate::paths::write_atomic(&self.path, &bytes)
    }

    /// Whether `version` is currently on the ignore list.
    pub async fn is_ignored(&self, version: &str) -> Result<bool, AgentError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_record()?.versions.contains_key(version))
    }

    /// Record a failed/rejected update attempt for `version`, adding it on
    /// first occurrence and incrementing `failed_attempts` thereafter.
    pub async fn record_failure(&self, version: &str, reason: &str) -> Result<(), AgentError> {
        let _guard = self.lock.lock().await;
        let mut record = self.read_record()?;
        record
            .versions
            .entry(version.to_owned())
            .and_modify(|v| v.failed_attempts += 1)
            .or_insert_with(|| IgnoredVersion {
                version: version.to_owned(),
                first_ignored_at_ms: now_ms(),
                reason: reason.to_owned(),
                failed_attempts: 1,
            });
        self.write_record(&record)
    }

    /// Remove `version` from the ignore list (e.g. an operator override).
    pub async fn clear(&self, version: &str) -> Result<(), AgentError> {
        let _guard = self.lock.lock().await;
        let mut record = self.read_record()?;
        record.versions.remove(version);
        self.write_record(&record)
    }

    pub async fn list(&self) -> Result<Vec<IgnoredVersion>, AgentError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_record()?.versions.into_values().collect())
    }
}

#[cfg(test)]
#[path = "ignore_list_tests.rs"]
mod tests;
