// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Per-partition quota configuration (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct PartitionCaps {
    pub max_count: usize,
    pub max_size_bytes: u64,
    pub max_age: Duration,
}

/// A durably-queued item of payload type `T` (spec §3's `QueuedItem<T>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem<T> {
    pub item_id: String,
    pub enqueued_at_ms: u64,
    pub retry_attempts: u32,
    pub payload: T,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// One file-backed FIFO partition of the Offline Queue. Each queued item is
/// one file named `<item_id>.json` under `dir`.
pub struct Partition<T> {
    dir: PathBuf,
    caps: PartitionCaps,
    /// Serializes all mutating access from this process; the directory is
    /// otherwise accessed only by this drain loop and enqueuers (spec §5).
    lock: Mutex<()>,
    _payload: std::marker::PhantomData<T>,
}

impl<T> Partition<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(dir: PathBuf, caps: PartitionCaps) -> Self {
        Self { dir, caps, lock: Mutex::new(()), _payload: std::marker::PhantomData }
    }

    fn item_path(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("{item_id}.json"))
    }

    /// List every item currently on disk, skipping (and deleting, per spec)
    /// any file that fails to read or deserialize.
    fn list(&self) -> Result<Vec<QueuedItem<T>>, AgentError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AgentError::Storage(format!("create_dir_all {}: {e}", self.dir.display())))?;

        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| AgentError::Storage(format!("read_dir {}: {e}", self.dir.display())))?;

        let mut items = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_item::<T>(&path) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping corrupt queue item");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        items.sort_by_key(|i| i.enqueued_at_ms);
        Ok(items)
    }

    /// Enqueue `payload`, pruning the partition first per the three-pass
    /// order in spec §4.2.
    pub async fn enqueue(&self, payload: T) -> Result<String, AgentError> {
        let _guard = self.lock.lock().await;
        self.prune_locked()?;

        let item = QueuedItem {
            item_id: uuid::Uuid::new_v4().to_string(),
            enqueued_at_ms: now_ms(),
            retry_attempts: 0,
            payload,
        };
        self.write_item(&item)?;
        debug!(partition = %self.dir.display(), item_id = %item.item_id, "enqueued item");
        Ok(item.item_id)
    }

    /// Remove and return the oldest item, if any. The caller is responsible
    /// for calling [`Partition::requeue`] on send failure.
    pub async fn dequeue(&self) -> Result<Option<QueuedItem<T>>, AgentError> {
        let _guard = self.lock.lock().await;
        let items = self.list()?;
        let Some(oldest) = items.into_iter().next() else {
            return Ok(None);
        };
        let path = self.item_path(&oldest.item_id);
        std::fs::remove_file(&path)
            .map_err(|e| AgentError::Storage(format!("remove {}: {e}", path.display())))?;
        debug!(partition = %self.dir.display(), item_id = %oldest.item_id, "dequeued item");
        Ok(Some(oldest))
    }

    /// Re-enqueue an item that failed to send: increments `retry_attempts`
    /// and refreshes `enqueued_at_ms`.
    pub async fn requeue(&self, mut item: QueuedItem<T>) -> Result<(), AgentError> {
        let _guard = self.lock.lock().await;
        item.retry_attempts += 1;
        item.enqueued_at_ms = now_ms();
        self.write_item(&item)?;
        debug!(
            partition = %self.dir.display(),
            item_id = %item.item_id,
            retry_attempts = item.retry_attempts,
            "requeued item"
        );
        Ok(())
    }

    /// Current item count, for tests and status reporting.
    pub fn len(&self) -> Result<usize, AgentError> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, AgentError> {
        Ok(self.len()? == 0)
    }

    fn write_item(&self, item: &QueuedItem<T>) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(item)
            .map_err(|e| AgentError::Storage(format!("serialize queue item: {e}")))?;
        crate::paths::write_atomic(&self.item_path(&item.item_id), &bytes)
    }

    /// Three-pass prune: drop by age, then by count, then by size down to
    /// 80% of the cap. Must be called while holding `lock`.
    fn prune_locked(&self) -> Result<(), AgentError> {
        let mut items = self.list()?;

        // Pass 1: age.
        let now = now_ms();
        let max_age_ms = self.caps.max_age.as_millis() as u64;
        let mut kept = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let age_ms = now.saturating_sub(item.enqueued_at_ms);
            if age_ms > max_age_ms {
                self.drop_item(&item, "max_age exceeded")?;
            } else {
                kept.push(item);
            }
        }
        items = kept;

        // Pass 2: count.
        while items.len() > self.caps.max_count {
            let item = items.remove(0);
            self.drop_item(&item, "max_count exceeded")?;
        }

        // Pass 3: size, down to 80% of the cap — not merely back under it.
        let target_bytes = (self.caps.max_size_bytes as f64 * 0.8) as u64;
        let mut total_bytes = self.total_size_bytes(&items)?;
        if total_bytes > self.caps.max_size_bytes {
            while total_bytes > target_bytes && !items.is_empty() {
                let item = items.remove(0);
                total_bytes = total_bytes.saturating_sub(self.item_size_bytes(&item));
                self.drop_item(&item, "max_size_bytes exceeded")?;
            }
        }

        Ok(())
    }

    fn drop_item(&self, item: &QueuedItem<T>, reason: &str) -> Result<(), AgentError> {
        let path = self.item_path(&item.item_id);
        warn!(
            partition = %self.dir.display(),
            item_id = %item.item_id,
            reason,
            "dropping queued item"
        );
        match std::fs::remove_file(&path) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn item_size_bytes(&self, item: &QueuedItem<T>) -> u64 {
        serde_json::to_vec(item).map(|b| b.len() as u64).unwrap_or(0)
    }

    fn total_size_bytes(&self, items: &[QueuedItem<T>]) -> Result<u64, AgentError> {
        Ok(items.iter().map(|i| self.item_size_bytes(i)).sum())
    }
}

fn load_item<T: DeserializeOwned>(path: &Path) -> Result<QueuedItem<T>, AgentError> {
    let bytes =
        std::fs::read(path).map_err(|e| AgentError::Storage(format!("read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AgentError::Storage(format!("deserialize {}: {e}", path.display())))
}

#[cfg(test)]
#[path = "partition_tests.rs"]
mod tests;
