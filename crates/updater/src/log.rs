// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dedicated append-only log file (spec §4.10 step 1): timestamped,
//! version-tagged, written even if the rest of the protocol never reaches a
//! server. Mirrors the teacher's `event_log.rs` append-only-file style, but
//! plain timestamped lines rather than JSONL — this process has no server
//! connection to structure logs for.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;

pub struct UpdaterLog {
    path: PathBuf,
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

impl UpdaterLog {
    /// Open (creating if absent) `log_dir/update-<old>-<new>-<timestamp>.log`.
    pub fn open(config: &Config) -> Self {
        let _ = std::fs::create_dir_all(&config.log_dir);
        let path = config
            .log_dir
            .join(format!("update-{}-{}-{}.log", config.old_version, config.new_version, now_ms()));
        Self { path }
    }

    /// Append one timestamped line. Best-effort: a logging failure must
    /// never abort the update protocol.
    pub fn line(&self, message: &str) {
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        let _ = writeln!(file, "[{}] {message}", now_ms());
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &std::path::Path {
        &self.path
    }
}
