// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline Queue (spec §4.2): three file-backed FIFO partitions providing
//! at-least-once delivery of telemetry, command results, and error reports
//! while the Event Channel is not connected.

mod partition;

use std::path::Path;
use std::time::Duration;

pub use partition::{Partition, PartitionCaps, QueuedItem};

use crate::api::types::ErrorReport;
use crate::commands::CommandResult;

/// A telemetry status sample, the payload of the status partition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StatusSample {
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub disk_usage: f64,
}

/// The three durable partitions spec §4.2/§9 mandates.
pub struct OfflineQueue {
    pub status: Partition<StatusSample>,
    pub command_results: Partition<CommandResult>,
    pub error_reports: Partition<ErrorReport>,
}

impl OfflineQueue {
    pub fn open(
        queue_dir: &Path,
        status_caps: PartitionCaps,
        command_result_caps: PartitionCaps,
        error_report_caps: PartitionCaps,
    ) -> Self {
        Self {
            status: Partition::new(queue_dir.join("status"), status_caps),
            command_results: Partition::new(queue_dir.join("command-results"), command_result_caps),
            error_reports: Partition::new(queue_dir.join("error-reports"), error_report_caps),
        }
    }
}

/// Build per-partition caps from the config keys of spec §6.
pub fn caps_from_config(max_size_mb: u64, max_age_hours: u64, max_count: usize) -> PartitionCaps {
    PartitionCaps {
        max_count,
        max_size_bytes: max_size_mb.saturating_mul(1024 * 1024),
        max_age: Duration::from_secs(max_age_hours.saturating_mul(3600)),
    }
}
