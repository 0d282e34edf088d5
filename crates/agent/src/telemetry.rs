// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry Producer (spec §4.8): a periodic sampler that reads CPU, RAM,
//! and primary-disk usage and emits `agent:status_update`, falling back to
//! the last known value (or 0) with a logged warning on a failed read.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::statvfs::statvfs;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channel::{EmitOutcome, EventChannel, OutboundEvent};
use crate::queue::{OfflineQueue, StatusSample};

/// Abstracts the three percentage reads so the periodic loop can be tested
/// without real `/proc` access (mirrors the teacher's `Detector` trait
/// seam in `driver/process.rs`, one trait per sampled signal here instead
/// of per detector).
pub trait ResourceSampler: Send + Sync {
    fn cpu_usage_percent(&self) -> Result<f64, String>;
    fn ram_usage_percent(&self) -> Result<f64, String>;
    fn disk_usage_percent(&self) -> Result<f64, String>;
}

/// Reads `/proc/stat` (CPU), `/proc/meminfo` (RAM), and `statvfs` on the
/// primary disk mount.
pub struct ProcResourceSampler {
    disk_path: PathBuf,
    last_cpu_totals: std::sync::Mutex<Option<CpuTotals>>,
}

#[derive(Clone, Copy)]
struct CpuTotals {
    idle: u64,
    total: u64,
}

impl ProcResourceSampler {
    pub fn new(disk_path: PathBuf) -> Self {
        Self { disk_path, last_cpu_totals: std::sync::Mutex::new(None) }
    }

    fn read_cpu_totals() -> Result<CpuTotals, String> {
        let contents = std::fs::read_to_string("/proc/stat").map_err(|e| format!("read /proc/stat: {e}"))?;
        let line = contents.lines().next().ok_or_else(|| "empty /proc/stat".to_owned())?;
        let mut fields = line.split_whitespace();
        if fields.next() != Some("cpu") {
            return Err("unexpected /proc/stat format".to_owned());
        }
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            return Err("too few cpu fields in /proc/stat".to_owned());
        }
        // user, nice, system, idle, iowait, irq, softirq, steal, ...
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total: u64 = values.iter().sum();
        Ok(CpuTotals { idle, total })
    }
}

impl ResourceSampler for ProcResourceSampler {
    fn cpu_usage_percent(&self) -> Result<f64, String> {
        let current = Self::read_cpu_totals()?;
        let mut last = self.last_cpu_totals.lock().unwrap_or_else(|e| e.into_inner());
        let usage = match *last {
            Some(previous) => {
                let total_delta = current.total.saturating_sub(previous.total);
                let idle_delta = current.idle.saturating_sub(previous.idle);
                if total_delta == 0 {
                    0.0
                } else {
                    100.0 * (1.0 - idle_delta as f64 / total_delta as f64)
                }
            }
            // First sample has no prior snapshot to diff against; report 0
            // rather than a bogus since-boot average.
            None => 0.0,
        };
        *last = Some(current);
        Ok(usage.clamp(0.0, 100.0))
    }

    fn ram_usage_percent(&self) -> Result<f64, String> {
        let contents = std::fs::read_to_string("/proc/meminfo").map_err(|e| format!("read /proc/meminfo: {e}"))?;
        let mut total_kb = None;
        let mut available_kb = None;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = parse_kb_field(rest);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kb = parse_kb_field(rest);
            }
        }
        let (total, available) = match (total_kb, available_kb) {
            (Some(t), Some(a)) => (t, a),
            _ => return Err("MemTotal/MemAvailable not found in /proc/meminfo".to_owned()),
        };
        if total == 0 {
            return Err("MemTotal was 0".to_owned());
        }
        Ok((100.0 * (1.0 - available as f64 / total as f64)).clamp(0.0, 100.0))
    }

    fn disk_usage_percent(&self) -> Result<f64, String> {
        let stat = statvfs(&self.disk_path).map_err(|e| format!("statvfs {}: {e}", self.disk_path.display()))?;
        let total = stat.blocks() as u64 * stat.fragment_size() as u64;
        let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
        if total == 0 {
            return Err("statvfs reported 0 total blocks".to_owned());
        }
        Ok((100.0 * (1.0 - free as f64 / total as f64)).clamp(0.0, 100.0))
    }
}

pub(crate) fn parse_kb_field(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

/// Periodic sampler loop: reads all three metrics, falls back to the last
/// known value (or 0 on the first failure) with a logged warning, then
/// emits via the channel-or-queue fallback (spec §4.7's emit path, reused
/// here per §4.8).
pub struct TelemetryProducer {
    sampler: Arc<dyn ResourceSampler>,
    period: Duration,
    channel: Arc<EventChannel>,
    queue: Arc<OfflineQueue>,
    last_cpu: f64,
    last_ram: f64,
    last_disk: f64,
}

impl TelemetryProducer {
    pub fn new(sampler: Arc<dyn ResourceSampler>, period: Duration, channel: Arc<EventChannel>, queue: Arc<OfflineQueue>) -> Self {
        Self { sampler, period, channel, queue, last_cpu: 0.0, last_ram: 0.0, last_disk: 0.0 }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.sample_and_emit().await;
        }
    }

    async fn sample_and_emit(&mut self) {
        self.last_cpu = self.read_or_fallback("cpu", self.last_cpu, || self.sampler.cpu_usage_percent());
        self.last_ram = self.read_or_fallback("ram", self.last_ram, || self.sampler.ram_usage_percent());
        self.last_disk = self.read_or_fallback("disk", self.last_disk, || self.sampler.disk_usage_percent());

        let event =
            OutboundEvent::StatusUpdate { cpu_usage: self.last_cpu, ram_usage: self.last_ram, disk_usage: self.last_disk };
        if self.channel.emit(event) == EmitOutcome::Sent {
            return;
        }
        let sample = StatusSample { cpu_usage: self.last_cpu, ram_usage: self.last_ram, disk_usage: self.last_disk };
        if let Err(e) = self.queue.status.enqueue(sample).await {
            warn!(error = %e, "failed to enqueue status sample after channel emit failed");
        }
    }

    fn read_or_fallback(&self, metric: &str, last: f64, read: impl FnOnce() -> Result<f64, String>) -> f64 {
        match read() {
            Ok(value) => value,
            Err(e) => {
                warn!(metric, error = %e, fallback = last, "resource sample failed, using last known value");
                last
            }
        }
    }
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
