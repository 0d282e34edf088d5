// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot static hardware attribute collection for the `hardware-info`
//! upload (spec §4.4), submitted once per Session Controller startup.
//! Reads the same `/proc` files the Telemetry Producer samples
//! periodically, rather than pulling in a separate system-info crate.

use crate::api::types::HardwareInfo;

pub fn collect() -> HardwareInfo {
    HardwareInfo {
        os: std::env::consts::OS.to_owned(),
        os_version: read_os_version(),
        cpu_model: read_cpu_model(),
        total_ram_bytes: read_total_ram_bytes().unwrap_or(0),
    }
}

fn read_os_version() -> String {
    std::fs::read_to_string("/proc/version").map(|s| s.trim().to_owned()).unwrap_or_default()
}

fn read_cpu_model() -> String {
    std::fs::read_to_string("/proc/cpuinfo").ok().as_deref().and_then(parse_cpu_model).unwrap_or_default()
}

fn parse_cpu_model(content: &str) -> Option<String> {
    content.lines().find_map(|line| line.split_once(':').filter(|(key, _)| key.trim() == "model name").map(|(_, v)| v.trim().to_owned()))
}

fn read_total_ram_bytes() -> Result<u64, String> {
    let content = std::fs::read_to_string("/proc/meminfo").map_err(|e| e.to_string())?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(crate::telemetry::parse_kb_field)
        .map(|kb| kb * 1024)
        .ok_or_else(|| "MemTotal not found in /proc/meminfo".to_owned())
}
