// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Managed endpoint agent configuration (spec §6's recognized config set).
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version, about)]
pub struct Config {
    /// Base URL of the server-facing request protocol.
    #[arg(long, env = "AGENT_SERVER_URL")]
    pub server_url: String,

    /// Base URL of the persistent event channel (defaults to `server_url`
    /// with a `ws`/`wss` scheme when unset).
    #[arg(long, env = "AGENT_CHANNEL_URL")]
    pub channel_url: Option<String>,

    /// Directory holding the three persisted-state subdirectories
    /// (`identity/`, `queue/`, `update/`).
    #[arg(long, env = "AGENT_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Telemetry sample period, in seconds.
    #[arg(long, env = "AGENT_STATUS_INTERVAL_SEC", default_value = "60")]
    pub status_report_interval_sec: u64,

    /// Auto-update check period, in seconds.
    #[arg(long, env = "AGENT_AUTO_UPDATE_INTERVAL_SEC", default_value = "3600")]
    pub auto_update_interval_sec: u64,

    /// Whether the periodic/pushed auto-update path is enabled at all.
    #[arg(long, env = "AGENT_ENABLE_AUTO_UPDATE", default_value = "true")]
    pub enable_auto_update: bool,

    /// Initial delay before the first retry of a transient API failure.
    #[arg(long, env = "AGENT_NETWORK_RETRY_INITIAL_DELAY_SEC", default_value = "1")]
    pub network_retry_initial_delay_sec: u64,

    /// Present for compatibility; must be ignored (see spec §9). Any nonzero
    /// value is logged as a warning once at startup.
    #[arg(long, env = "AGENT_TOKEN_REFRESH_INTERVAL_SEC", default_value = "0")]
    pub token_refresh_interval_sec: u64,

    /// Maximum depth of the in-memory command intake queue.
    #[arg(long, env = "AGENT_MAX_QUEUE_SIZE", default_value = "256")]
    pub max_queue_size: usize,

    /// Maximum concurrently-executing commands.
    #[arg(long, env = "AGENT_MAX_PARALLEL_COMMANDS", default_value = "4")]
    pub max_parallel_commands: usize,

    /// Default command deadline when a command carries no
    /// `parameters.timeout_sec` (or it is zero).
    #[arg(long, env = "AGENT_DEFAULT_TIMEOUT_SEC", default_value = "300")]
    pub default_timeout_sec: u64,

    /// Encoding used to decode captured console stdout/stderr.
    #[arg(long, env = "AGENT_CONSOLE_ENCODING", default_value = "utf-8")]
    pub console_encoding: String,

    /// Maximum retry attempts for idempotent API requests and downloads.
    #[arg(long, env = "AGENT_MAX_RETRIES", default_value = "5")]
    pub max_retries: u32,

    /// Initial backoff delay for API request retries, in seconds.
    #[arg(long, env = "AGENT_INITIAL_DELAY_SECONDS", default_value = "1")]
    pub initial_delay_seconds: u64,

    /// Initial event channel reconnect delay, in seconds.
    #[arg(long, env = "AGENT_RECONNECT_DELAY_INITIAL_SEC", default_value = "1")]
    pub reconnect_delay_initial_sec: u64,

    /// Maximum event channel reconnect delay, in seconds.
    #[arg(long, env = "AGENT_RECONNECT_DELAY_MAX_SEC", default_value = "60")]
    pub reconnect_delay_max_sec: u64,

    /// Maximum reconnect attempts before giving up (unbounded if unset).
    #[arg(long, env = "AGENT_RECONNECT_ATTEMPTS_MAX")]
    pub reconnect_attempts_max: Option<u32>,

    /// Offline queue cap, in megabytes, per partition.
    #[arg(long, env = "AGENT_MAX_SIZE_MB", default_value = "50")]
    pub max_size_mb: u64,

    /// Offline queue item max age, in hours, per partition.
    #[arg(long, env = "AGENT_MAX_AGE_HOURS", default_value = "72")]
    pub max_age_hours: u64,

    /// Status-report partition item count cap.
    #[arg(long, env = "AGENT_STATUS_REPORTS_MAX_COUNT", default_value = "500")]
    pub status_reports_max_count: usize,

    /// Command-result partition item count cap.
    #[arg(long, env = "AGENT_COMMAND_RESULTS_MAX_COUNT", default_value = "500")]
    pub command_results_max_count: usize,

    /// Error-report partition item count cap.
    #[arg(long, env = "AGENT_ERROR_REPORTS_MAX_COUNT", default_value = "500")]
    pub error_reports_max_count: usize,

    /// Directory the agent (and updater companion) are currently installed
    /// into; passed to the updater as its install-directory argument and
    /// searched for a fallback updater binary when the extracted package
    /// doesn't carry its own.
    #[arg(long, env = "AGENT_INSTALL_DIR")]
    pub install_dir: PathBuf,

    /// Bound on how long the updater companion waits for this process to
    /// exit (or the service to stop) before declaring `stop_failed`.
    #[arg(long, env = "AGENT_SERVICE_WAIT_TIMEOUT_SEC", default_value = "60")]
    pub service_wait_timeout_sec: u64,

    /// How long the updater companion watches the newly-started agent for
    /// an early exit before declaring the update a success.
    #[arg(long, env = "AGENT_WATCHDOG_PERIOD_SEC", default_value = "120")]
    pub watchdog_period_sec: u64,

    /// Log format: `json` or `text`.
    #[arg(long, env = "AGENT_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for the agent's own daily-rotated log file. When unset,
    /// the agent logs to stdout only.
    #[arg(long, env = "AGENT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Designated log files the `get_logs` command collects and uploads
    /// (spec §4.7 step 5), comma-separated.
    #[arg(long, env = "AGENT_LOG_PATHS", value_delimiter = ',')]
    pub log_paths: Vec<PathBuf>,
}

impl Config {
    /// Validate the configuration after parsing and warn about ignored
    /// compatibility-only keys.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_commands == 0 {
            anyhow::bail!("--max-parallel-commands must be at least 1");
        }
        if self.max_queue_size == 0 {
            anyhow::bail!("--max-queue-size must be at least 1");
        }
        if self.reconnect_delay_max_sec < self.reconnect_delay_initial_sec {
            anyhow::bail!("--reconnect-delay-max-sec must be >= --reconnect-delay-initial-sec");
        }
        if self.token_refresh_interval_sec != 0 {
            tracing::warn!(
                value = self.token_refresh_interval_sec,
                "AGENT_TOKEN_REFRESH_INTERVAL_SEC is set but has no effect; tokens do not expire"
            );
        }
        Ok(())
    }

    /// The event channel's base URL, derived from `server_url` when
    /// `channel_url` was not explicitly supplied.
    pub fn effective_channel_url(&self) -> String {
        self.channel_url.clone().unwrap_or_else(|| derive_channel_url(&self.server_url))
    }

    pub fn identity_dir(&self) -> PathBuf {
        self.data_dir.join("identity")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn update_dir(&self) -> PathBuf {
        self.data_dir.join("update")
    }

    /// Download-staging directory for one version, unique per version so a
    /// retried update never reuses a partial download (spec §4.9 step 2).
    pub fn download_dir(&self, version: &str) -> PathBuf {
        self.update_dir().join("download").join(version)
    }

    /// Extraction directory for one version; removed and recreated fresh
    /// on every extraction attempt (spec §4.9 step 4).
    pub fn extracted_dir(&self, version: &str) -> PathBuf {
        self.update_dir().join("extracted").join(version)
    }
}

fn derive_channel_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        server_url.to_owned()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
