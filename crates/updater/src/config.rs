// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Updater companion CLI arguments (spec §6's canonical argument list).
#[derive(Debug, Clone, Parser)]
#[command(name = "agent-updater", version, about)]
pub struct Config {
    /// Version currently installed, before this update.
    #[arg(long)]
    pub old_version: String,

    /// Version being installed.
    #[arg(long)]
    pub new_version: String,

    /// Directory holding the already-extracted new package (the agent's
    /// Update Manager extracted it before spawning this process).
    #[arg(long)]
    pub source_path: PathBuf,

    /// Bound on waiting for the old agent process to exit and for the new
    /// one to reach the running state.
    #[arg(long, default_value = "60")]
    pub service_wait_timeout_sec: u64,

    /// How long to watch the newly-started agent for an early exit before
    /// declaring the update a success.
    #[arg(long, default_value = "120")]
    pub watchdog_period_sec: u64,

    /// Current installation directory; also where the old agent's PID file
    /// and the backup/extracted-source cleanup targets live.
    #[arg(long)]
    pub install_dir: PathBuf,

    /// Directory for this process's own dedicated log file.
    #[arg(long)]
    pub log_dir: PathBuf,
}

impl Config {
    /// Semantic validation beyond what `clap` itself enforces (spec §4.10:
    /// "missing or invalid arguments ⇒ invalid-arguments exit code; no
    /// changes").
    pub fn validate(&self) -> Result<(), String> {
        if self.old_version.trim().is_empty() {
            return Err("--old-version must not be empty".to_owned());
        }
        if self.new_version.trim().is_empty() {
            return Err("--new-version must not be empty".to_owned());
        }
        if !self.source_path.is_dir() {
            return Err(format!("--source-path {} is not a directory", self.source_path.display()));
        }
        if !self.install_dir.is_dir() {
            return Err(format!("--install-dir {} is not a directory", self.install_dir.display()));
        }
        if self.service_wait_timeout_sec == 0 {
            return Err("--service-wait-timeout-sec must be at least 1".to_owned());
        }
        if self.watchdog_period_sec == 0 {
            return Err("--watchdog-period-sec must be at least 1".to_owned());
        }
        Ok(())
    }

    /// Backup directory name from the old version, created inside the
    /// install directory (spec §4.10 step 3).
    pub fn backup_dir(&self) -> PathBuf {
        self.install_dir.join(format!("backup-{}", self.old_version))
    }

    /// Where the old agent's single-instance process records its PID, so
    /// this companion can wait for it to exit without linking the agent
    /// crate (spec §4.10 step 2).
    pub fn agent_pid_file(&self) -> PathBuf {
        self.install_dir.join("agent.pid")
    }

    /// The agent binary inside the install directory, (re)started in step 5.
    pub fn agent_binary(&self) -> PathBuf {
        self.install_dir.join("agent")
    }

    /// Where the agent records its own launch arguments, so this companion
    /// can restart it the same way without a real service manager to ask
    /// (spec §4.10 step 5; see `service` module docs).
    pub fn agent_args_file(&self) -> PathBuf {
        self.install_dir.join("agent.args")
    }
}
