// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rollback (spec §4.10.1): invoked whenever the swap, start, or watchdog
//! step fails after a backup exists. Any failure during rollback itself is
//! fatal; the failed version stays on the agent's ignore list (enforced by
//! the agent's Update Manager before this process was ever spawned, not by
//! this module).

use std::time::Duration;

use tokio::process::Child;

use crate::config::Config;
use crate::error::ExitCode;
use crate::fs_copy;
use crate::log::UpdaterLog;
use crate::service;

/// `new_agent` is the child process started in step 5, if start was
/// attempted at all (absent when rollback is triggered by the step-4 copy
/// failure, before any new process existed).
///
/// Returns `Ok(())` once the old version is restored and running again —
/// the caller still reports the *triggering* failure's exit code, since
/// rollback only undoes the install, not the fact that the update failed.
/// Returns `Err(RollbackFailed)` if rollback itself could not complete,
/// which does override the triggering code (spec §4.10.1).
pub async fn rollback(config: &Config, log: &UpdaterLog, mut new_agent: Option<Child>) -> Result<(), ExitCode> {
    log.line("rollback: starting");

    if let Some(child) = new_agent.as_mut() {
        service::stop_child(child).await;
        log.line("rollback: stopped new agent process");
    }

    let backup_dir = config.backup_dir();
    if !backup_dir.is_dir() {
        log.line("rollback: no backup directory present, rollback is impossible");
        return Err(ExitCode::RollbackFailed);
    }

    if let Err(e) = fs_copy::clear_dir_except(&config.install_dir, &backup_dir) {
        log.line(&format!("rollback: failed clearing install dir: {e}"));
        return Err(ExitCode::RollbackFailed);
    }

    if let Err(e) = fs_copy::copy_dir_recursive(&backup_dir, &config.install_dir) {
        log.line(&format!("rollback: failed restoring backup: {e}"));
        return Err(ExitCode::RollbackFailed);
    }

    // The backup just restored into install_dir carries its own copy of
    // agent.args (it was captured in step 3, before step 4 ever touched the
    // live one), so it can be read back now rather than needing to be
    // threaded in from before the swap the way `protocol::run_protocol` does.
    let agent_binary = config.agent_binary();
    let launch_args = service::read_launch_args(&config.agent_args_file());
    let mut restarted = match service::spawn_agent(&agent_binary, &launch_args) {
        Ok(child) => child,
        Err(e) => {
            log.line(&format!("rollback: failed to restart old agent: {e}"));
            return Err(ExitCode::RollbackFailed);
        }
    };

    let pid_file = config.agent_pid_file();
    let timeout = Duration::from_secs(config.service_wait_timeout_sec);
    if !service::wait_for_running(&mut restarted, &pid_file, timeout).await {
        log.line("rollback: restored agent did not reach the running state in time");
        return Err(ExitCode::RollbackFailed);
    }

    log.line("rollback: completed successfully");
    Ok(())
}
