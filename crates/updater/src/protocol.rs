// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The strict-order stop -> backup -> swap -> start -> watchdog protocol
//! (spec §4.10 steps 2-7).

use std::time::Duration;

use crate::config::Config;
use crate::error::ExitCode;
use crate::fs_copy;
use crate::log::UpdaterLog;
use crate::rollback;
use crate::service;

pub async fn run_protocol(config: &Config, log: &UpdaterLog) -> ExitCode {
    let service_wait = Duration::from_secs(config.service_wait_timeout_sec);

    // Step 2: wait for the old agent to exit (the Update Manager already
    // requested its shutdown before spawning this process).
    log.line("step 2: waiting for the old agent process to exit");
    if !service::wait_for_exit(&config.agent_pid_file(), service_wait).await {
        log.line("step 2: timed out waiting for the old agent to exit");
        return ExitCode::StopFailed;
    }

    // Step 3: back up the current install.
    log.line("step 3: backing up the current installation");
    let backup_dir = config.backup_dir();
    if let Err(e) = fs_copy::copy_dir_recursive(&config.install_dir, &backup_dir) {
        log.line(&format!("step 3: backup failed: {e}"));
        return ExitCode::BackupFailed;
    }

    // The old agent's own launch arguments live under install_dir and are
    // about to be wiped by step 4's clear_dir_except; read them now so step
    // 5 can still replay them once the new files are in place.
    let args_file = config.agent_args_file();
    let launch_args = service::read_launch_args(&args_file);

    // Step 4: swap in the new files.
    log.line("step 4: swapping in the new files");
    if let Err(e) = fs_copy::clear_dir_except(&config.install_dir, &backup_dir) {
        log.line(&format!("step 4: failed clearing install dir: {e}"));
        return resolve_with_rollback(config, log, None, ExitCode::CopyFailed).await;
    }
    if let Err(e) = fs_copy::copy_dir_recursive(&config.source_path, &config.install_dir) {
        log.line(&format!("step 4: failed copying new files: {e}"));
        return resolve_with_rollback(config, log, None, ExitCode::CopyFailed).await;
    }
    if let Err(e) = service::write_launch_args(&args_file, &launch_args) {
        log.line(&format!("step 4: failed restoring launch arguments: {e}"));
        return resolve_with_rollback(config, log, None, ExitCode::CopyFailed).await;
    }

    // Step 5: start the new agent and confirm it reaches the running state.
    log.line("step 5: starting the new agent");
    let agent_binary = config.agent_binary();
    let mut new_agent = match service::spawn_agent(&agent_binary, &launch_args) {
        Ok(child) => child,
        Err(e) => {
            log.line(&format!("step 5: failed to spawn new agent: {e}"));
            return resolve_with_rollback(config, log, None, ExitCode::StartFailed).await;
        }
    };
    if !service::wait_for_running(&mut new_agent, &config.agent_pid_file(), service_wait).await {
        log.line("step 5: new agent did not reach the running state in time");
        return resolve_with_rollback(config, log, Some(new_agent), ExitCode::StartFailed).await;
    }

    // Step 6: watchdog.
    log.line("step 6: watching the new agent for an early exit");
    let watchdog_period = Duration::from_secs(config.watchdog_period_sec);
    if !service::watch_stays_alive(&mut new_agent, watchdog_period).await {
        log.line("step 6: new agent exited during the watchdog window");
        return resolve_with_rollback(config, log, Some(new_agent), ExitCode::WatchdogFailed).await;
    }

    // Step 7: success — clean up the backup and the extracted source.
    log.line("step 7: update succeeded, cleaning up");
    if let Err(e) = std::fs::remove_dir_all(&backup_dir) {
        log.line(&format!("step 7: failed to remove backup (non-fatal): {e}"));
    }
    if let Err(e) = std::fs::remove_dir_all(&config.source_path) {
        log.line(&format!("step 7: failed to remove extracted source (non-fatal): {e}"));
    }

    ExitCode::Success
}

/// Invoke rollback and decide the final exit code: the triggering failure's
/// code if rollback succeeds, or `RollbackFailed` if it doesn't (spec
/// §4.10.1).
async fn resolve_with_rollback(
    config: &Config,
    log: &UpdaterLog,
    new_agent: Option<tokio::process::Child>,
    triggering_code: ExitCode,
) -> ExitCode {
    match rollback::rollback(config, log, new_agent).await {
        Ok(()) => triggering_code,
        Err(rollback_code) => rollback_code,
    }
}
