// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Updater Companion (spec §4.10): a separate, short-lived process the agent
//! spawns immediately before exiting. It alone touches the installed files —
//! stop, backup, swap, start, watchdog, and (on any failure after the backup
//! exists) rollback.

pub mod config;
pub mod error;
pub mod fs_copy;
pub mod log;
pub mod protocol;
pub mod rollback;
pub mod service;

pub use config::Config;
pub use error::ExitCode;

/// Run the full update protocol and return the exit code the binary should
/// use (spec §6's closed enumeration).
pub async fn run(config: Config) -> ExitCode {
    let log = log::UpdaterLog::open(&config);
    log.line(&format!(
        "starting update {} -> {} (install_dir={})",
        config.old_version,
        config.new_version,
        config.install_dir.display()
    ));

    let code = protocol::run_protocol(&config, &log).await;
    log.line(&format!("exiting with code {code}"));
    code
}
