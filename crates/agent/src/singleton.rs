// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance process lock (spec §5): a named OS-level lock acquired at
//! startup and released on exit. Failure to acquire is a fatal startup error.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::AgentError;

/// Holds the lock file open for the process lifetime; dropping it releases
/// the advisory lock.
pub struct SingleInstanceLock {
    _guard: Flock<File>,
    path: PathBuf,
}

impl SingleInstanceLock {
    /// Attempt to acquire the lock at `data_dir/agent.lock`. Non-blocking:
    /// returns an error immediately if another process already holds it.
    pub fn acquire(data_dir: &Path) -> Result<Self, AgentError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| AgentError::Storage(format!("create_dir_all {}: {e}", data_dir.display())))?;
        let path = data_dir.join("agent.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| AgentError::Storage(format!("open lock file {}: {e}", path.display())))?;

        let guard = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_file, errno)| {
            AgentError::Storage(format!(
                "another agent instance already holds {}: {errno}",
                path.display()
            ))
        })?;

        Ok(Self { _guard: guard, path })
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        // `Flock`'s own Drop (which runs after this) unlocks the fd.
        tracing::debug!(path = %self.path.display(), "released single-instance lock");
    }
}

/// Records this process's PID at `install_dir/agent.pid` for the Updater
/// Companion (§4.10), which does not link against this crate and so has no
/// other way to learn which process to wait on. Removed on clean exit.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn write(install_dir: &Path) -> Result<Self, AgentError> {
        let path = install_dir.join("agent.pid");
        std::fs::write(&path, std::process::id().to_string())
            .map_err(|e| AgentError::Storage(format!("write pid file {}: {e}", path.display())))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Records this process's own launch arguments at `install_dir/agent.args`
/// for the Updater Companion to replay when it restarts the service (step 5
/// of §4.10 has no real service manager to ask how the agent was invoked).
/// Rewritten on every start; unlike [`PidFile`] it is never removed, since
/// the companion reads it only after this process has already exited.
pub fn write_launch_args(install_dir: &Path) -> Result<(), AgentError> {
    let path = install_dir.join("agent.args");
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = serde_json::to_vec(&args)
        .map_err(|e| AgentError::Storage(format!("encode launch args: {e}")))?;
    std::fs::write(&path, json).map_err(|e| AgentError::Storage(format!("write launch args {}: {e}", path.display())))
}
