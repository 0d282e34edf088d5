// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process liveness and lifecycle helpers (spec §4.10 steps 2, 5, 6).
//!
//! The companion does not link against the agent crate, so it has no access
//! to `SingleInstanceLock`; instead the agent writes its PID to
//! `install_dir/agent.pid` at startup (a filesystem contract between the two
//! binaries, not a shared type) and this module polls that file plus
//! `nix::sys::signal::kill(pid, None)` for liveness, the same idiom the
//! teacher's `driver/process.rs::is_process_alive` uses for child processes.
//!
//! There is no real service manager behind "start the service" (spec
//! §4.10 step 5): the agent has required CLI arguments with no defaults, so
//! restarting the bare binary would just fail clap parsing. The agent
//! persists its own launch arguments to `install_dir/agent.args` (a JSON
//! string array, rewritten on every start, never removed on exit) and this
//! module replays them unchanged.

use std::path::Path;
use std::time::Duration;

use nix::sys::signal;
use nix::unistd::Pid;
use tokio::process::{Child, Command};

pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Poll `pid_file` until the PID it names is gone (or the file itself is
/// gone), or `timeout` elapses. The old agent's own shutdown was already
/// requested by the Update Manager before this process was spawned; this
/// only waits for that exit to actually happen.
pub async fn wait_for_exit(pid_file: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match read_pid_file(pid_file) {
            None => return true,
            Some(pid) if !is_process_alive(pid) => return true,
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Read back the launch arguments the agent recorded at its last startup
/// (see module docs). Absent or unparseable means start with no arguments —
/// the best this module can do without a real service manager.
pub fn read_launch_args(args_file: &Path) -> Vec<String> {
    std::fs::read_to_string(args_file)
        .ok()
        .and_then(|contents| serde_json::from_str::<Vec<String>>(&contents).ok())
        .unwrap_or_default()
}

/// Persist `args` to `args_file` as a JSON array. Step 4's directory swap
/// deletes the agent's own copy of this file along with everything else
/// under `install_dir`; callers that read it beforehand use this to put it
/// back before step 5 replays it.
pub fn write_launch_args(args_file: &Path, args: &[String]) -> std::io::Result<()> {
    let json = serde_json::to_vec(args).unwrap_or_default();
    std::fs::write(args_file, json)
}

/// Spawn the agent binary detached (the companion does not wait on it),
/// replaying the given launch arguments.
pub fn spawn_agent(agent_binary: &Path, args: &[String]) -> std::io::Result<Child> {
    Command::new(agent_binary).args(args).kill_on_drop(false).spawn()
}

/// Poll until either the spawned child exits early (start failure) or the
/// new agent has written its own PID file with a matching PID (running
/// confirmed), bounded by `timeout`.
pub async fn wait_for_running(child: &mut Child, pid_file: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let expected_pid = child.id();
    loop {
        if let Ok(Some(_status)) = child.try_wait() {
            return false;
        }
        if let (Some(expected), Some(written)) = (expected_pid, read_pid_file(pid_file)) {
            if expected == written {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Watch a running child for `period`; returns `false` if it exits early.
pub async fn watch_stays_alive(child: &mut Child, period: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + period;
    loop {
        if let Ok(Some(_status)) = child.try_wait() {
            return false;
        }
        if tokio::time::Instant::now() >= deadline {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Stop a running new-agent process for rollback (spec §4.10.1).
pub async fn stop_child(child: &mut Child) {
    let _ = child.kill().await;
}
