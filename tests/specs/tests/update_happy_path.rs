// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario 5 (spec §8): a successful update — download, checksum, extract,
//! hand off to the updater companion, and the agent shuts down so the
//! companion can swap in the new files and start the replacement process.

use std::time::Duration;

use agent_specs::{build_update_package_zip, install_binaries, write_identity_fixture, AgentProcess, MockServer};

#[tokio::test]
async fn successful_update_hands_off_and_the_new_agent_comes_up() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;
    install_binaries(install_dir.path())?;

    let mock = MockServer::start().await?;
    let (package_bytes, checksum) = build_update_package_zip(true)?;
    mock.set_package("agent-9.9.9.zip", package_bytes).await;
    mock.set_update_available("9.9.9", "agent-9.9.9.zip", &checksum).await;

    // Shorten the companion's own waits so the whole handoff fits in a test
    // timeout; the companion is a detached process the test never tracks
    // directly once it's spawned.
    let mut agent = AgentProcess::spawn_with_args(
        data_dir.path(),
        install_dir.path(),
        &mock.base_url(),
        &["--service-wait-timeout-sec", "15", "--watchdog-period-sec", "2"],
    )?;
    let original_pid = agent.id().expect("agent must have a pid right after spawning");

    let started = mock
        .wait_for_channel_message(
            |v| {
                v.get("type").and_then(|t| t.as_str()) == Some("agent:update_status")
                    && v.get("status").and_then(|s| s.as_str()) == Some("update_started")
            },
            Duration::from_secs(10),
        )
        .await;
    assert!(started.is_some(), "no update_started status arrived");

    // Handing off cancels the agent's own root token, which unwinds it to a
    // clean `ExitReason::Shutdown` (exit code 0) rather than a crash.
    let status = agent.wait_exit(Duration::from_secs(15)).await?;
    assert_eq!(status.code(), Some(0), "agent should exit cleanly after handing off to the updater");

    // The updater companion now owns the install: it swaps in the new
    // files and restarts the agent under the same `agent.pid` contract.
    // Poll for a pid file naming a process other than the one that exited.
    let pid_path = install_dir.path().join("agent.pid");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut new_pid = None;
    while tokio::time::Instant::now() < deadline {
        if let Ok(contents) = tokio::fs::read_to_string(&pid_path).await {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if pid != original_pid {
                    new_pid = Some(pid);
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let new_pid = new_pid.expect("a new agent process never recorded its pid after the update");
    assert_ne!(new_pid, original_pid, "the restarted agent must be a different process");

    // The restarted agent reconnects to the same mock server.
    assert!(mock.wait_for_channel_connected(Duration::from_secs(15)).await, "restarted agent never reconnected");

    // The updater companion cleans up its backup once the new agent has
    // proven itself running; give it a moment to finish and check it left
    // no backup directory behind under install_dir.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let leftover_backup = std::fs::read_dir(install_dir.path())?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("backup-"));
    assert!(!leftover_backup, "updater should remove its backup directory after a successful update");

    kill_pid(new_pid);
    Ok(())
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}
