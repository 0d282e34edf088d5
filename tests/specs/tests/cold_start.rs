// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario 1 (spec §8): cold start with and without an identity record.

use std::time::Duration;

use agent_specs::{agent_binary, write_identity_fixture, AgentProcess, MockServer};
use tokio::process::Command;

#[tokio::test]
async fn cold_start_without_identity_requires_configuration() -> anyhow::Result<()> {
    let binary = agent_binary();
    anyhow::ensure!(binary.exists(), "agent binary not found at {}; run `cargo build` first", binary.display());

    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;

    let status = Command::new(&binary)
        .arg("--server-url")
        .arg("http://127.0.0.1:1")
        .arg("--data-dir")
        .arg(data_dir.path())
        .arg("--install-dir")
        .arg(install_dir.path())
        .status()
        .await?;

    assert_eq!(status.code(), Some(3));
    Ok(())
}

#[tokio::test]
async fn cold_start_with_identity_reaches_steady_state() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;

    let mock = MockServer::start().await?;
    mock.set_no_update().await;

    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;

    assert!(mock.wait_for_channel_connected(Duration::from_secs(10)).await, "channel never connected");

    let check_update = mock.wait_for_request("/check-update", Duration::from_secs(10)).await;
    let check_update = check_update.expect("agent never issued a check-update request");
    assert_eq!(check_update.method, "GET");
    assert_eq!(check_update.authorization.as_deref(), Some("Bearer test-token"));
    assert!(check_update.query.contains("current_version="));

    let hardware_info = mock.wait_for_request("/hardware-info", Duration::from_secs(10)).await;
    let hardware_info = hardware_info.expect("agent never issued a hardware-info request");
    assert_eq!(hardware_info.method, "POST");
    assert_eq!(hardware_info.authorization.as_deref(), Some("Bearer test-token"));

    agent.terminate().await;
    Ok(())
}
