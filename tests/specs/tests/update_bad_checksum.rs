// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario 6 (spec §8): a downloaded package whose checksum doesn't match
//! the advertised one is a terminal failure for that version — reported
//! over the event channel and added to the ignore list, never handed off
//! to the updater companion.

use std::time::Duration;

use agent_specs::{write_identity_fixture, AgentProcess, MockServer};

#[tokio::test]
async fn checksum_mismatch_fails_the_update_and_ignores_the_version() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;

    let mock = MockServer::start().await?;
    let bad_checksum = "0".repeat(64);
    mock.set_package("bad-package.zip", b"not actually the right bytes".to_vec()).await;
    mock.set_update_available("9.9.9", "bad-package.zip", &bad_checksum).await;

    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;

    let failed = mock
        .wait_for_channel_message(
            |v| {
                v.get("type").and_then(|t| t.as_str()) == Some("agent:update_status")
                    && v.get("status").and_then(|s| s.as_str()) == Some("update_failed")
            },
            Duration::from_secs(10),
        )
        .await
        .expect("no update_failed status arrived");
    assert_eq!(failed["target_version"], "9.9.9");

    let ignore_list_path = data_dir.path().join("update").join("ignored_versions.json");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut found = false;
    while tokio::time::Instant::now() < deadline {
        if ignore_list_path.exists() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(found, "version was never recorded to the ignore list");
    let ignore_list: serde_json::Value = serde_json::from_slice(&std::fs::read(&ignore_list_path)?)?;
    assert!(ignore_list["versions"]["9.9.9"].is_object(), "9.9.9 should be recorded in the ignore list: {ignore_list}");

    // The agent is still running (it never handed off to the updater
    // companion); the process itself must not have exited.
    assert!(agent.id().is_some());
    agent.terminate().await;
    Ok(())
}
