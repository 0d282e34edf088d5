// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario 7 (spec §8): the server rejects the event channel handshake.
//! The agent settles into Suspended mode — it does not retry, and it does
//! not proceed into the startup sequence (no check-update, no
//! hardware-info) — but the process itself keeps running, waiting to be
//! reconfigured or stopped by an operator.

use std::time::Duration;

use agent_specs::{write_identity_fixture, AgentProcess, MockServer};

#[tokio::test]
async fn auth_rejection_suspends_the_agent_without_exiting() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;

    let mock = MockServer::start().await?;
    mock.reject_auth();

    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;

    // The channel never reaches Connected; give it a few seconds, which
    // would otherwise be plenty for the startup sequence to run.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(!mock.is_channel_connected(), "channel must never report connected after an auth rejection");
    assert!(
        mock.wait_for_request("/check-update", Duration::from_millis(200)).await.is_none(),
        "a suspended agent must never reach the check-update step"
    );
    assert!(
        mock.wait_for_request("/hardware-info", Duration::from_millis(200)).await.is_none(),
        "a suspended agent must never reach the hardware-info step"
    );

    // The process itself is still alive, waiting on a shutdown signal.
    let still_running = agent.wait_exit(Duration::from_millis(200)).await.is_err();
    assert!(still_running, "a suspended agent must keep running, not exit");

    agent.terminate().await;
    Ok(())
}
