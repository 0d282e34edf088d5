// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario 4 (spec §8): telemetry keeps sampling while the event channel
//! is disconnected, queuing to the Offline Queue's status partition, and
//! drains once the channel reconnects.

use std::time::Duration;

use agent_specs::{count_queue_items, wait_for_queue_drained, write_identity_fixture, AgentProcess, MockServer};

#[tokio::test]
async fn telemetry_queues_while_disconnected_and_drains_on_reconnect() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;

    let mock = MockServer::start().await?;
    mock.set_no_update().await;
    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;
    assert!(mock.wait_for_channel_connected(Duration::from_secs(10)).await, "channel never connected");

    mock.hold_new_connections();
    mock.disconnect();
    assert!(mock.wait_for_channel_disconnected(Duration::from_secs(10)).await, "channel never noticed the disconnect");

    // status-report-interval-sec is 1 (set by AgentProcess::spawn); give the
    // telemetry producer time to attempt, and queue, several samples.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let queued = count_queue_items(data_dir.path(), "status");
    assert!(queued >= 2, "expected several queued status samples while disconnected, got {queued}");

    mock.release();
    assert!(mock.wait_for_channel_connected(Duration::from_secs(10)).await, "channel never reconnected");
    assert!(
        wait_for_queue_drained(data_dir.path(), "status", Duration::from_secs(10)).await,
        "queued status samples never drained after reconnecting"
    );

    agent.terminate().await;
    Ok(())
}
