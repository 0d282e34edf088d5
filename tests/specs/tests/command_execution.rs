// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenarios 2 and 3 (spec §8): a pushed `command:execute` that succeeds,
//! and one that blows its deadline.

use std::time::Duration;

use agent_specs::{write_identity_fixture, AgentProcess, MockServer};
use serde_json::json;

#[tokio::test]
async fn console_command_succeeds_and_reports_its_output() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-1", "test-token").await?;

    let mock = MockServer::start().await?;
    mock.set_no_update().await;
    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;
    assert!(mock.wait_for_channel_connected(Duration::from_secs(10)).await, "channel never connected");

    mock.push_inbound(json!({
        "type": "command:execute",
        "commandId": "cmd-1",
        "command": "echo hello-from-agent",
        "commandType": "console",
        "parameters": {},
    }))
    .await;

    let result = mock
        .wait_for_channel_message(
            |v| v.get("type").and_then(|t| t.as_str()) == Some("agent:command_result"),
            Duration::from_secs(10),
        )
        .await
        .expect("no command result arrived");

    assert_eq!(result["commandId"], "cmd-1");
    assert_eq!(result["success"], true);
    assert_eq!(result["result"]["exitCode"], 0);
    assert!(result["result"]["stdout"].as_str().unwrap_or_default().contains("hello-from-agent"));

    agent.terminate().await;
    Ok(())
}

#[tokio::test]
async fn console_command_that_outlives_its_deadline_is_reported_as_a_timeout() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    let install_dir = tempfile::tempdir()?;
    write_identity_fixture(data_dir.path(), "agent-2", "test-token").await?;

    let mock = MockServer::start().await?;
    mock.set_no_update().await;
    let mut agent = AgentProcess::spawn(data_dir.path(), install_dir.path(), &mock.base_url())?;
    assert!(mock.wait_for_channel_connected(Duration::from_secs(10)).await, "channel never connected");

    mock.push_inbound(json!({
        "type": "command:execute",
        "commandId": "cmd-timeout",
        "command": "sleep 30",
        "commandType": "console",
        "parameters": { "timeout_sec": 2 },
    }))
    .await;

    let result = mock
        .wait_for_channel_message(
            |v| v.get("commandId").and_then(|c| c.as_str()) == Some("cmd-timeout"),
            Duration::from_secs(15),
        )
        .await
        .expect("no command result arrived for the timed-out command");

    assert_eq!(result["success"], false);
    assert_eq!(result["result"]["errorCode"], "timeout");

    agent.terminate().await;
    Ok(())
}
