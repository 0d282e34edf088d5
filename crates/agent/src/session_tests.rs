// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::Duration;

use super::*;
use crate::api::RetryPolicy;
use crate::channel::ChannelState;
use crate::commands::{Command, CommandPipeline, CommandResultPayload, CommandType};
use crate::queue::{caps_from_config, OfflineQueue, StatusSample};

fn generous_caps() -> crate::queue::PartitionCaps {
    caps_from_config(50, 72, 500)
}

fn open_queue() -> Arc<OfflineQueue> {
    let dir = tempfile::tempdir().unwrap();
    Arc::new(OfflineQueue::open(dir.path(), generous_caps(), generous_caps(), generous_caps()))
}

#[tokio::test]
async fn status_drain_sends_queued_samples_once_connected() {
    let queue = open_queue();
    queue.status.enqueue(StatusSample { cpu_usage: 1.0, ram_usage: 2.0, disk_usage: 3.0 }).await.unwrap();

    let (channel, state_tx, mut outbound_rx) = EventChannel::for_tests();
    state_tx.send(ChannelState::Connected).unwrap();
    let channel = Arc::new(channel);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_status_drain(Arc::clone(&queue), Arc::clone(&channel), cancel.clone()));
    let event = tokio::time::timeout(Duration::from_secs(2), outbound_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, OutboundEvent::StatusUpdate { cpu_usage, .. } if cpu_usage == 1.0));
    assert!(queue.status.is_empty().unwrap());

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
}

#[tokio::test]
async fn status_drain_leaves_the_queue_alone_while_disconnected() {
    let queue = open_queue();
    queue.status.enqueue(StatusSample { cpu_usage: 1.0, ram_usage: 2.0, disk_usage: 3.0 }).await.unwrap();

    let (channel, _state_tx, _outbound_rx) = EventChannel::for_tests();
    let channel = Arc::new(channel);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_status_drain(Arc::clone(&queue), channel, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), task).await;

    assert_eq!(queue.status.len().unwrap(), 1);
}

#[tokio::test]
async fn command_result_drain_sends_queued_results_once_connected() {
    let queue = open_queue();
    let result = crate::commands::CommandResult {
        command_id: "c1".into(),
        command_type: CommandType::Console,
        success: true,
        result: CommandResultPayload { stdout: "ok".into(), exit_code: Some(0), ..Default::default() },
    };
    queue.command_results.enqueue(result).await.unwrap();

    let (channel, state_tx, mut outbound_rx) = EventChannel::for_tests();
    state_tx.send(ChannelState::Connected).unwrap();
    let channel = Arc::new(channel);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_command_result_drain(Arc::clone(&queue), Arc::clone(&channel), cancel.clone()));
    let event = tokio::time::timeout(Duration::from_secs(2), outbound_rx.recv()).await.unwrap().unwrap();
    match event {
        OutboundEvent::CommandResult { command_id, .. } => assert_eq!(command_id, "c1"),
        other => panic!("expected CommandResult, got {other:?}"),
    }
    assert!(queue.command_results.is_empty().unwrap());

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
}

#[tokio::test]
async fn error_report_drain_requeues_when_the_api_call_fails() {
    let queue = open_queue();
    queue
        .error_reports
        .enqueue(crate::api::types::ErrorReport {
            error_code: "E1".into(),
            message: "boom".into(),
            context: "test".into(),
            occurred_at_ms: 0,
        })
        .await
        .unwrap();

    let api = Arc::new(ApiClient::new("http://127.0.0.1:1", Duration::from_millis(200), RetryPolicy::none()).unwrap());
    let token = SharedToken::new("tok".into());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_error_report_drain(Arc::clone(&queue), api, token, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), task).await;

    // the connection refusal requeues the item rather than dropping it
    assert_eq!(queue.error_reports.len().unwrap(), 1);
}

#[tokio::test]
async fn inbound_loop_dispatches_command_execute_to_the_pipeline() {
    let queue = open_queue();
    let (command_channel, command_state_tx, mut command_outbound_rx) = EventChannel::for_tests();
    command_state_tx.send(ChannelState::Connected).unwrap();
    let command_channel = Arc::new(command_channel);

    let handlers: HashMap<CommandType, crate::commands::pipeline::Handler> = HashMap::new();
    let (pipeline, intake_rx) =
        CommandPipeline::new(8, 2, 5, "utf-8".into(), handlers, Arc::clone(&command_channel), Arc::clone(&queue));
    let pipeline = Arc::new(pipeline);
    let pipeline_cancel = CancellationToken::new();
    let pipeline_task = tokio::spawn(Arc::clone(&pipeline).run(intake_rx, pipeline_cancel.clone()));

    let api = Arc::new(ApiClient::new("http://127.0.0.1:1", Duration::from_millis(200), RetryPolicy::none()).unwrap());
    let update_manager = Arc::new(UpdateManager::new(
        Arc::clone(&api),
        SharedToken::new("tok".into()),
        Arc::clone(&command_channel),
        Arc::clone(&queue),
        Arc::new(VersionIgnoreList::new(&tempfile::tempdir().unwrap().into_path())),
        tempfile::tempdir().unwrap().into_path(),
        tempfile::tempdir().unwrap().into_path(),
        60,
        120,
        "0.0.0".into(),
    ));

    let (inbound_channel, _inbound_state_tx, inbound_tx) = EventChannel::for_tests_with_inbound();
    let inbound_channel = Arc::new(inbound_channel);
    let root_cancel = CancellationToken::new();
    let stop_cancel = CancellationToken::new();
    let inbound_task = tokio::spawn(run_inbound_loop(
        Arc::clone(&inbound_channel),
        Arc::clone(&pipeline),
        update_manager,
        root_cancel.clone(),
        stop_cancel.clone(),
    ));

    inbound_tx
        .send(InboundEvent::CommandExecute(Command {
            command_id: "c1".into(),
            command: "echo hi".into(),
            command_type: CommandType::Console,
            parameters: HashMap::new(),
        }))
        .unwrap();

    // no Console handler is registered, so the pipeline reports unsupported_type
    let event = tokio::time::timeout(Duration::from_secs(2), command_outbound_rx.recv()).await.unwrap().unwrap();
    match event {
        OutboundEvent::CommandResult { command_id, success, .. } => {
            assert_eq!(command_id, "c1");
            assert!(!success);
        }
        other => panic!("expected CommandResult, got {other:?}"),
    }

    stop_cancel.cancel();
    pipeline_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), inbound_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), pipeline_task).await;
}
