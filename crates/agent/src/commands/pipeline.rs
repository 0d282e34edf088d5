// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Pipeline dispatcher (spec §4.7): bounded intake, a worker pool
//! of up to `MaxParallelCommands`, and a `CommandType`-keyed handler
//! registry (replacing handler inheritance per the design note of spec §9).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{Command, CommandResult, CommandType};
use crate::channel::{EmitOutcome, EventChannel, OutboundEvent};
use crate::queue::OfflineQueue;

/// Everything a handler needs to execute one command.
pub struct CommandContext {
    pub command: Command,
    pub deadline: Duration,
    pub console_encoding: String,
}

pub type Handler = Arc<dyn Fn(CommandContext) -> Pin<Box<dyn Future<Output = CommandResult> + Send>> + Send + Sync>;

/// Bounded intake queue plus worker pool. Construction takes ownership of
/// the registry; handlers are registered once at startup.
pub struct CommandPipeline {
    intake_tx: mpsc::Sender<Command>,
    max_parallel: usize,
    default_timeout_sec: u64,
    console_encoding: String,
    handlers: Arc<HashMap<CommandType, Handler>>,
    channel: Arc<EventChannel>,
    queue: Arc<OfflineQueue>,
}

impl CommandPipeline {
    pub fn new(
        max_queue_size: usize,
        max_parallel: usize,
        default_timeout_sec: u64,
        console_encoding: String,
        handlers: HashMap<CommandType, Handler>,
        channel: Arc<EventChannel>,
        queue: Arc<OfflineQueue>,
    ) -> (Self, mpsc::Receiver<Command>) {
        let (intake_tx, intake_rx) = mpsc::channel(max_queue_size.max(1));
        (
            Self {
                intake_tx,
                max_parallel,
                default_timeout_sec,
                console_encoding,
                handlers: Arc::new(handlers),
                channel,
                queue,
            },
            intake_rx,
        )
    }

    /// Accept a freshly-arrived command. Rejects immediately (never waits)
    /// when the intake queue is full.
    pub async fn submit(&self, command: Command) {
        let command_id = command.command_id.clone();
        let command_type = command.command_type.clone();
        if self.intake_tx.try_send(command).is_err() {
            warn!(command_id, "command intake queue full; rejecting");
            let result = CommandResult::queue_full(command_id, command_type);
            self.emit_result(result).await;
        }
    }

    /// Run `MaxParallelCommands` workers draining `intake_rx` until
    /// `cancel` fires. Workers never block the intake loop: each dispatched
    /// command runs on its own task.
    pub async fn run(self: Arc<Self>, mut intake_rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_parallel));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = intake_rx.recv() => {
                    let Some(command) = command else { break };
                    let permit = Arc::clone(&semaphore).acquire_owned().await;
                    let pipeline = Arc::clone(&self);
                    let worker_cancel = cancel.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        pipeline.dispatch(command, worker_cancel).await;
                    });
                }
            }
        }
    }

    async fn dispatch(&self, command: Command, cancel: CancellationToken) {
        let command_id = command.command_id.clone();
        let timeout = Duration::from_secs(command.timeout_sec(self.default_timeout_sec));
        let Some(handler) = self.handlers.get(&command.command_type).cloned() else {
            self.emit_result(CommandResult::unsupported_type(command_id, command.command_type.clone())).await;
            return;
        };

        let context =
            CommandContext { command: command.clone(), deadline: timeout, console_encoding: self.console_encoding.clone() };

        let result = tokio::select! {
            _ = cancel.cancelled() => CommandResult::timeout(command_id.clone(), command.command_type.clone()),
            outcome = tokio::time::timeout(timeout, handler(context)) => match outcome {
                Ok(result) => result,
                Err(_) => CommandResult::timeout(command_id.clone(), command.command_type.clone()),
            },
        };

        debug!(command_id, success = result.success, "command finished");
        self.emit_result(result).await;
    }

    /// Emit path shared by all command outcomes (spec §4.7): try the Event
    /// Channel, fall back to the Offline Queue's command-result partition.
    async fn emit_result(&self, result: CommandResult) {
        let event = OutboundEvent::CommandResult {
            command_id: result.command_id.clone(),
            command_type: result.command_type.clone(),
            success: result.success,
            result: result.result.clone(),
        };
        if self.channel.emit(event) == EmitOutcome::Sent {
            return;
        }
        if let Err(e) = self.queue.command_results.enqueue(result).await {
            warn!(error = %e, "failed to enqueue command result after channel emit failed");
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
