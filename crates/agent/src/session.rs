// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Controller (spec §4.6): owns the process lifecycle end to end —
//! single-instance lock, identity load, channel bring-up, the startup
//! sequence (update check, then hardware-info), steady-state concurrent
//! subsystems, and graceful shutdown. Owns a root
//! [`CancellationToken`], cloned into a child token per subsystem, matching
//! the teacher's shutdown propagation in `bridge.rs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::types::UpdateDescriptor;
use crate::api::{ApiClient, RetryPolicy};
use crate::auth::SharedToken;
use crate::channel::{ChannelState, EmitOutcome, EventChannel, EventChannelConfig, InboundEvent, OutboundEvent};
use crate::commands::handlers::build_registry;
use crate::commands::{CommandPipeline, CommandResult};
use crate::config::Config;
use crate::error::AgentError;
use crate::identity::seal::{MachineSealer, TokenSealer};
use crate::identity::IdentityStore;
use crate::ignore_list::VersionIgnoreList;
use crate::queue::{caps_from_config, OfflineQueue};
use crate::singleton::{self, PidFile, SingleInstanceLock};
use crate::telemetry::{ProcResourceSampler, ResourceSampler, TelemetryProducer};
use crate::update::UpdateManager;

/// How the process's `main` should exit after [`run`] returns.
pub enum ExitReason {
    /// Shut down normally (operator signal, or the Update Manager handed
    /// off to the updater companion and requested this process stop).
    Shutdown,
    /// No identity record exists yet; the agent must be configured out of
    /// band (spec §8 scenario 1) before it can run.
    RequiresConfiguration,
}

/// How long shutdown waits for steady-state tasks to notice cancellation
/// and stop before the process exits anyway.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize tracing from config. Uses `try_init` so it is safe to call
/// more than once (tests, re-entry). When `log_dir` is configured, logs
/// additionally go to a daily-rotated file there (one of the `get_logs`
/// command's designated collection targets); otherwise only stdout.
///
/// Returns the non-blocking writer's guard; dropping it flushes pending
/// file writes, so the caller must hold it for the process lifetime.
pub fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.log_format == "json";

    let Some(log_dir) = config.log_dir.as_ref() else {
        let result = if json { fmt::fmt().with_env_filter(filter()).json().try_init() } else { fmt::fmt().with_env_filter(filter()).try_init() };
        drop(result);
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "agent.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stdout);
    let result = if json {
        fmt::fmt().with_env_filter(filter()).json().with_writer(writer).try_init()
    } else {
        fmt::fmt().with_env_filter(filter()).with_writer(writer).try_init()
    };
    drop(result);
    Some(guard)
}

/// Run one full agent session to completion (spec §4.6).
pub async fn run(config: Config) -> Result<ExitReason, AgentError> {
    let _lock = SingleInstanceLock::acquire(&config.data_dir)?;
    // The Updater Companion (§4.10) does not link against this crate; it
    // learns which process to wait on from this file instead.
    let _pid_file = PidFile::write(&config.install_dir)?;
    // Step 5 of §4.10 has no real service manager to ask how to restart
    // this process; record our own argv so the updater companion can.
    singleton::write_launch_args(&config.install_dir)?;

    let sealer: Arc<dyn TokenSealer> =
        Arc::new(MachineSealer::open_or_create(&config.identity_dir().join("machine.key"))?);
    let identity_store = IdentityStore::new(&config.identity_dir(), Arc::clone(&sealer));

    let Some(identity) = identity_store.load()? else {
        error!("no identity record found; run configure to register this agent before starting it");
        return Ok(ExitReason::RequiresConfiguration);
    };
    let token_plaintext = identity.unseal_token(sealer.as_ref())?;
    let token = SharedToken::new(token_plaintext.clone());

    let retry_policy = RetryPolicy::from_config(config.max_retries, config.initial_delay_seconds);
    let api = Arc::new(ApiClient::new(
        config.server_url.clone(),
        Duration::from_secs(30),
        retry_policy,
    )?);

    let status_caps = caps_from_config(config.max_size_mb, config.max_age_hours, config.status_reports_max_count);
    let command_result_caps =
        caps_from_config(config.max_size_mb, config.max_age_hours, config.command_results_max_count);
    let error_report_caps =
        caps_from_config(config.max_size_mb, config.max_age_hours, config.error_reports_max_count);
    let queue = Arc::new(OfflineQueue::open(&config.queue_dir(), status_caps, command_result_caps, error_report_caps));

    let ignore_list = Arc::new(VersionIgnoreList::new(&config.update_dir()));

    let root_cancel = CancellationToken::new();
    spawn_signal_handler(root_cancel.clone());

    let channel_config = EventChannelConfig {
        url: config.effective_channel_url(),
        agent_id: identity.agent_id.clone(),
        token: token_plaintext,
        backoff: crate::channel::BackoffPolicy {
            initial: Duration::from_secs(config.reconnect_delay_initial_sec),
            max: Duration::from_secs(config.reconnect_delay_max_sec),
            attempts_max: config.reconnect_attempts_max,
        },
    };
    let channel = Arc::new(EventChannel::connect(channel_config, root_cancel.child_token()));

    let update_manager = Arc::new(UpdateManager::new(
        Arc::clone(&api),
        token.clone(),
        Arc::clone(&channel),
        Arc::clone(&queue),
        Arc::clone(&ignore_list),
        config.update_dir(),
        config.install_dir.clone(),
        config.service_wait_timeout_sec,
        config.watchdog_period_sec,
        env!("CARGO_PKG_VERSION").to_owned(),
    ));

    if !channel.wait_for_connected().await {
        error!(
            "event channel entered Suspended mode before ever reaching Connected; \
             if this was an authentication rejection, an operator must run configure to re-register this agent"
        );
        root_cancel.cancelled().await;
        return Ok(ExitReason::Shutdown);
    }

    update_manager.check_and_maybe_update(&root_cancel).await;
    if root_cancel.is_cancelled() {
        info!("update handoff in progress; skipping hardware-info and steady state");
        return Ok(ExitReason::Shutdown);
    }

    let hardware_info = crate::hardware::collect();
    if let Err(e) = api.report_hardware_info(&token.get().await, &hardware_info).await {
        warn!(error = %e, "hardware-info upload failed; continuing into steady state anyway");
    }

    let handlers = build_registry(Arc::clone(&api), token.clone(), config.log_paths.clone());
    let (pipeline, intake_rx) = CommandPipeline::new(
        config.max_queue_size,
        config.max_parallel_commands,
        config.default_timeout_sec,
        config.console_encoding.clone(),
        handlers,
        Arc::clone(&channel),
        Arc::clone(&queue),
    );
    let pipeline = Arc::new(pipeline);

    // "primary-disk usage" (spec §4.8) is the root filesystem; there is no
    // separate config key naming a disk to watch.
    let sampler: Arc<dyn ResourceSampler> = Arc::new(ProcResourceSampler::new(std::path::PathBuf::from("/")));
    let telemetry = TelemetryProducer::new(
        sampler,
        Duration::from_secs(config.status_report_interval_sec),
        Arc::clone(&channel),
        Arc::clone(&queue),
    );

    // A subsystem-level cancel that fires on either full shutdown or a
    // persistent auth failure (spec §4.6: Suspended mode stops authenticated
    // traffic but leaves the process itself running).
    let suspended = CancellationToken::new();
    let authenticated_cancel = root_cancel.child_token();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    handles.push(tokio::spawn(run_suspension_monitor(Arc::clone(&channel), suspended.clone())));
    handles.push(tokio::spawn({
        let root = root_cancel.clone();
        let suspended = suspended.clone();
        let authenticated = authenticated_cancel.clone();
        async move {
            tokio::select! {
                _ = root.cancelled() => {}
                _ = suspended.cancelled() => {}
            }
            authenticated.cancel();
        }
    }));

    handles.push(tokio::spawn(pipeline.clone().run(intake_rx, authenticated_cancel.clone())));
    handles.push(tokio::spawn(telemetry.run(authenticated_cancel.clone())));
    handles.push(tokio::spawn(run_inbound_loop(
        Arc::clone(&channel),
        Arc::clone(&pipeline),
        Arc::clone(&update_manager),
        root_cancel.clone(),
        authenticated_cancel.clone(),
    )));
    handles.push(tokio::spawn(run_status_drain(Arc::clone(&queue), Arc::clone(&channel), authenticated_cancel.clone())));
    handles.push(tokio::spawn(run_command_result_drain(
        Arc::clone(&queue),
        Arc::clone(&channel),
        authenticated_cancel.clone(),
    )));
    handles.push(tokio::spawn(run_error_report_drain(
        Arc::clone(&queue),
        Arc::clone(&api),
        token.clone(),
        authenticated_cancel.clone(),
    )));
    if config.enable_auto_update {
        handles.push(tokio::spawn(run_periodic_update_checker(
            Arc::clone(&update_manager),
            Duration::from_secs(config.auto_update_interval_sec),
            root_cancel.clone(),
            authenticated_cancel.clone(),
        )));
    }

    root_cancel.cancelled().await;
    info!("shutdown signaled; waiting for steady-state subsystems to drain");
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, futures_util::future::join_all(handles)).await;

    Ok(ExitReason::Shutdown)
}

/// First SIGTERM/SIGINT requests graceful shutdown; a second forces exit,
/// in case a stuck subsystem ignores the first (teacher's `run.rs` pattern).
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        cancel.cancel();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

async fn run_suspension_monitor(channel: Arc<EventChannel>, suspended: CancellationToken) {
    loop {
        match channel.changed().await {
            ChannelState::Suspended => {
                error!(
                    "event channel entered Suspended mode after a persistent authentication failure; \
                     operator must run configure to re-register this agent"
                );
                suspended.cancel();
                break;
            }
            ChannelState::Closing => break,
            _ => {}
        }
    }
}

async fn run_inbound_loop(
    channel: Arc<EventChannel>,
    pipeline: Arc<CommandPipeline>,
    update_manager: Arc<UpdateManager>,
    update_cancel: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = channel.recv() => {
                match event {
                    Some(InboundEvent::CommandExecute(command)) => pipeline.submit(command).await,
                    Some(InboundEvent::NewVersionAvailable { version, download_url, checksum_sha256, notes }) => {
                        let descriptor = UpdateDescriptor { version, download_url, checksum_sha256, notes };
                        update_manager.maybe_update(descriptor, &update_cancel).await;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn run_status_drain(queue: Arc<OfflineQueue>, channel: Arc<EventChannel>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if channel.state() != ChannelState::Connected {
            continue;
        }
        loop {
            let item = match queue.status.dequeue().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read status queue partition");
                    break;
                }
            };
            let event = OutboundEvent::StatusUpdate {
                cpu_usage: item.payload.cpu_usage,
                ram_usage: item.payload.ram_usage,
                disk_usage: item.payload.disk_usage,
            };
            if channel.emit(event) != EmitOutcome::Sent {
                let _ = queue.status.requeue(item).await;
                break;
            }
        }
    }
}

async fn run_command_result_drain(queue: Arc<OfflineQueue>, channel: Arc<EventChannel>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if channel.state() != ChannelState::Connected {
            continue;
        }
        loop {
            let item = match queue.command_results.dequeue().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read command-result queue partition");
                    break;
                }
            };
            let result: CommandResult = item.payload.clone();
            let event = OutboundEvent::CommandResult {
                command_id: result.command_id,
                command_type: result.command_type,
                success: result.success,
                result: result.result,
            };
            if channel.emit(event) != EmitOutcome::Sent {
                let _ = queue.command_results.requeue(item).await;
                break;
            }
        }
    }
}

/// `report-error` is delivered over the request protocol, not the Event
/// Channel (spec §4.4's table), so this drain retries via the API Client
/// rather than `channel.emit`.
async fn run_error_report_drain(queue: Arc<OfflineQueue>, api: Arc<ApiClient>, token: SharedToken, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        loop {
            let item = match queue.error_reports.dequeue().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read error-report queue partition");
                    break;
                }
            };
            let current_token = token.get().await;
            if let Err(e) = api.report_error(&current_token, &item.payload).await {
                warn!(error = %e, "failed to redeliver queued error report; requeueing");
                let _ = queue.error_reports.requeue(item).await;
                break;
            }
        }
    }
}

/// `update_cancel` is the root shutdown token (a successful handoff cancels
/// the whole process); `stop` is the authenticated-traffic token that also
/// halts this checker while the channel is Suspended (spec §4.6: Suspended
/// mode ceases *all* outbound authenticated traffic, not just the channel's).
async fn run_periodic_update_checker(
    update_manager: Arc<UpdateManager>,
    period: Duration,
    update_cancel: CancellationToken,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        update_manager.check_and_maybe_update(&update_cancel).await;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
