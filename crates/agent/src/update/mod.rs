// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update Manager (spec §4.9): check, download, verify, extract, and hand
//! off to the updater companion. A process-wide mutex refuses concurrent
//! update sessions outright rather than queuing them.

mod extract;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::types::{ErrorReport, UpdateDescriptor};
use crate::api::ApiClient;
use crate::auth::SharedToken;
use crate::channel::{EmitOutcome, EventChannel, OutboundEvent};
use crate::error::AgentError;
use crate::ignore_list::VersionIgnoreList;
use crate::queue::OfflineQueue;

const UPDATER_BINARY_NAME: &str = "agent-updater";

/// Everything the Update Manager needs that isn't per-call.
pub struct UpdateManager {
    api: Arc<ApiClient>,
    token: SharedToken,
    channel: Arc<EventChannel>,
    queue: Arc<OfflineQueue>,
    ignore_list: Arc<VersionIgnoreList>,
    update_dir: PathBuf,
    install_dir: PathBuf,
    service_wait_timeout_sec: u64,
    watchdog_period_sec: u64,
    current_version: String,
    /// Refuses concurrent update sessions (spec §4.9's Guard); `try_lock`
    /// makes the refusal immediate rather than queuing the second request.
    session_lock: Mutex<()>,
}

impl UpdateManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<ApiClient>,
        token: SharedToken,
        channel: Arc<EventChannel>,
        queue: Arc<OfflineQueue>,
        ignore_list: Arc<VersionIgnoreList>,
        update_dir: PathBuf,
        install_dir: PathBuf,
        service_wait_timeout_sec: u64,
        watchdog_period_sec: u64,
        current_version: String,
    ) -> Self {
        Self {
            api,
            token,
            channel,
            queue,
            ignore_list,
            update_dir,
            install_dir,
            service_wait_timeout_sec,
            watchdog_period_sec,
            current_version,
            session_lock: Mutex::new(()),
        }
    }

    /// Poll `check-update` and, if a non-ignored version is available,
    /// attempt the update session. Called periodically, once on initial
    /// `Connected`, and on every `agent:new_version_available` push.
    pub async fn check_and_maybe_update(&self, cancel: &CancellationToken) {
        let token = self.token.get().await;
        let outcome = match self.api.check_update(&token, &self.current_version).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "check-update request failed");
                return;
            }
        };
        let crate::api::types::CheckUpdateOutcome::Available(descriptor) = outcome else {
            return;
        };
        self.maybe_update(descriptor, cancel).await;
    }

    /// Entry point for a server-pushed `agent:new_version_available` event,
    /// which carries the descriptor directly instead of requiring a
    /// round-trip `check-update` call.
    pub async fn maybe_update(&self, descriptor: UpdateDescriptor, cancel: &CancellationToken) {
        match self.ignore_list.is_ignored(&descriptor.version).await {
            Ok(true) => {
                info!(version = %descriptor.version, "update version is ignored; skipping without reporting");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "failed to consult version ignore list; skipping update this round");
                return;
            }
        }

        let Ok(guard) = self.session_lock.try_lock() else {
            warn!(version = %descriptor.version, "update session already in progress; refusing concurrent request");
            return;
        };
        self.run_update_session(descriptor, cancel).await;
        drop(guard);
    }

    async fn run_update_session(&self, descriptor: UpdateDescriptor, cancel: &CancellationToken) {
        let version = descriptor.version.clone();
        self.emit_update_status("update_started", &version, None).await;

        match self.run_update_steps(&descriptor, cancel).await {
            Ok(UpdateOutcome::HandedOff) => {
                info!(version = %version, "updater companion spawned; requesting agent shutdown");
                cancel.cancel();
            }
            Ok(UpdateOutcome::Cancelled) => {
                info!(version = %version, "update session cancelled by shutdown; version not added to ignore list");
            }
            Err(e) => {
                self.handle_update_failure(&version, &e).await;
            }
        }
    }

    async fn run_update_steps(&self, descriptor: &UpdateDescriptor, cancel: &CancellationToken) -> Result<UpdateOutcome, AgentError> {
        if cancel.is_cancelled() {
            return Ok(UpdateOutcome::Cancelled);
        }

        let token = self.token.get().await;
        let download_dir = self.download_dir(&descriptor.version);
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(|e| AgentError::DownloadFailed(format!("create {}: {e}", download_dir.display())))?;
        let package_path = download_dir.join("package.zip");
        // Step 2's error code is `download_failed` regardless of whether
        // the underlying cause was a transport-level or response-level
        // failure (`ApiClient::download_package` distinguishes the two
        // internally; this step does not).
        self.api
            .download_package(&token, &descriptor.download_url, &package_path)
            .await
            .map_err(|e| AgentError::DownloadFailed(e.to_string()))?;

        if cancel.is_cancelled() {
            return Ok(UpdateOutcome::Cancelled);
        }
        verify_checksum(&package_path, &descriptor.checksum_sha256).await?;

        if cancel.is_cancelled() {
            return Ok(UpdateOutcome::Cancelled);
        }
        let extracted_dir = self.extracted_dir(&descriptor.version);
        extract::extract_fresh(&package_path, &extracted_dir).await?;

        if cancel.is_cancelled() {
            return Ok(UpdateOutcome::Cancelled);
        }
        let updater_path = self.locate_updater(&extracted_dir);
        self.spawn_updater(&updater_path, &descriptor.version, &extracted_dir)?;

        Ok(UpdateOutcome::HandedOff)
    }

    /// Prefer the updater bundled in the extracted package; fall back to
    /// the one already installed (spec §4.9 step 5).
    fn locate_updater(&self, extracted_dir: &std::path::Path) -> PathBuf {
        let bundled = extracted_dir.join(UPDATER_BINARY_NAME);
        if bundled.is_file() {
            return bundled;
        }
        self.install_dir.join(UPDATER_BINARY_NAME)
    }

    fn spawn_updater(&self, updater_path: &std::path::Path, new_version: &str, extracted_dir: &std::path::Path) -> Result<(), AgentError> {
        let updater_log_dir = self.update_dir.join("updater-logs");
        tokio::process::Command::new(updater_path)
            .arg("--old-version")
            .arg(&self.current_version)
            .arg("--new-version")
            .arg(new_version)
            .arg("--source-path")
            .arg(extracted_dir)
            .arg("--service-wait-timeout-sec")
            .arg(self.service_wait_timeout_sec.to_string())
            .arg("--watchdog-period-sec")
            .arg(self.watchdog_period_sec.to_string())
            .arg("--install-dir")
            .arg(&self.install_dir)
            .arg("--log-dir")
            .arg(&updater_log_dir)
            .spawn()
            .map_err(|e| AgentError::UpdateLaunchFailed(format!("spawn {}: {e}", updater_path.display())))?;
        Ok(())
    }

    async fn handle_update_failure(&self, version: &str, error: &AgentError) {
        warn!(version, error = %error, "update session failed");
        self.emit_update_status("update_failed", version, Some(error.to_string())).await;
        let report = ErrorReport {
            error_code: error.error_code().to_owned(),
            message: error.to_string(),
            context: format!("update to version {version}"),
            occurred_at_ms: now_ms(),
        };
        let token = self.token.get().await;
        if let Err(e) = self.api.report_error(&token, &report).await {
            warn!(error = %e, "failed to report update failure live; enqueueing");
            if let Err(e) = self.queue.error_reports.enqueue(report).await {
                warn!(error = %e, "failed to enqueue update-failure error report");
            }
        }
        if error.is_terminal_for_version() {
            if let Err(e) = self.ignore_list.record_failure(version, error.error_code()).await {
                warn!(error = %e, "failed to record failed version in ignore list");
            }
        }
    }

    async fn emit_update_status(&self, status: &str, version: &str, message: Option<String>) {
        let event = OutboundEvent::UpdateStatus { status: status.to_owned(), target_version: version.to_owned(), message };
        if self.channel.emit(event) == EmitOutcome::Sent {
            return;
        }
        // `agent:update_status` has no offline-queue partition of its own
        // (spec §4.2 lists status/command-result/error-report only); a
        // missed status while disconnected is superseded by the next
        // `check-update` poll once reconnected, so it is dropped rather
        // than queued.
    }

    fn download_dir(&self, version: &str) -> PathBuf {
        self.update_dir.join("download").join(version)
    }

    fn extracted_dir(&self, version: &str) -> PathBuf {
        self.update_dir.join("extracted").join(version)
    }
}

enum UpdateOutcome {
    HandedOff,
    Cancelled,
}

async fn verify_checksum(package_path: &std::path::Path, expected: &str) -> Result<(), AgentError> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(package_path)
        .await
        .map_err(|e| AgentError::ChecksumMismatch { expected: expected.to_owned(), actual: format!("unreadable: {e}") })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| AgentError::ChecksumMismatch { expected: expected.to_owned(), actual: format!("read error: {e}") })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AgentError::ChecksumMismatch { expected: expected.to_owned(), actual })
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
