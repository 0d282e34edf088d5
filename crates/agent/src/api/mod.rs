// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API Client (spec §4.4): a thin wrapper over the server-facing
//! request/response protocol. One method per endpoint; every method returns
//! a closed outer discriminator rather than a raw response body.

mod retry;
pub mod types;

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::AgentError;
pub use retry::RetryPolicy;
use types::{
    parse_auth_outcome, parse_check_update_outcome, AuthOutcome, CheckUpdateOutcome, ErrorReport, HardwareInfo,
    IdentifyRequest,
};

/// `reqwest::Client` wrapper over the server's request/response surface.
pub struct ApiClient {
    base_url: String,
    http: Client,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration, retry_policy: RetryPolicy) -> Result<Self, AgentError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("build http client: {e}")))?;
        Ok(Self { base_url: base_url.into(), http, retry_policy })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn apply_auth(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// `POST /identify`: submit room placement, receive a token or an MFA /
    /// position-conflict / unauthorized status. Not idempotent (spec
    /// §4.4.2 restricts retry to idempotent requests and stream downloads),
    /// so this is a single attempt — a 5xx here must not be resubmitted.
    pub async fn identify(&self, request: &IdentifyRequest) -> Result<AuthOutcome, AgentError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| AgentError::ProtocolMismatch(format!("encode identify request: {e}")))?;
        let resp = self
            .http
            .post(self.url("/identify"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let bytes = read_body(resp).await?;
        parse_auth_outcome(&bytes).map_err(|e| AgentError::ProtocolMismatch(e.to_string()))
    }

    /// `POST /verify-mfa`: submit an MFA code against a pending session.
    /// Not retried — resubmitting a code the server already consumed would
    /// burn an MFA attempt on what might only have been a transient 5xx.
    pub async fn verify_mfa(&self, session_id: &str, code: &str) -> Result<AuthOutcome, AgentError> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            session_id: &'a str,
            code: &'a str,
        }
        let body = serde_json::to_vec(&Body { session_id, code })
            .map_err(|e| AgentError::ProtocolMismatch(format!("encode verify-mfa request: {e}")))?;
        let resp = self
            .http
            .post(self.url("/verify-mfa"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let bytes = read_body(resp).await?;
        parse_auth_outcome(&bytes).map_err(|e| AgentError::ProtocolMismatch(e.to_string()))
    }

    /// `POST /hardware-info`: one-shot static hardware attribute upload.
    /// Not retried; a missed report is superseded by the next periodic one.
    pub async fn report_hardware_info(&self, token: &str, info: &HardwareInfo) -> Result<(), AgentError> {
        let body = serde_json::to_vec(info)
            .map_err(|e| AgentError::ProtocolMismatch(format!("encode hardware info: {e}")))?;
        let resp = Self::apply_auth(
            self.http.post(self.url("/hardware-info")).header("content-type", "application/json"),
            Some(token),
        )
        .body(body)
        .send()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
        expect_success(resp).await
    }

    /// `POST /report-error`: deliver a single error report, live or drained
    /// from the Offline Queue's error-report partition. Not retried — a
    /// failed live delivery falls back to the caller enqueuing it instead.
    pub async fn report_error(&self, token: &str, report: &ErrorReport) -> Result<(), AgentError> {
        let body = serde_json::to_vec(report)
            .map_err(|e| AgentError::ProtocolMismatch(format!("encode error report: {e}")))?;
        let resp = Self::apply_auth(
            self.http.post(self.url("/report-error")).header("content-type", "application/json"),
            Some(token),
        )
        .body(body)
        .send()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
        expect_success(resp).await
    }

    /// `GET /check-update`: poll for update availability.
    pub async fn check_update(&self, token: &str, current_version: &str) -> Result<CheckUpdateOutcome, AgentError> {
        retry::with_retry(self.retry_policy, "check_update", || async {
            let resp = Self::apply_auth(
                self.http.get(self.url("/check-update")).query(&[("current_version", current_version)]),
                Some(token),
            )
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
            let bytes = read_body(resp).await?;
            parse_check_update_outcome(&bytes).map_err(|e| AgentError::ProtocolMismatch(e.to_string()))
        })
        .await
    }

    /// `POST /logs`: upload a compressed log archive, returning the
    /// server-assigned reference used in the command result.
    pub async fn upload_logs(&self, token: &str, archive_path: &Path) -> Result<String, AgentError> {
        let bytes = tokio::fs::read(archive_path)
            .await
            .map_err(|e| AgentError::Storage(format!("read {}: {e}", archive_path.display())))?;
        retry::with_retry(self.retry_policy, "upload_logs", || async {
            let resp = Self::apply_auth(
                self.http.post(self.url("/logs")).header("content-type", "application/zip"),
                Some(token),
            )
            .body(bytes.clone())
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
            let body = read_body(resp).await?;
            #[derive(serde::Deserialize)]
            struct UploadResponse {
                reference: String,
            }
            serde_json::from_slice::<UploadResponse>(&body)
                .map(|r| r.reference)
                .map_err(|e| AgentError::ProtocolMismatch(format!("decode logs upload response: {e}")))
        })
        .await
    }

    /// `GET /agent-packages/{filename}`: stream an update package to a
    /// temporary path alongside `dest_path`, retrying the whole download on
    /// transient failure, and rename onto `dest_path` only once the stream
    /// completes and is flushed — a failed or partial attempt never leaves a
    /// truncated file at the final path.
    pub async fn download_package(&self, token: &str, filename: &str, dest_path: &Path) -> Result<(), AgentError> {
        let temp_path = dest_path.with_file_name(format!(
            "{}.part",
            dest_path.file_name().and_then(|n| n.to_str()).unwrap_or("download")
        ));
        retry::with_retry(self.retry_policy, "download_package", || async {
            let resp = Self::apply_auth(self.http.get(self.url(&format!("/agent-packages/{filename}"))), Some(token))
                .send()
                .await
                .map_err(|e| AgentError::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(AgentError::DownloadFailed(format!("status {}", resp.status())));
            }

            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| AgentError::DownloadFailed(format!("create {}: {e}", temp_path.display())))?;
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk: Bytes = chunk.map_err(|e| AgentError::DownloadFailed(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| AgentError::DownloadFailed(format!("write {}: {e}", temp_path.display())))?;
            }
            file.flush().await.map_err(|e| AgentError::DownloadFailed(e.to_string()))?;
            drop(file);
            tokio::fs::rename(&temp_path, dest_path)
                .await
                .map_err(|e| AgentError::DownloadFailed(format!("rename {} -> {}: {e}", temp_path.display(), dest_path.display())))?;
            debug!(filename, dest = %dest_path.display(), "downloaded update package");
            Ok(())
        })
        .await
    }
}

async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, AgentError> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| AgentError::Transport(e.to_string()))?;
    if status == StatusCode::UNAUTHORIZED {
        return Err(AgentError::Authentication("server returned 401".into()));
    }
    if !status.is_success() && !status.is_client_error() {
        return Err(AgentError::Transport(format!("status {status}")));
    }
    Ok(bytes.to_vec())
}

async fn expect_success(resp: reqwest::Response) -> Result<(), AgentError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AgentError::Authentication("server returned 401".into()));
    }
    if !status.is_success() {
        return Err(AgentError::Transport(format!("status {status}")));
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
