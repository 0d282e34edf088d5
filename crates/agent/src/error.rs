// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error kinds shared across identity, queue, transport, and update
//! subsystems. Every subsystem returns [`AgentError`] rather than ad-hoc
//! error types so the Session Controller can decide fatal vs. recoverable
//! without downcasting.

use std::fmt;

/// Closed set of error kinds (see spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Network unreachable, timeout, TLS failure. Retried locally; surfaced
    /// only after the retry budget is exhausted.
    Transport(String),
    /// Unauthorized / auth-reject. Never retried.
    Authentication(String),
    /// Unparseable or unexpected-shape response.
    ProtocolMismatch(String),
    /// File I/O or serialization failure on identity/queue/ignore-list.
    Storage(String),
    /// Update payload integrity failure. Terminal for the version.
    ChecksumMismatch { expected: String, actual: String },
    /// Archive extraction failed. Terminal for the version.
    ExtractionFailed(String),
    /// Package download failed. Terminal for the version.
    DownloadFailed(String),
    /// Spawning the updater companion failed. Terminal for the version.
    UpdateLaunchFailed(String),
    /// A command's deadline elapsed before it completed.
    CommandTimeout,
    /// A command handler failed for a reason internal to the agent.
    CommandInternal(String),
    /// The command intake queue was full.
    QueueFull,
}

impl AgentError {
    /// The wire-level `errorCode` string used in `report-error` bodies and
    /// `agent:command_result.result.errorCode`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Authentication(_) => "authentication",
            Self::ProtocolMismatch(_) => "protocol_mismatch",
            Self::Storage(_) => "storage",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::DownloadFailed(_) => "download_failed",
            Self::UpdateLaunchFailed(_) => "update_launch_failed",
            Self::CommandTimeout => "timeout",
            Self::CommandInternal(_) => "command_internal",
            Self::QueueFull => "queue_full",
        }
    }

    /// Whether this failure is terminal for the update session's target
    /// version (i.e. the version should be added to the ignore list).
    pub fn is_terminal_for_version(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::ExtractionFailed(_)
                | Self::DownloadFailed(_)
                | Self::UpdateLaunchFailed(_)
        )
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Authentication(msg) => write!(f, "authentication error: {msg}"),
            Self::ProtocolMismatch(msg) => write!(f, "protocol mismatch: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::ExtractionFailed(msg) => write!(f, "extraction failed: {msg}"),
            Self::DownloadFailed(msg) => write!(f, "download failed: {msg}"),
            Self::UpdateLaunchFailed(msg) => write!(f, "update launch failed: {msg}"),
            Self::CommandTimeout => write!(f, "command timed out"),
            Self::CommandInternal(msg) => write!(f, "command failed: {msg}"),
            Self::QueueFull => write!(f, "queue full"),
        }
    }
}

impl std::error::Error for AgentError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
