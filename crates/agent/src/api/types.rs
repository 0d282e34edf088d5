// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed sum types per endpoint (spec §9): callers branch on a single outer
//! discriminator, never on free-form response bodies.

use serde::{Deserialize, Serialize};

/// Outcome of `identify` / `verify-mfa` (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success { token: String },
    MfaRequired,
    PositionError,
    Unauthorized,
    Other(String),
}

/// Room placement submitted during `identify`.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyRequest {
    pub room_name: String,
    pub room_x: i64,
    pub room_y: i64,
    /// Exposed per spec §9's Open Question; always `false` here and has no
    /// server-observable effect until the token-renewal contract exists.
    #[serde(default)]
    pub force_renew_token: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum IdentifyWire {
    Success { token: String },
    MfaRequired,
    PositionError,
    Unauthorized,
    Error {
        #[serde(default)]
        message: String,
    },
}

impl From<IdentifyWire> for AuthOutcome {
    fn from(wire: IdentifyWire) -> Self {
        match wire {
            IdentifyWire::Success { token } => Self::Success { token },
            IdentifyWire::MfaRequired => Self::MfaRequired,
            IdentifyWire::PositionError => Self::PositionError,
            IdentifyWire::Unauthorized => Self::Unauthorized,
            IdentifyWire::Error { message } => Self::Other(message),
        }
    }
}

pub(super) fn parse_auth_outcome(body: &[u8]) -> Result<AuthOutcome, serde_json::Error> {
    serde_json::from_slice::<IdentifyWire>(body).map(Into::into)
}

/// Static hardware attributes uploaded once via `hardware-info`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HardwareInfo {
    pub os: String,
    pub os_version: String,
    pub cpu_model: String,
    pub total_ram_bytes: u64,
}

/// An error record delivered via `report-error`, live or from the Offline
/// Queue's error-report partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_code: String,
    pub message: String,
    pub context: String,
    pub occurred_at_ms: u64,
}

/// Update availability descriptor (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub version: String,
    pub download_url: String,
    pub checksum_sha256: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone)]
pub enum CheckUpdateOutcome {
    Available(UpdateDescriptor),
    NoUpdate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum CheckUpdateWire {
    Update {
        version: String,
        download_url: String,
        checksum_sha256: String,
        #[serde(default)]
        notes: String,
    },
    NoUpdate,
}

pub(super) fn parse_check_update_outcome(
    body: &[u8],
) -> Result<CheckUpdateOutcome, serde_json::Error> {
    let wire: CheckUpdateWire = serde_json::from_slice(body)?;
    Ok(match wire {
        CheckUpdateWire::Update { version, download_url, checksum_sha256, notes } => {
            CheckUpdateOutcome::Available(UpdateDescriptor {
                version,
                download_url,
                checksum_sha256,
                notes,
            })
        }
        CheckUpdateWire::NoUpdate => CheckUpdateOutcome::NoUpdate,
    })
}
