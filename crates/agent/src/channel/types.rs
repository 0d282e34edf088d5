// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Channel wire types (spec §6's Event protocol).

use serde::{Deserialize, Serialize};

use crate::commands::{Command, CommandResultPayload, CommandType};

/// Messages the agent sends to the server over the Event Channel. Field
/// casing follows the wire contract exactly per event kind (it is not
/// uniform across kinds).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "agent:status_update")]
    StatusUpdate {
        #[serde(rename = "cpuUsage")]
        cpu_usage: f64,
        #[serde(rename = "ramUsage")]
        ram_usage: f64,
        #[serde(rename = "diskUsage")]
        disk_usage: f64,
    },
    #[serde(rename = "agent:command_result")]
    CommandResult {
        #[serde(rename = "commandId")]
        command_id: String,
        #[serde(rename = "commandType")]
        command_type: CommandType,
        success: bool,
        result: CommandResultPayload,
    },
    #[serde(rename = "agent:update_status")]
    UpdateStatus {
        status: String,
        target_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl OutboundEvent {
    /// The `serde(tag = "type")` discriminator string, used for per-kind
    /// ordering bookkeeping (spec §5: "outbound events of the same kind ...
    /// delivered in submission order").
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "agent:status_update",
            Self::CommandResult { .. } => "agent:command_result",
            Self::UpdateStatus { .. } => "agent:update_status",
        }
    }
}

/// Messages the server sends to the agent over the Event Channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "command:execute")]
    CommandExecute(Command),
    #[serde(rename = "agent:new_version_available")]
    NewVersionAvailable {
        version: String,
        download_url: String,
        checksum_sha256: String,
        #[serde(default)]
        notes: String,
    },
}

/// Result of an emit attempt (spec §4.5: emits outside `Connected` return a
/// distinguished not-connected outcome instead of blocking or queueing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Sent,
    NotConnected,
}
