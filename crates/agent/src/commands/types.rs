// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Pipeline data model (spec §3, §4.7).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Closed set of server-recognized command kinds, with an `Unknown` fallback
/// so an unrecognized wire value produces a typed rejection instead of a
/// deserialization error that would drop the whole inbound event. The
/// fallback carries the original string rather than discarding it, since
/// both the rejection reported back to the server and the logs benefit from
/// knowing what was actually asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandType {
    Console,
    SystemAction,
    SoftwareInstall,
    SoftwareUninstall,
    GetLogs,
    Unknown(String),
}

impl Default for CommandType {
    fn default() -> Self {
        Self::Console
    }
}

impl CommandType {
    fn as_wire_str(&self) -> &str {
        match self {
            Self::Console => "console",
            Self::SystemAction => "system_action",
            Self::SoftwareInstall => "software_install",
            Self::SoftwareUninstall => "software_uninstall",
            Self::GetLogs => "get_logs",
            Self::Unknown(s) => s,
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl Serialize for CommandType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for CommandType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "console" => Self::Console,
            "system_action" => Self::SystemAction,
            "software_install" => Self::SoftwareInstall,
            "software_uninstall" => Self::SoftwareUninstall,
            "get_logs" => Self::GetLogs,
            _ => Self::Unknown(raw),
        })
    }
}

/// A command as delivered by `command:execute` (spec §4.7's Intake).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: String,
    pub command: String,
    #[serde(default)]
    pub command_type: CommandType,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Command {
    /// The per-command deadline: `parameters.timeout_sec` when present and
    /// nonzero, else the configured default.
    pub fn timeout_sec(&self, default_timeout_sec: u64) -> u64 {
        self.parameters
            .get("timeout_sec")
            .and_then(|v| v.as_u64())
            .filter(|&t| t != 0)
            .unwrap_or(default_timeout_sec)
    }
}

/// The outcome of executing (or rejecting) a [`Command`] (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: String,
    pub command_type: CommandType,
    pub success: bool,
    pub result: CommandResultPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultPayload {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub error_code: String,
}

impl CommandResult {
    pub fn failure(command_id: impl Into<String>, command_type: CommandType, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            command_type,
            success: false,
            result: CommandResultPayload {
                error_code: error_code.to_owned(),
                error_message: message.into(),
                ..Default::default()
            },
        }
    }

    pub fn queue_full(command_id: impl Into<String>, command_type: CommandType) -> Self {
        Self::failure(command_id, command_type, "queue_full", "command intake queue is full")
    }

    pub fn timeout(command_id: impl Into<String>, command_type: CommandType) -> Self {
        Self::failure(command_id, command_type, "timeout", "command exceeded its deadline")
    }

    pub fn unsupported_type(command_id: impl Into<String>, command_type: CommandType) -> Self {
        Self::failure(command_id, command_type, "unsupported_command_type", "no handler registered for this command type")
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
