// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System action handler (spec §4.7.2): restart, shutdown, or logoff.

use std::process::Stdio;

use tokio::process::Command as AsyncCommand;

use crate::commands::pipeline::CommandContext;
use crate::commands::types::{CommandResult, CommandResultPayload};

/// The three recognized actions, taken from `command` verbatim
/// (`restart` | `shutdown` | `logoff`).
pub async fn handle(ctx: CommandContext) -> CommandResult {
    let force = ctx.command.parameters.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
    let delay_sec = ctx.command.parameters.get("delay_sec").and_then(|v| v.as_u64()).unwrap_or(0);

    let mut args = match ctx.command.command.as_str() {
        "restart" => vec!["-r".to_owned()],
        "shutdown" => vec!["-h".to_owned()],
        "logoff" => vec!["-k".to_owned(), "now".to_owned()],
        other => {
            return CommandResult::failure(
                ctx.command.command_id,
                ctx.command.command_type,
                "command_internal",
                format!("unrecognized system action '{other}'"),
            )
        }
    };
    if force {
        args.push("-f".to_owned());
    }
    if delay_sec > 0 {
        args.push(format!("+{}", delay_sec.div_ceil(60)));
    }

    let output =
        AsyncCommand::new("shutdown").args(&args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).output().await;

    match output {
        Ok(output) => CommandResult {
            command_id: ctx.command.command_id,
            command_type: ctx.command.command_type,
            success: output.status.success(),
            result: CommandResultPayload {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
                error_code: if output.status.success() { String::new() } else { "command_internal".into() },
                ..Default::default()
            },
        },
        Err(e) => CommandResult::failure(
            ctx.command.command_id,
            ctx.command.command_type,
            "command_internal",
            format!("failed to invoke shutdown: {e}"),
        ),
    }
}

#[cfg(test)]
#[path = "system_action_tests.rs"]
mod tests;
