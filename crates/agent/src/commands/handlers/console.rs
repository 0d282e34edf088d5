// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console command handler (spec §4.7.1): spawn a shell, capture stdio,
//! terminate the process group on deadline expiry.

use std::os::unix::process::CommandExt;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command as AsyncCommand;

use crate::commands::pipeline::CommandContext;
use crate::commands::types::{CommandResult, CommandResultPayload};

/// Build and run the console handler for one [`CommandContext`]. The
/// dispatcher applies the deadline externally via `tokio::time::timeout`;
/// on cancellation this future is dropped, so the process-group kill must
/// happen via a guard, not a post-await step.
// setsid() in pre_exec runs in the forked child between fork and exec.
#[allow(unsafe_code)]
pub async fn handle(ctx: CommandContext) -> CommandResult {
    let use_powershell = ctx.command.parameters.get("use_powershell").and_then(|v| v.as_bool()).unwrap_or(false);

    let mut cmd = if use_powershell {
        let mut c = AsyncCommand::new("pwsh");
        c.args(["-NoProfile", "-Command", &ctx.command.command]);
        c
    } else {
        let mut c = AsyncCommand::new("/bin/sh");
        c.args(["-c", &ctx.command.command]);
        c
    };
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    // Run in its own process group so a timeout can kill the whole tree.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandResult::failure(
                ctx.command.command_id,
                ctx.command.command_type,
                "command_internal",
                format!("failed to spawn shell: {e}"),
            )
        }
    };
    // Held across the await: if the dispatcher's timeout cancels this
    // future mid-wait, dropping it runs this guard and kills the group.
    let _guard = ProcessGroupGuard(child.id());
    let output = child.wait_with_output().await;

    match output {
        Ok(output) => CommandResult {
            command_id: ctx.command.command_id,
            command_type: ctx.command.command_type,
            success: output.status.success(),
            result: CommandResultPayload {
                stdout: decode(&ctx.console_encoding, &output.stdout),
                stderr: decode(&ctx.console_encoding, &output.stderr),
                exit_code: output.status.code(),
                error_code: if output.status.success() { String::new() } else { "command_internal".into() },
                error_message: String::new(),
            },
        },
        Err(e) => CommandResult::failure(
            ctx.command.command_id,
            ctx.command.command_type,
            "command_internal",
            format!("failed to read process output: {e}"),
        ),
    }
}

/// Kills the whole process group when dropped early (on timeout, the
/// dispatcher drops this future before `wait_with_output` resolves).
struct ProcessGroupGuard(Option<u32>);

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            if let Ok(pid) = i32::try_from(pgid) {
                let _ = signal::killpg(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
    }
}

/// Only `utf-8`/`utf8` is implemented; other configured encodings still
/// decode lossily as UTF-8 rather than failing the command.
fn decode(_encoding: &str, bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
