// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Software uninstall handler (spec §4.7.4): resolve a product by
//! `package_name` or `product_code`, invoke the uninstaller.

use std::process::Stdio;

use tokio::process::Command as AsyncCommand;

use crate::commands::pipeline::CommandContext;
use crate::commands::types::{CommandResult, CommandResultPayload};

/// `product_code` (an MSI GUID) takes priority over `package_name` when
/// both are present, matching how most installers key uninstall by code.
pub async fn handle(ctx: CommandContext) -> CommandResult {
    let product_code = ctx.command.parameters.get("product_code").and_then(|v| v.as_str());
    let package_name = ctx.command.parameters.get("package_name").and_then(|v| v.as_str());
    let Some(target) = product_code.or(package_name) else {
        return CommandResult::failure(
            ctx.command.command_id,
            ctx.command.command_type,
            "command_internal",
            "missing parameters.product_code or parameters.package_name",
        );
    };
    let uninstall_arguments: Vec<String> = ctx
        .command
        .parameters
        .get("uninstall_arguments")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();

    let mut args = vec!["/x".to_owned(), target.to_owned(), "/quiet".to_owned()];
    args.extend(uninstall_arguments);

    let output =
        AsyncCommand::new("msiexec").args(&args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).output().await;

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
            format!("failed to invoke uninstaller: {e}"),
        ),
    }
}

#[cfg(test)]
#[path = "uninstall_tests.rs"]
mod tests;
