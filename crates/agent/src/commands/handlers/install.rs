// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Software install handler (spec §4.7.3): download, verify checksum,
//! execute the installer.

use std::process::Stdio;

use sha2::{Digest, Sha256};
use tokio::process::Command as AsyncCommand;

use crate::commands::pipeline::CommandContext;
use crate::commands::types::{CommandResult, CommandResultPayload};

pub async fn handle(ctx: CommandContext) -> CommandResult {
    let Some(package_url) = ctx.command.parameters.get("package_url").and_then(|v| v.as_str()) else {
        return CommandResult::failure(
            ctx.command.command_id,
            ctx.command.command_type,
            "command_internal",
            "missing parameters.package_url",
        );
    };
    let expected_checksum = ctx.command.parameters.get("checksum_sha256").and_then(|v| v.as_str()).unwrap_or_default();
    let install_arguments: Vec<String> = ctx
        .command
        .parameters
        .get("install_arguments")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();

    let response = match reqwest::get(package_url).await {
        Ok(resp) => resp,
        Err(e) => {
            return CommandResult::failure(
                ctx.command.command_id,
                ctx.command.command_type,
                "download_failed",
                format!("fetch {package_url}: {e}"),
            )
        }
    };
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "download_failed", e.to_string())
        }
    };

    if !expected_checksum.is_empty() {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected_checksum) {
            return CommandResult::failure(
                ctx.command.command_id,
                ctx.command.command_type,
                "checksum_mismatch",
                format!("expected {expected_checksum}, got {actual}"),
            );
        }
    }

    let staged = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(e) => {
            return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e.to_string())
        }
    };
    if let Err(e) = tokio::fs::write(staged.path(), &bytes).await {
        return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e.to_string());
    }
    let mut perms = match tokio::fs::metadata(staged.path()).await {
        Ok(meta) => meta.permissions(),
        Err(e) => {
            return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e.to_string())
        }
    };
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    if let Err(e) = tokio::fs::set_permissions(staged.path(), perms).await {
        return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e.to_string());
    }

    let output = AsyncCommand::new(staged.path())
        .args(&install_arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

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
            format!("failed to run installer: {e}"),
        ),
    }
}

#[cfg(test)]
#[path = "install_tests.rs"]
mod tests;
