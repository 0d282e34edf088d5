// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Get logs handler (spec §4.7.5): compress the designated log files into
//! one archive and upload it, referencing the upload outcome in the result.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::api::ApiClient;
use crate::auth::SharedToken;
use crate::commands::pipeline::CommandContext;
use crate::commands::types::{CommandResult, CommandResultPayload};

/// `log_paths` is the operator-configured set of files this agent is
/// allowed to collect; `parameters` never names arbitrary paths.
pub async fn handle(ctx: CommandContext, api: Arc<ApiClient>, token: SharedToken, log_paths: Vec<PathBuf>) -> CommandResult {
    if log_paths.is_empty() {
        return CommandResult::failure(
            ctx.command.command_id,
            ctx.command.command_type,
            "command_internal",
            "no log files configured for collection",
        );
    }

    let archive = match tempfile::Builder::new().suffix(".zip").tempfile() {
        Ok(file) => file,
        Err(e) => {
            return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e.to_string())
        }
    };
    if let Err(e) = write_archive(archive.path(), &log_paths) {
        return CommandResult::failure(ctx.command.command_id, ctx.command.command_type, "command_internal", e);
    }

    let token = token.get().await;
    match api.upload_logs(&token, archive.path()).await {
        Ok(reference) => CommandResult {
            command_id: ctx.command.command_id,
            command_type: ctx.command.command_type,
            success: true,
            result: CommandResultPayload { stdout: reference, ..Default::default() },
        },
        Err(e) => CommandResult::failure(ctx.command.command_id, ctx.command.command_type, e.error_code(), e.to_string()),
    }
}

/// Synchronous zip write: `zip::ZipWriter` has no async API, and archiving
/// a handful of log files is fast enough to run inline rather than via
/// `spawn_blocking`.
fn write_archive(archive_path: &Path, log_paths: &[PathBuf]) -> Result<(), String> {
    let file = std::fs::File::create(archive_path).map_err(|e| format!("create {}: {e}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for path in log_paths {
        let Ok(contents) = std::fs::read(path) else {
            // Missing/unreadable log files are skipped, not fatal: a
            // rotated-away file shouldn't fail the whole collection.
            continue;
        };
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "log".to_owned());
        writer.start_file(name, options).map_err(|e| e.to_string())?;
        writer.write_all(&contents).map_err(|e| e.to_string())?;
    }
    writer.finish().map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
#[path = "get_logs_tests.rs"]
mod tests;
