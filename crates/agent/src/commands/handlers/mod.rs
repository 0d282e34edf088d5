// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-`CommandType` handlers (spec §4.7). Each module owns one command
//! kind; [`build_registry`] wires them into the [`super::pipeline::Handler`]
//! map the dispatcher looks up by [`super::types::CommandType`].

pub mod console;
pub mod get_logs;
pub mod install;
pub mod system_action;
pub mod uninstall;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::pipeline::Handler;
use super::types::CommandType;
use crate::api::ApiClient;
use crate::auth::SharedToken;

/// Build the default registry: one handler per known `CommandType`.
/// `Unknown` is deliberately absent — the dispatcher's lookup miss already
/// produces `CommandResult::unsupported_type` for it and anything else not
/// registered here.
///
/// Get Logs is the only handler that needs server access (to upload the
/// archive), so it alone closes over `api`/`token`/`log_paths` rather than
/// widening [`super::pipeline::CommandContext`] for every handler.
pub fn build_registry(api: Arc<ApiClient>, token: SharedToken, log_paths: Vec<PathBuf>) -> HashMap<CommandType, Handler> {
    let mut handlers: HashMap<CommandType, Handler> = HashMap::new();
    handlers.insert(CommandType::Console, Arc::new(|ctx| Box::pin(console::handle(ctx))));
    handlers.insert(CommandType::SystemAction, Arc::new(|ctx| Box::pin(system_action::handle(ctx))));
    handlers.insert(CommandType::SoftwareInstall, Arc::new(|ctx| Box::pin(install::handle(ctx))));
    handlers.insert(CommandType::SoftwareUninstall, Arc::new(|ctx| Box::pin(uninstall::handle(ctx))));
    handlers.insert(
        CommandType::GetLogs,
        Arc::new(move |ctx| Box::pin(get_logs::handle(ctx, Arc::clone(&api), token.clone(), log_paths.clone()))),
    );
    handlers
}
