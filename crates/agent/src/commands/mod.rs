// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Pipeline (spec §4.7): bounded intake, parallel dispatch, typed
//! per-type handlers.

pub mod handlers;
pub mod pipeline;
pub mod types;

pub use pipeline::{CommandContext, CommandPipeline, Handler};
pub use types::{Command, CommandResult, CommandResultPayload, CommandType};
