// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agent_updater::{run, Config, ExitCode};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid arguments: {e}");
            std::process::exit(ExitCode::InvalidArguments.as_i32());
        }
    };

    if let Err(e) = config.validate() {
        error!("invalid arguments: {e}");
        std::process::exit(ExitCode::InvalidArguments.as_i32());
    }

    let code = run(config).await;
    std::process::exit(code.as_i32());
}
