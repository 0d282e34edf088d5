// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agent::config::Config;
use agent::session::{self, ExitReason};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    let _tracing_guard = session::init_tracing(&config);

    match session::run(config).await {
        Ok(ExitReason::Shutdown) => std::process::exit(0),
        Ok(ExitReason::RequiresConfiguration) => std::process::exit(3),
        Err(e) => {
            error!("fatal: {e}");
            std::process::exit(1);
        }
    }
}
