//! Cadence CLI - plan and run model-proposed code changes with human approval
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::assertions_on_result_states,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use cli::Cli;

mod cli;
mod handlers;
mod prompt;

#[tokio::main]
async fn main() -> Result<()> {
    handlers::dispatch(Cli::parse()).await
}
