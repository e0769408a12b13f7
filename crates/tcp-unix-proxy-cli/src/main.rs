//! tcp-unix-proxy CLI entry point
//!
//! Serves a Unix domain socket over TCP until interrupted.

#![warn(clippy::all)]

mod cli;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    if let Err(e) = cli.execute().await {
        let exit_code = cli::error::display_error(&e);
        std::process::exit(exit_code);
    }
}
