//! Binary entry point for `pf9ctl`.

use std::process;

use clap::Parser;

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = commands::run(cli).await;
    process::exit(exit_code);
}
