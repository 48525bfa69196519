//! Shakeflow CLI: watch files or time segments and dispatch batches to a command.

use anyhow::Result;
use clap::Parser;
use shakeflow::engine::arg_parser::Cli;
use shakeflow::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
