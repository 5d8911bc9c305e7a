use anyhow::Result;
use clap::Parser;
use plan_orchestrator::cli::{run, Cli};
use plan_orchestrator::logging::init_logging;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
