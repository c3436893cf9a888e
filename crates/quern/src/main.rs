//! Command-line interface for the quern match engine.

mod cli;

use std::process::ExitCode;

use clap::Parser;

use cli::args::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Search(cmd) => cli::search::run(&cmd),
        Commands::Serve(cmd) => cli::serve::run(&cmd),
    }
}
