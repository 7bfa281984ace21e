//! Sigbuild CLI.

use clap::Parser;
use sigbuild::cli::{self, logging, Cli, Verbosity};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init_tracing(cli.verbose, cli.quiet) {
        eprintln!("warning: {}", e);
    }
    let out = Verbosity {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    if let Err(e) = cli::dispatch(cli.command, out) {
        // Pipeline failures already ended on their RESULT line.
        if !e.reported {
            eprintln!("error: {}", e);
        }
        std::process::exit(1);
    }
}
