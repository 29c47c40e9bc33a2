//! `phasetrack` - replay and inspect phase tracking scenarios

use clap::Parser;

use phasetrack::cli::args::Cli;
use phasetrack::cli::commands;
use phasetrack::error::ExitCode;
use phasetrack::observability::init_logging;

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    match commands::dispatch(cli) {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
