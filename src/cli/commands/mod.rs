//! CLI command dispatch and handlers.

pub mod replay;
pub mod scenarios;
pub mod validate;
pub mod version;

use crate::cli::args::{Cli, Commands, ScenariosSubcommand};
use crate::error::TrackerError;

/// Dispatches a parsed CLI invocation to its handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub fn dispatch(cli: Cli) -> Result<(), TrackerError> {
    match cli.command {
        Commands::Replay(args) => replay::run(&args),
        Commands::Validate(args) => validate::run(&args),
        Commands::Scenarios(cmd) => match cmd.subcommand {
            ScenariosSubcommand::List(args) => scenarios::list(&args),
            ScenariosSubcommand::Show(args) => scenarios::show(&args),
        },
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
