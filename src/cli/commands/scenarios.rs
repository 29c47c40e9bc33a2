//! `scenarios list` and `scenarios show`.

use crate::cli::args::{OutputFormat, ScenariosListArgs, ScenariosShowArgs};
use crate::error::TrackerError;
use crate::scenario::builtin;

/// Lists built-in scenarios.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn list(args: &ScenariosListArgs) -> Result<(), TrackerError> {
    let results = builtin::list_scenarios(args.tag.as_deref());

    match args.format {
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = results
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "description": s.description,
                        "tags": s.tags,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Human => {
            if results.is_empty() {
                println!("No scenarios match the given filters.");
                return Ok(());
            }

            println!("Built-in Scenarios ({} available)\n", results.len());
            for s in &results {
                println!("  {:<20}{}", s.name, s.description);
            }
            println!();
            println!("Replay a scenario: phasetrack replay --builtin <name>");
            println!("View YAML:         phasetrack scenarios show <name>");
        }
    }

    Ok(())
}

/// Prints the raw YAML of a built-in scenario, suitable for piping.
///
/// # Errors
///
/// Returns an error if no built-in scenario has the given name.
pub fn show(args: &ScenariosShowArgs) -> Result<(), TrackerError> {
    let scenario = builtin::resolve(&args.name)?;
    print!("{}", scenario.yaml);
    Ok(())
}
