//! `replay`: run a scenario script and summarize what happened.

use crate::cli::args::{OutputFormat, ReplayArgs};
use crate::cli::commands::validate::load_reporting;
use crate::config::{ConfigLoader, TrackerConfig, ViolationPolicy};
use crate::error::TrackerError;
use crate::observability::{EventEmitter, init_metrics};
use crate::pipeline::PhaseTracker;
use crate::scenario::{self, ReplaySummary, ScenarioScript, builtin};
use crate::world::InMemoryWorld;

/// Replays a scenario file or built-in scenario.
///
/// # Errors
///
/// Returns an error if the configuration or script cannot be loaded, the
/// trace file cannot be created, the metrics listener cannot bind, or a
/// step references an unknown label.
pub fn run(args: &ReplayArgs) -> Result<(), TrackerError> {
    let config = match &args.config {
        Some(path) => load_reporting(&ConfigLoader::default(), path)?.0,
        None => TrackerConfig {
            violation_policy: ViolationPolicy::Recover,
            ..TrackerConfig::default()
        },
    };

    init_metrics(args.metrics_port)?;

    let script = match (&args.scenario, &args.builtin) {
        (Some(path), _) => ScenarioScript::load(path)?,
        (None, Some(name)) => builtin::resolve(name)?.script()?,
        (None, None) => {
            return Err(TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no scenario given",
            )));
        }
    };

    let mut world = script.build_world()?;
    let mut tracker = PhaseTracker::new(config);
    if let Some(path) = &args.trace_out {
        tracker = tracker.with_trace(EventEmitter::from_file(path)?);
    }
    script.register_observers(tracker.observers_mut());

    let summary = scenario::replay(&script, &mut tracker, &mut world)?;

    match args.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "summary": summary,
                "world": {
                    "blocks": world.block_count(),
                    "entities": world.entity_count(),
                },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Human => print_human(&summary, &world),
    }

    Ok(())
}

fn print_human(summary: &ReplaySummary, world: &InMemoryWorld) {
    println!(
        "Scenario '{}': {} steps, {} phases",
        summary.scenario,
        summary.steps,
        summary.phases.len()
    );

    for report in &summary.phases {
        let outcome = if report.exceptional { "failed" } else { "ok" };
        println!(
            "  {} {:<24} {outcome:<6} applied={} cancelled={} discarded={} audit={}",
            report.id,
            report.kind.name(),
            report.applied,
            report.cancelled,
            report.discarded,
            report.audit_only,
        );
        for event in &report.events {
            let marker = if event.is_cancelled() { " (cancelled)" } else { "" };
            println!(
                "      {} {} cause={} transactions={}{marker}",
                event.id(),
                event.kind(),
                event.cause(),
                event.transactions().len(),
            );
        }
    }

    if summary.rejected_captures > 0 {
        println!("  rejected captures: {}", summary.rejected_captures);
    }
    if summary.left_open > 0 {
        println!("  phases left open: {}", summary.left_open);
    }
    for violation in &summary.violations {
        println!("  violation: {violation}");
    }

    println!(
        "World: {} blocks, {} entities",
        world.block_count(),
        world.entity_count()
    );
}
