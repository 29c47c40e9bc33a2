//! CLI argument definitions.
//!
//! All Clap derive structs for `phasetrack` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Nested-phase causation tracking for world mutations.
#[derive(Parser, Debug)]
#[command(name = "phasetrack", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "PHASETRACK_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "PHASETRACK_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a scenario script against an in-memory world.
    Replay(ReplayArgs),

    /// Validate tracker configuration files.
    Validate(ValidateArgs),

    /// Inspect the built-in scenarios.
    Scenarios(ScenariosCommand),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Replay
// ============================================================================

/// Arguments for `replay`.
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("source").required(true).multiple(false))]
pub struct ReplayArgs {
    /// Path to a scenario script.
    #[arg(group = "source")]
    pub scenario: Option<PathBuf>,

    /// Name of a built-in scenario.
    #[arg(long, group = "source")]
    pub builtin: Option<String>,

    /// Tracker configuration file. Without one, violations are recovered
    /// and reported instead of aborting the replay.
    #[arg(short, long, env = "PHASETRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write a JSONL trace of phases and events to this file.
    #[arg(long)]
    pub trace_out: Option<PathBuf>,

    /// Serve Prometheus metrics on this port while replaying.
    #[arg(long, env = "PHASETRACK_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Summary output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Validate
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// Scenarios
// ============================================================================

/// Built-in scenario commands.
#[derive(Args, Debug)]
pub struct ScenariosCommand {
    /// Scenarios subcommand.
    #[command(subcommand)]
    pub subcommand: ScenariosSubcommand,
}

/// Built-in scenario subcommands.
#[derive(Subcommand, Debug)]
pub enum ScenariosSubcommand {
    /// List built-in scenarios.
    List(ScenariosListArgs),

    /// Print the YAML of a built-in scenario.
    Show(ScenariosShowArgs),
}

/// Arguments for `scenarios list`.
#[derive(Args, Debug)]
pub struct ScenariosListArgs {
    /// Only scenarios carrying this tag.
    #[arg(long)]
    pub tag: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `scenarios show`.
#[derive(Args, Debug)]
pub struct ScenariosShowArgs {
    /// Scenario name.
    pub name: String,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
