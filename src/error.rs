//! Error types for `phasetrack`
//!
//! Protocol violations, world rejections and observer failures are all
//! recoverable inside the tracker: they are logged and degraded to
//! "effect dropped". Only configuration and scenario loading surface as
//! hard errors to the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::effect::{BlockPos, EntityId};
use crate::phase::PhaseKind;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `phasetrack` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Scenario replay error (malformed script)
    pub const SCENARIO_ERROR: i32 = 4;

    /// Phase protocol violation surfaced to the caller
    pub const PHASE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `phasetrack` operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Phase protocol violation
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// Scenario script error
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrackerError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Phase(_) => ExitCode::PHASE_ERROR,
            Self::Scenario(_) => ExitCode::SCENARIO_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Phase Protocol Errors
// ============================================================================

/// Nesting discipline violations.
///
/// These are always programming errors in the adapter layer, never
/// something a player can trigger. The stack recovers from each of them
/// before returning the error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PhaseError {
    /// A phase was popped that is not the current top of the stack.
    #[error("unbalanced pop: expected top {expected}, got {found}")]
    UnbalancedPop {
        /// Description of the actual top of the stack
        expected: String,
        /// Description of the phase the caller tried to pop
        found: String,
    },

    /// The token does not refer to any phase on the stack.
    #[error("pop of unknown phase {0}")]
    UnknownPhase(String),

    /// A push was attempted while the top context was already completed.
    #[error("push of {attempted} refused: top phase {top} already completed (missed pop)")]
    MissedPop {
        /// Phase kind the caller tried to push
        attempted: PhaseKind,
        /// Completed phase still sitting on top of the stack
        top: PhaseKind,
    },

    /// Nesting went past the configured safety limit.
    #[error("phase depth {depth} exceeds limit {limit} while pushing {attempted}")]
    DepthExceeded {
        /// Current depth
        depth: usize,
        /// Configured limit
        limit: usize,
        /// Phase kind the caller tried to push
        attempted: PhaseKind,
    },

    /// The idle sentinel can never be pushed explicitly.
    #[error("the idle phase cannot be pushed")]
    IdlePush,

    /// A cause frame was popped while frames above it were still open.
    #[error("cause frame {handle} popped out of order (top frame is {top})")]
    CauseFrameOutOfOrder {
        /// Frame being popped
        handle: u64,
        /// Frame actually on top
        top: u64,
    },

    /// A cause frame handle that is not open in this context.
    #[error("cause frame {0} is not open")]
    UnknownCauseFrame(u64),

    /// Cause frames were still open when the phase completed.
    #[error("{open} cause frame(s) still open when {phase} completed")]
    UnbalancedCauseFrames {
        /// Phase being completed
        phase: PhaseKind,
        /// Number of frames left open
        open: usize,
    },

    /// `complete()` was called on an already completed context.
    #[error("{0} context already completed")]
    AlreadyComplete(PhaseKind),

    /// A lifecycle transition was skipped or repeated.
    #[error("invalid phase transition: {0}")]
    InvalidTransition(String),
}

impl PhaseError {
    /// Short label used for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UnbalancedPop { .. } => "unbalanced_pop",
            Self::UnknownPhase(_) => "unknown_phase",
            Self::MissedPop { .. } => "missed_pop",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::IdlePush => "idle_push",
            Self::CauseFrameOutOfOrder { .. } => "cause_frame_out_of_order",
            Self::UnknownCauseFrame(_) => "unknown_cause_frame",
            Self::UnbalancedCauseFrames { .. } => "unbalanced_cause_frames",
            Self::AlreadyComplete(_) => "already_complete",
            Self::InvalidTransition(_) => "invalid_transition",
        }
    }
}

// ============================================================================
// Apply Errors
// ============================================================================

/// Rejections from the world model while applying an accepted effect.
///
/// A rejected effect is skipped; the rest of the phase still applies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// Position outside the world's buildable bounds
    #[error("position {0} is out of bounds")]
    OutOfBounds(BlockPos),

    /// Entity does not exist in the world
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Entity id is already present in the world
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    /// Amended value does not fit the effect it replaces
    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    /// The world does not implement this primitive
    #[error("unsupported world operation: {0}")]
    Unsupported(&'static str),
}

// ============================================================================
// Observer Errors
// ============================================================================

/// Failure reported by an observer callback.
///
/// Treated as "no objection": the pipeline logs it and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObserverError {
    /// The observer failed while handling the event
    #[error("observer failed: {0}")]
    Failed(String),

    /// The observer panicked
    #[error("observer panicked: {0}")]
    Panicked(String),

    /// An amendment referred to a transaction that does not exist or
    /// replaced a value with one of a different shape
    #[error("invalid amendment: {0}")]
    InvalidAmendment(String),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases.idle")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Scenario Errors
// ============================================================================

/// Errors while loading or replaying a scenario script.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Script could not be parsed
    #[error("scenario parse error in {path}: {message}")]
    Parse {
        /// Path to the script
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A step referenced a phase or frame label that is not open
    #[error("step {step}: unknown label '{label}'")]
    UnknownLabel {
        /// Zero-based step index
        step: usize,
        /// Label used by the step
        label: String,
    },

    /// A step referenced a label that is already in use
    #[error("step {step}: label '{label}' already in use")]
    DuplicateLabel {
        /// Zero-based step index
        step: usize,
        /// Label used by the step
        label: String,
    },

    /// The initial world described by the script is invalid
    #[error("invalid world setup: {0}")]
    Setup(String),

    /// No built-in scenario has the requested name
    #[error("unknown built-in scenario {0}")]
    UnknownBuiltin(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `phasetrack` operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::SCENARIO_ERROR, 4);
        assert_eq!(ExitCode::PHASE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
    }

    #[test]
    fn test_phase_error_exit_code() {
        let err: TrackerError = PhaseError::IdlePush.into();
        assert_eq!(err.exit_code(), ExitCode::PHASE_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: TrackerError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_scenario_error_exit_code() {
        let err: TrackerError = ScenarioError::UnknownLabel {
            step: 3,
            label: "click".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::SCENARIO_ERROR);
        assert!(err.to_string().contains("click"));
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: TrackerError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_phase_error_labels_are_distinct() {
        let errors = [
            PhaseError::IdlePush,
            PhaseError::UnknownPhase("x".into()),
            PhaseError::AlreadyComplete(PhaseKind::BlockWorker),
            PhaseError::UnknownCauseFrame(1),
            PhaseError::InvalidTransition("x".into()),
        ];
        let labels: std::collections::HashSet<_> = errors.iter().map(PhaseError::label).collect();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn test_depth_exceeded_display() {
        let err = PhaseError::DepthExceeded {
            depth: 64,
            limit: 64,
            attempted: PhaseKind::ScheduledTask,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("scheduled_task"));
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "phases.idle".to_string(),
            message: "idle cannot be configured".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: idle cannot be configured at phases.idle"
        );
    }

    #[test]
    fn test_config_error_env_var_display() {
        let err = ConfigError::EnvVarNotSet {
            var: "MAX_DEPTH".to_string(),
            location: "max_phase_depth".to_string(),
        };
        assert!(err.to_string().contains("MAX_DEPTH"));
        assert!(err.to_string().contains("max_phase_depth"));
    }
}
