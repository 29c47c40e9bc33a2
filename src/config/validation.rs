//! Semantic validation of a parsed [`TrackerConfig`].
//!
//! Collects every issue instead of stopping at the first one.

use crate::config::schema::TrackerConfig;
use crate::error::{Severity, ValidationIssue};

/// Depth above which a warning is issued.
const DEEP_NESTING_WARNING: usize = 1024;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &TrackerConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_depth(config);
        self.validate_phases(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    fn validate_depth(&mut self, config: &TrackerConfig) {
        if config.max_phase_depth == 0 {
            self.add_error("max_phase_depth", "must be at least 1");
        } else if config.max_phase_depth > DEEP_NESTING_WARNING {
            self.add_warning(
                "max_phase_depth",
                &format!(
                    "nesting limit {} is unusually deep (> {DEEP_NESTING_WARNING})",
                    config.max_phase_depth
                ),
            );
        }
    }

    fn validate_phases(&mut self, config: &TrackerConfig) {
        for (kind, overrides) in &config.phases {
            let path = format!("phases.{kind}");

            if kind.is_idle() {
                self.add_error(&path, "the idle phase cannot be configured");
                continue;
            }

            if kind.is_listener() && !overrides.partial_apply_on_failure.is_empty() {
                self.add_error(
                    &format!("{path}.partial_apply_on_failure"),
                    "listener phases are read-only and cannot opt into partial apply",
                );
            }

            if overrides.capture_limit == Some(0) {
                self.add_warning(
                    &format!("{path}.capture_limit"),
                    "a limit of 0 makes every capture audit-only",
                );
            }

            let kinds = &overrides.partial_apply_on_failure;
            for (i, effect) in kinds.iter().enumerate() {
                if kinds[..i].contains(effect) {
                    self.add_warning(
                        &format!("{path}.partial_apply_on_failure"),
                        &format!("'{effect}' listed more than once"),
                    );
                }
            }
        }
    }

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
