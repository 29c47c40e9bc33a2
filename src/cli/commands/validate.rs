//! `validate`: check configuration files without replaying anything.

use std::path::Path;

use crate::cli::args::ValidateArgs;
use crate::config::{ConfigLoader, TrackerConfig};
use crate::error::{ConfigError, Severity, TrackerError, ValidationIssue};

/// Loads and validates each file in turn, stopping at the first failure.
///
/// # Errors
///
/// Returns the first load or validation error. With `--strict`, warnings
/// fail validation too.
pub fn run(args: &ValidateArgs) -> Result<(), TrackerError> {
    let loader = ConfigLoader::default();

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let (_, warnings) = load_reporting(&loader, path)?;

        if args.strict && !warnings.is_empty() {
            let err = ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: warnings,
            };
            return Err(err.into());
        }

        tracing::info!(file = %path.display(), "configuration valid");
    }

    Ok(())
}

/// Loads a configuration, logging its warnings and printing every issue of
/// a failed validation to stderr.
///
/// # Errors
///
/// Returns the loader's error.
pub(crate) fn load_reporting(
    loader: &ConfigLoader,
    path: &Path,
) -> Result<(TrackerConfig, Vec<ValidationIssue>), ConfigError> {
    let load_result = loader.load(path).inspect_err(|e| {
        if let ConfigError::ValidationError { errors, .. } = e {
            for issue in errors {
                eprintln!("  {issue}");
            }
        }
    })?;

    let warnings = load_result
        .warnings
        .into_iter()
        .map(|w| {
            let location = w.location.unwrap_or_default();
            tracing::warn!(location = %location, "{}", w.message);
            ValidationIssue {
                path: location,
                message: w.message,
                severity: Severity::Warning,
            }
        })
        .collect();

    Ok((load_result.config, warnings))
}
