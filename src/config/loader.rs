//! Configuration loader.
//!
//! Loading pipeline:
//! 1. Size check and BOM stripping
//! 2. Environment variable expansion (pre-parse, on raw text)
//! 3. YAML parsing into [`TrackerConfig`]
//! 4. Validation

use std::path::{Path, PathBuf};

use crate::config::schema::{TrackerConfig, env_or};
use crate::config::validation::Validator;
use crate::error::ConfigError;

/// Environment variable overriding the maximum configuration file size.
pub const MAX_CONFIG_SIZE_ENV: &str = "PHASETRACK_MAX_CONFIG_SIZE";

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: TrackerConfig,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Loads tracker configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    max_config_size: usize,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            max_config_size: env_or(MAX_CONFIG_SIZE_ENV, 1024 * 1024),
        }
    }
}

impl ConfigLoader {
    /// Creates a loader with a custom size limit in bytes.
    #[must_use]
    pub const fn with_max_size(max_config_size: usize) -> Self {
        Self { max_config_size }
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is too large, if a
    /// required environment variable is unset, if YAML parsing fails, or
    /// if validation finds errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Loads and validates configuration text; `source` is used in errors.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_str(&self, raw: &str, source: &Path) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub
            .substitute(raw, source)
            .map_err(|e| with_path(e, source))?;
        warnings.extend(env_sub.warnings);

        if substituted.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: source.to_path_buf(),
                line: None,
                message: "Configuration file is empty".to_string(),
            });
        }

        let config: TrackerConfig =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors: result.errors,
            });
        }

        for issue in result.warnings {
            warnings.push(LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            });
        }

        Ok(LoadResult { config, warnings })
    }
}

fn with_path(err: ConfigError, source: &Path) -> ConfigError {
    match err {
        ConfigError::ParseError {
            path,
            line,
            message,
        } if path.as_os_str().is_empty() => ConfigError::ParseError {
            path: source.to_path_buf(),
            line,
            message,
        },
        other => other,
    }
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

/// What an unset variable expands to.
enum Fallback {
    /// `${VAR}`: empty, with a load warning
    Empty,
    /// `${VAR:-text}`
    Default(String),
    /// `${VAR:?text}`: loading fails
    Required(String),
}

/// A `${...}` reference.
struct VarRef {
    name: String,
    fallback: Fallback,
}

/// Expands `${VAR}`, `${VAR:-text}`, `${VAR:?text}` and `$$` in raw YAML,
/// before parsing, so expanded values are typed by YAML like literals.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    fn substitute(&mut self, raw: &str, source: &Path) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('$', Some('$')) => {
                    chars.next();
                    out.push('$');
                }
                ('$', Some('{')) => {
                    chars.next();
                    let var = parse_reference(&mut chars)?;
                    out.push_str(&self.expand(var, source)?);
                }
                _ => out.push(c),
            }
        }

        Ok(out)
    }

    fn expand(&mut self, var: VarRef, source: &Path) -> Result<String, ConfigError> {
        if let Ok(value) = std::env::var(&var.name) {
            return Ok(value);
        }
        match var.fallback {
            Fallback::Default(text) => Ok(text),
            Fallback::Required(text) => Err(ConfigError::EnvVarNotSet {
                var: var.name,
                location: text,
            }),
            Fallback::Empty => {
                self.warnings.push(LoadWarning {
                    message: format!(
                        "Environment variable '{}' is not set, using empty string",
                        var.name
                    ),
                    location: Some(source.display().to_string()),
                });
                Ok(String::new())
            }
        }
    }
}

/// Reads a reference body, the opening `${` already consumed.
fn parse_reference(chars: &mut Chars<'_>) -> Result<VarRef, ConfigError> {
    let mut name = String::new();

    while let Some(c) = chars.next() {
        let fallback = match (c, chars.peek()) {
            ('}', _) => Fallback::Empty,
            (':', Some('-')) => {
                chars.next();
                Fallback::Default(read_braced(chars)?)
            }
            (':', Some('?')) => {
                chars.next();
                Fallback::Required(read_braced(chars)?)
            }
            _ => {
                name.push(c);
                continue;
            }
        };
        return Ok(VarRef { name, fallback });
    }

    Err(unclosed(&format!("${{{name}")))
}

/// Reads up to the `}` closing the reference; inner braces must balance.
fn read_braced(chars: &mut Chars<'_>) -> Result<String, ConfigError> {
    let mut text = String::new();
    let mut open = 1usize;

    for c in chars.by_ref() {
        match c {
            '{' => open += 1,
            '}' => {
                open -= 1;
                if open == 0 {
                    return Ok(text);
                }
            }
            _ => {}
        }
        text.push(c);
    }

    Err(unclosed(&text))
}

/// Path is filled in by the caller.
fn unclosed(fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::new(),
        line: None,
        message: format!("Unclosed environment variable reference: {fragment}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::ViolationPolicy;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_substitution_default() {
        let mut sub = EnvSubstitution::new();
        let result = sub
            .substitute(
                "max_phase_depth: ${PHASETRACK_TEST_NONEXISTENT_XYZ123:-12}",
                Path::new("test.yaml"),
            )
            .unwrap();
        assert_eq!(result, "max_phase_depth: 12");
    }

    #[test]
    fn test_env_substitution_required_missing() {
        let mut sub = EnvSubstitution::new();
        let result = sub.substitute(
            "value: ${PHASETRACK_TEST_REQUIRED_XYZ123:?must be set}",
            Path::new("test.yaml"),
        );
        match result {
            Err(ConfigError::EnvVarNotSet { var, .. }) => {
                assert_eq!(var, "PHASETRACK_TEST_REQUIRED_XYZ123");
            }
            other => panic!("expected EnvVarNotSet, got {other:?}"),
        }
    }

    #[test]
    fn test_env_substitution_escaped_dollar_and_missing_warning() {
        let mut sub = EnvSubstitution::new();
        let result = sub
            .substitute(
                "a: $$100\nb: ${PHASETRACK_TEST_WARN_XYZ123}",
                Path::new("test.yaml"),
            )
            .unwrap();
        assert_eq!(result, "a: $100\nb: ");
        assert_eq!(sub.warnings.len(), 1);
        assert!(sub.warnings[0].message.contains("PHASETRACK_TEST_WARN_XYZ123"));
    }

    #[test]
    fn test_default_keeps_balanced_braces_and_colons() {
        let mut sub = EnvSubstitution::new();
        let result = sub
            .substitute(
                "a: ${PHASETRACK_TEST_BRACES_XYZ123:-{x: 1}}\nb: ${PHASETRACK_TEST:COLON_XYZ123:-ok}",
                Path::new("test.yaml"),
            )
            .unwrap();
        assert_eq!(result, "a: {x: 1}\nb: ok");
        assert!(sub.warnings.is_empty());
    }

    #[test]
    fn test_unclosed_reference_is_parse_error() {
        let loader = ConfigLoader::default();
        let err = loader
            .load_str("max_phase_depth: ${OOPS", Path::new("cfg.yaml"))
            .unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert_eq!(path, PathBuf::from("cfg.yaml")),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_load_file_with_bom() {
        let file = write_config("\u{feff}max_phase_depth: 8\nviolation_policy: recover\n");
        let result = ConfigLoader::default().load(file.path()).unwrap();
        assert_eq!(result.config.max_phase_depth, 8);
        assert_eq!(result.config.violation_policy, ViolationPolicy::Recover);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::default()
            .load(Path::new("/nonexistent/phasetrack.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn test_file_too_large() {
        let file = write_config("max_phase_depth: 8\n");
        let err = ConfigLoader::with_max_size(4).load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = write_config("   \n");
        let err = ConfigLoader::default().load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_validation_errors_fail_load() {
        let file = write_config("max_phase_depth: 0\n");
        let err = ConfigLoader::default().load(file.path()).unwrap_err();
        match err {
            ConfigError::ValidationError { errors, .. } => {
                assert_eq!(errors[0].path, "max_phase_depth");
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_warnings_are_returned() {
        let file = write_config("phases:\n  block_worker:\n    capture_limit: 0\n");
        let result = ConfigLoader::default().load(file.path()).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].location.as_deref(), Some("phases.block_worker.capture_limit"));
    }
}
