//! Tracker configuration.
//!
//! YAML files are expanded for environment variables, parsed into
//! [`TrackerConfig`], and validated before use.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoadWarning};
pub use schema::{LoggingCategory, PhaseOverrides, TrackerConfig, ViolationPolicy};
pub use validation::{ValidationResult, Validator};
