//! Configuration schema types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::effect::EffectKind;
use crate::phase::PhaseKind;
use crate::phase::stack::DEFAULT_MAX_DEPTH;

/// Environment variable overriding the default nesting limit.
pub const MAX_DEPTH_ENV: &str = "PHASETRACK_MAX_PHASE_DEPTH";

/// Root configuration of a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Nesting limit; pushes beyond it are refused
    pub max_phase_depth: usize,

    /// What a protocol violation does
    pub violation_policy: ViolationPolicy,

    /// Which applied effects are logged
    pub logging: LoggingCategory,

    /// Per-kind overrides of phase extras
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub phases: IndexMap<PhaseKind, PhaseOverrides>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_phase_depth: env_or(MAX_DEPTH_ENV, DEFAULT_MAX_DEPTH),
            violation_policy: ViolationPolicy::default(),
            logging: LoggingCategory::default(),
            phases: IndexMap::new(),
        }
    }
}

/// Handling of phase protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Recover, log, then panic on cause-frame misuse. Phase stack
    /// violations are always recovered. Default in debug builds.
    Panic,
    /// Log, recover to a consistent state, and continue.
    /// Default in release builds.
    Recover,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Recover
        }
    }
}

/// Logging toggles for applied effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoggingCategory {
    /// Log every applied block change at `info`
    pub block_changes: bool,
    /// Log every spawned entity and dropped item at `info`
    pub entity_spawns: bool,
    /// Log every removed entity at `info`
    pub entity_despawns: bool,
    /// Include a stack dump in protocol violation logs
    pub stack_dump_on_violation: bool,
}

impl Default for LoggingCategory {
    fn default() -> Self {
        Self {
            block_changes: false,
            entity_spawns: false,
            entity_despawns: false,
            stack_dump_on_violation: true,
        }
    }
}

/// Overrides for every phase of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseOverrides {
    /// Captures used for events; the rest are audit-only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_limit: Option<usize>,

    /// Effect kinds still applied when the phase fails
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial_apply_on_failure: Vec<EffectKind>,
}

/// Parses an environment variable, falling back to `default`.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
