//! Built-in scenarios embedded in the binary.
//!
//! `phasetrack replay --builtin inventory-drop` replays one without any
//! file on disk.

use std::path::Path;
use std::sync::LazyLock;

use super::ScenarioScript;
use crate::error::ScenarioError;

/// A scenario script shipped with the binary.
#[derive(Debug)]
pub struct BuiltinScenario {
    /// Unique identifier (kebab-case)
    pub name: &'static str,

    /// Short human-readable description
    pub description: &'static str,

    /// Tags for filtering
    pub tags: &'static [&'static str],

    /// Raw YAML content
    pub yaml: &'static str,
}

impl BuiltinScenario {
    /// Parses the embedded script.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Parse`] if the embedded YAML is invalid.
    pub fn script(&self) -> Result<ScenarioScript, ScenarioError> {
        ScenarioScript::from_yaml(self.yaml, Path::new(self.name))
    }
}

static BUILTIN_SCENARIOS: LazyLock<Vec<BuiltinScenario>> = LazyLock::new(|| {
    vec![
        BuiltinScenario {
            name: "inventory-drop",
            description: "Player drops a stack from an inventory click; the item entity is credited to them",
            tags: &["packet", "drop", "attribution"],
            yaml: include_str!("../../scenarios/inventory-drop.yaml"),
        },
        BuiltinScenario {
            name: "nested-tasks",
            description: "Scheduled task running a command; each phase fires events for its own captures only",
            tags: &["plugin", "nesting"],
            yaml: include_str!("../../scenarios/nested-tasks.yaml"),
        },
        BuiltinScenario {
            name: "failed-click",
            description: "Inventory click failing mid-way; captures are discarded and the cursor restored",
            tags: &["packet", "failure"],
            yaml: include_str!("../../scenarios/failed-click.yaml"),
        },
        BuiltinScenario {
            name: "protected-blocks",
            description: "Observer cancelling block breaks while placements from the same phase apply",
            tags: &["plugin", "observer", "cause-frames"],
            yaml: include_str!("../../scenarios/protected-blocks.yaml"),
        },
    ]
});

/// Looks up a built-in scenario by exact name.
#[must_use]
pub fn find_scenario(name: &str) -> Option<&'static BuiltinScenario> {
    BUILTIN_SCENARIOS.iter().find(|s| s.name == name)
}

/// Lists built-in scenarios, optionally filtered by tag.
#[must_use]
pub fn list_scenarios(tag: Option<&str>) -> Vec<&'static BuiltinScenario> {
    BUILTIN_SCENARIOS
        .iter()
        .filter(|s| tag.is_none_or(|t| s.tags.contains(&t)))
        .collect()
}

/// Suggests the closest built-in name for a mistyped one.
///
/// Returns a match only when its Damerau-Levenshtein distance is at most 3.
#[must_use]
pub fn suggest_scenario(input: &str) -> Option<&'static str> {
    BUILTIN_SCENARIOS
        .iter()
        .map(|s| (s.name, strsim::damerau_levenshtein(input, s.name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name)
}

/// Finds a built-in scenario or explains why there is none.
///
/// # Errors
///
/// Returns [`ScenarioError::UnknownBuiltin`], naming the closest match
/// when there is one.
pub fn resolve(name: &str) -> Result<&'static BuiltinScenario, ScenarioError> {
    find_scenario(name).ok_or_else(|| {
        let message = suggest_scenario(name).map_or_else(
            || format!("'{name}'"),
            |hint| format!("'{name}' (did you mean '{hint}'?)"),
        );
        ScenarioError::UnknownBuiltin(message)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::{TrackerConfig, ViolationPolicy};
    use crate::effect::{BlockPos, BlockState, EntityId};
    use crate::event::EventKind;
    use crate::pipeline::PhaseTracker;
    use crate::scenario::{ReplaySummary, replay};
    use crate::world::InMemoryWorld;

    fn replay_builtin(name: &str) -> (ReplaySummary, InMemoryWorld) {
        let script = find_scenario(name).unwrap().script().unwrap();
        let mut world = script.build_world().unwrap();
        let mut tracker = PhaseTracker::new(TrackerConfig {
            violation_policy: ViolationPolicy::Recover,
            ..TrackerConfig::default()
        });
        script.register_observers(tracker.observers_mut());
        let summary = replay(&script, &mut tracker, &mut world).unwrap();
        (summary, world)
    }

    #[test]
    fn all_builtin_scenarios_parse_and_replay_cleanly() {
        for scenario in list_scenarios(None) {
            let script = scenario.script().unwrap();
            assert_eq!(script.name, scenario.name);
            let (summary, _world) = replay_builtin(scenario.name);
            assert!(
                summary.violations.is_empty(),
                "{}: {:?}",
                scenario.name,
                summary.violations
            );
            assert_eq!(summary.left_open, 0, "{}", scenario.name);
        }
    }

    #[test]
    fn builtin_names_are_unique() {
        let names: HashSet<_> = list_scenarios(None).iter().map(|s| s.name).collect();
        assert_eq!(names.len(), list_scenarios(None).len());
    }

    #[test]
    fn tag_filter() {
        let packet = list_scenarios(Some("packet"));
        assert_eq!(packet.len(), 2);
        assert!(list_scenarios(Some("no-such-tag")).is_empty());
    }

    #[test]
    fn typo_suggestion() {
        assert_eq!(suggest_scenario("inventory-drp"), Some("inventory-drop"));
        assert_eq!(suggest_scenario("zzzzzzzzzzzz"), None);
        let err = resolve("nested-task").unwrap_err();
        assert!(err.to_string().contains("nested-tasks"));
    }

    #[test]
    fn inventory_drop_credits_player() {
        let (summary, world) = replay_builtin("inventory-drop");
        let kinds: Vec<_> = summary.phases[0].events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::ClickInventory, EventKind::DropItem]);

        let steve = EntityId(uuid::Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap());
        let dropped: Vec<_> = world.entities().collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].creator, Some(steve));
    }

    #[test]
    fn failed_click_applies_nothing() {
        let (summary, world) = replay_builtin("failed-click");
        assert!(summary.phases[0].exceptional);
        assert_eq!(summary.applied(), 0);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn protected_blocks_keeps_bedrock() {
        let (summary, world) = replay_builtin("protected-blocks");
        assert_eq!(
            world.block(BlockPos::new(0, 64, 0)),
            BlockState::new("minecraft:bedrock")
        );
        assert_eq!(
            world.block(BlockPos::new(0, 65, 0)),
            BlockState::new("minecraft:glass")
        );
        assert_eq!(summary.applied(), 1);
    }

    #[test]
    fn nested_tasks_isolate_captures() {
        let (summary, world) = replay_builtin("nested-tasks");
        assert_eq!(summary.phases.len(), 2);
        assert_eq!(summary.phases[0].applied, 1);
        assert_eq!(summary.phases[1].applied, 2);
        assert_eq!(world.block_count(), 2);
        assert_eq!(world.entity_count(), 1);
    }
}
