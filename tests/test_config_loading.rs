mod common;

use std::io::Write;

use phasetrack::config::{ConfigLoader, ViolationPolicy};
use phasetrack::effect::{BlockPos, EffectKind};
use phasetrack::error::ConfigError;
use phasetrack::{CapturedEffect, ItemStack, PhaseKind, PhaseTracker};

use common::{RecordingWorld, fixture_path, plugin_cause};

fn temp_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn fixture_config_loads() {
    let result = ConfigLoader::default()
        .load(&fixture_path("valid_config.yaml"))
        .unwrap();
    let config = result.config;
    assert_eq!(config.max_phase_depth, 32);
    assert_eq!(config.violation_policy, ViolationPolicy::Recover);
    assert!(config.logging.block_changes);
    assert_eq!(
        config.phases[&PhaseKind::ScheduledTask].partial_apply_on_failure,
        vec![EffectKind::BlockChange]
    );
    assert!(result.warnings.is_empty());
}

#[test]
fn invalid_fixture_reports_every_error() {
    let err = ConfigLoader::default()
        .load(&fixture_path("invalid_config.yaml"))
        .unwrap_err();
    match err {
        ConfigError::ValidationError { errors, .. } => {
            let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(
                paths,
                vec![
                    "max_phase_depth",
                    "phases.idle",
                    "phases.listener:general.partial_apply_on_failure",
                ]
            );
        }
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

#[test]
fn env_default_substitution() {
    let file = temp_config(
        "max_phase_depth: ${PHASETRACK_IT_DEPTH_UNSET_XYZ:-5}\nviolation_policy: recover\n",
    );
    let result = ConfigLoader::default().load(file.path()).unwrap();
    assert_eq!(result.config.max_phase_depth, 5);
}

#[test]
fn syntax_error_reports_line() {
    let err = ConfigLoader::default()
        .load(&fixture_path("bad_yaml.yaml"))
        .unwrap_err();
    match err {
        ConfigError::ParseError { line, .. } => assert!(line.is_some()),
        other => panic!("expected ParseError, got {other:?}"),
    }
}

/// A loaded capture limit turns surplus captures into audit-only ones.
#[test]
fn loaded_capture_limit_applies_to_tracker() {
    let file = temp_config(
        "violation_policy: recover\nphases:\n  custom_spawn:\n    capture_limit: 1\n",
    );
    let config = ConfigLoader::default().load(file.path()).unwrap().config;
    let mut tracker = PhaseTracker::new(config);
    let mut world = RecordingWorld::new();

    let token = tracker.enter(PhaseKind::CustomSpawn, plugin_cause("spawner")).unwrap();
    for x in 0..3 {
        let _ = tracker.capture(CapturedEffect::item_drop(
            ItemStack::new(format!("minecraft:item_{x}"), 1),
            BlockPos::new(x, 64, 0),
        ));
    }
    let report = tracker.exit(token, &mut world).unwrap();

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].transactions().len(), 1);
    assert_eq!(report.audit_only, 2);
    assert_eq!(world.spawns().len(), 3);
}
