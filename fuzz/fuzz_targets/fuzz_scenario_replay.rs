#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use phasetrack::scenario::{ScenarioScript, replay};
use phasetrack::{PhaseTracker, TrackerConfig, ViolationPolicy};

fuzz_target!(|data: &[u8]| {
    let Ok(yaml_str) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(script) = ScenarioScript::from_yaml(yaml_str, Path::new("fuzz.yaml")) else {
        return;
    };
    let Ok(mut world) = script.build_world() else {
        return;
    };

    let mut tracker = PhaseTracker::new(TrackerConfig {
        violation_policy: ViolationPolicy::Recover,
        ..TrackerConfig::default()
    });
    script.register_observers(tracker.observers_mut());
    if replay(&script, &mut tracker, &mut world).is_ok() {
        assert_eq!(tracker.stack().depth(), 0);
    }
});
