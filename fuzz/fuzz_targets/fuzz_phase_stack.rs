#![no_main]

//! Drives push/capture/pop sequences from raw bytes, including pops of
//! buried phases, and checks the stack always unwinds back to idle.

use libfuzzer_sys::fuzz_target;
use phasetrack::effect::{BlockPos, BlockState, ItemStack};
use phasetrack::{
    CapturedEffect, Cause, CauseObject, InMemoryWorld, PhaseKind, PhaseToken, PhaseTracker,
    TrackerConfig, ViolationPolicy,
};

fuzz_target!(|data: &[u8]| {
    let mut tracker = PhaseTracker::new(TrackerConfig {
        max_phase_depth: 16,
        violation_policy: ViolationPolicy::Recover,
        ..TrackerConfig::default()
    });
    let mut world = InMemoryWorld::default();
    let mut tokens: Vec<PhaseToken> = Vec::new();

    for chunk in data.chunks(2) {
        let (op, arg) = (chunk[0], chunk.get(1).copied().unwrap_or(0));
        match op % 4 {
            0 => {
                let kind = PhaseKind::ALL[usize::from(arg) % PhaseKind::ALL.len()];
                let cause = Cause::of(CauseObject::Plugin(format!("fuzz-{arg}")));
                if let Ok(token) = tracker.enter(kind, cause) {
                    tokens.push(token);
                }
            }
            1 => {
                let position = BlockPos::new(i32::from(arg), 64, 0);
                let effect = if arg % 2 == 0 {
                    CapturedEffect::block_change(
                        position,
                        BlockState::air(),
                        BlockState::new("minecraft:stone"),
                    )
                } else {
                    CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), position)
                };
                let _ = tracker.capture(effect);
            }
            2 | 3 if !tokens.is_empty() => {
                let index = usize::from(arg) % tokens.len();
                let token = tokens.remove(index);
                let _ = if op % 4 == 2 {
                    tracker.exit(token, &mut world)
                } else {
                    tracker.exit_exceptionally(token, &mut world)
                };
                tokens.retain(|t| tracker.stack().contains(*t));
            }
            _ => {}
        }
    }

    while let Some(token) = tokens.pop() {
        let _ = tracker.exit(token, &mut world);
    }
    assert_eq!(tracker.stack().depth(), 0);
});
