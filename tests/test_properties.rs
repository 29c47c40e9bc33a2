//! Property tests for stack discipline and capture ordering.

mod common;

use common::{RecordingWorld, WorldCall, recovering_tracker};
use phasetrack::effect::{BlockPos, BlockState, DespawnReason, EntityId, EntitySnapshot, ItemStack};
use phasetrack::{CapturedEffect, Cause, EventKind, PhaseKind, Snapshot, SpawnType};
use proptest::prelude::*;

/// Phase kinds that accept every effect kind into events.
const CAPTURING: [PhaseKind; 4] = [
    PhaseKind::ScheduledTask,
    PhaseKind::CommandExecution,
    PhaseKind::WorldTick,
    PhaseKind::ServerTick,
];

#[derive(Debug, Clone)]
enum Op {
    Push(usize),
    Capture(i32),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..CAPTURING.len()).prop_map(Op::Push),
        (0..64i32).prop_map(Op::Capture),
        Just(Op::Pop),
    ]
}

/// One captured effect of a mixed sequence; its position is its index.
#[derive(Debug, Clone, Copy)]
enum Mixed {
    Break,
    Place,
    Modify,
    Drop(u32),
    Spawn,
    Despawn,
}

fn mixed() -> impl Strategy<Value = Mixed> {
    prop_oneof![
        Just(Mixed::Break),
        Just(Mixed::Place),
        Just(Mixed::Modify),
        (1..=64u32).prop_map(Mixed::Drop),
        Just(Mixed::Spawn),
        Just(Mixed::Despawn),
    ]
}

/// What a world call touched: a block, a spawn position, or a removed id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Touched {
    Block(BlockPos),
    Spawned(BlockPos),
    Removed(EntityId),
}

fn entity_at(index: usize) -> EntitySnapshot {
    let mut entity = EntitySnapshot::new("minecraft:sheep", BlockPos::new(index as i32, 64, 0));
    entity.id = EntityId(uuid::Uuid::from_u128(index as u128 + 1));
    entity
}

fn mixed_effect(index: usize, case: Mixed) -> (CapturedEffect, Touched) {
    let pos = BlockPos::new(index as i32, 64, 0);
    let stone = BlockState::new("minecraft:stone");
    match case {
        Mixed::Break => (
            CapturedEffect::block_change(pos, stone, BlockState::air()),
            Touched::Block(pos),
        ),
        Mixed::Place => (
            CapturedEffect::block_change(pos, BlockState::air(), stone),
            Touched::Block(pos),
        ),
        Mixed::Modify => (
            CapturedEffect::block_change(pos, stone, BlockState::new("minecraft:granite")),
            Touched::Block(pos),
        ),
        Mixed::Drop(quantity) => (
            CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", quantity), pos),
            Touched::Spawned(pos),
        ),
        Mixed::Spawn => (
            CapturedEffect::EntitySpawn {
                entity: entity_at(index),
                spawn_type: SpawnType::Plugin,
            },
            Touched::Spawned(pos),
        ),
        Mixed::Despawn => {
            let entity = entity_at(index);
            let id = entity.id;
            (
                CapturedEffect::EntityDespawn {
                    entity,
                    reason: DespawnReason::Plugin,
                },
                Touched::Removed(id),
            )
        }
    }
}

fn touched(call: &WorldCall) -> Option<Touched> {
    match call {
        WorldCall::BlockChange(pos, _) => Some(Touched::Block(*pos)),
        WorldCall::Spawn(entity, _) => Some(Touched::Spawned(entity.position)),
        WorldCall::Remove(id, _) => Some(Touched::Removed(*id)),
        _ => None,
    }
}

fn place(x: i32) -> CapturedEffect {
    CapturedEffect::block_change(
        BlockPos::new(x, 64, 0),
        BlockState::air(),
        BlockState::new(format!("minecraft:block_{x}")),
    )
}

proptest! {
    /// Any sequence of balanced push/pop pairs returns the stack to its
    /// starting depth and context, whatever is captured in between.
    #[test]
    fn balanced_sequences_restore_depth(ops in prop::collection::vec(op(), 0..64)) {
        let mut tracker = recovering_tracker();
        let mut world = RecordingWorld::new();
        let idle = tracker.current().id();
        let mut tokens = Vec::new();

        for op in ops {
            match op {
                Op::Push(kind) => {
                    let below = tracker.current().id();
                    if let Ok(token) = tracker.enter(CAPTURING[kind], Cause::empty()) {
                        tokens.push((token, below));
                    }
                }
                Op::Capture(x) => {
                    let _ = tracker.capture(place(x));
                }
                Op::Pop => {
                    if let Some((token, below)) = tokens.pop() {
                        prop_assert!(tracker.exit(token, &mut world).is_ok());
                        prop_assert_eq!(tracker.current().id(), below);
                    }
                }
            }
            prop_assert_eq!(tracker.stack().depth(), tokens.len());
        }

        while let Some((token, below)) = tokens.pop() {
            prop_assert!(tracker.exit(token, &mut world).is_ok());
            prop_assert_eq!(tracker.current().id(), below);
        }
        prop_assert!(tracker.stack().is_idle());
        prop_assert_eq!(tracker.current().id(), idle);
    }

    /// Within one phase, transactions of each event follow capture order,
    /// and effects reach the world in capture order.
    #[test]
    fn capture_order_is_preserved(xs in prop::collection::vec(0..1000i32, 1..40)) {
        let mut tracker = recovering_tracker();
        let mut world = RecordingWorld::new();

        let token = tracker.enter(PhaseKind::ScheduledTask, Cause::empty()).unwrap();
        for &x in &xs {
            let _ = tracker.capture(place(x));
        }
        let report = tracker.exit(token, &mut world).unwrap();

        prop_assert_eq!(report.events.len(), 1);
        let event = &report.events[0];
        prop_assert_eq!(event.kind(), EventKind::ChangeBlockPlace);

        let sequences: Vec<u64> = event.transactions().iter().map(|t| t.sequence).collect();
        let expected: Vec<u64> = (0..xs.len() as u64).collect();
        prop_assert_eq!(sequences, expected);

        let finals: Vec<Snapshot> = event.transactions().iter().map(|t| t.default.clone()).collect();
        let captured: Vec<Snapshot> = xs
            .iter()
            .map(|x| Snapshot::Block(BlockState::new(format!("minecraft:block_{x}"))))
            .collect();
        prop_assert_eq!(finals, captured);

        let applied: Vec<BlockPos> = xs.iter().map(|&x| BlockPos::new(x, 64, 0)).collect();
        prop_assert_eq!(world.block_changes(), applied);
    }

    /// For mixed effect kinds, every event lists its transactions in
    /// capture order, each capture lands in exactly one event, and the
    /// world sees the effects in global capture order.
    #[test]
    fn mixed_capture_order_is_preserved(cases in prop::collection::vec(mixed(), 1..48)) {
        let mut tracker = recovering_tracker();
        let mut world = RecordingWorld::new();

        let mut expected = Vec::new();
        let token = tracker.enter(PhaseKind::ScheduledTask, Cause::empty()).unwrap();
        for (index, case) in cases.iter().enumerate() {
            let (effect, touch) = mixed_effect(index, *case);
            let _ = tracker.capture(effect);
            expected.push(touch);
        }
        let report = tracker.exit(token, &mut world).unwrap();

        let mut seen: Vec<u64> = Vec::new();
        for event in &report.events {
            let sequences: Vec<u64> = event.transactions().iter().map(|t| t.sequence).collect();
            prop_assert!(
                sequences.windows(2).all(|w| w[0] < w[1]),
                "{:?} out of order: {:?}",
                event.kind(),
                sequences
            );
            seen.extend(sequences);
        }
        seen.sort_unstable();
        let all: Vec<u64> = (0..cases.len() as u64).collect();
        prop_assert_eq!(seen, all);

        let calls: Vec<Touched> = world.calls.iter().filter_map(touched).collect();
        prop_assert_eq!(calls, expected);
    }
}
