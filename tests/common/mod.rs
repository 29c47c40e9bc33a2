//! Shared integration-test harness: a world that records every apply
//! primitive call, and helpers for running the `phasetrack` binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};

use phasetrack::effect::{BlockPos, BlockState, DespawnReason, EntityId, EntitySnapshot, SlotRef};
use phasetrack::{ApplyError, Cause, CauseObject, ItemStack, SpawnType, WorldModel};
use phasetrack::{PhaseTracker, TrackerConfig, ViolationPolicy};

/// One call into the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldCall {
    BlockChange(BlockPos, BlockState),
    Spawn(EntitySnapshot, SpawnType),
    Remove(EntityId, DespawnReason),
    Transfer(SlotRef, Option<ItemStack>),
    RestoreCursor(EntityId, ItemStack),
}

/// A world that accepts everything and remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingWorld {
    pub calls: Vec<WorldCall>,
    /// Block positions the world refuses to change
    pub reject_blocks: Vec<BlockPos>,
}

impl RecordingWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that mutate the world, i.e. everything but cursor restores.
    pub fn apply_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| !matches!(c, WorldCall::RestoreCursor(..)))
            .count()
    }

    pub fn spawns(&self) -> Vec<&EntitySnapshot> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                WorldCall::Spawn(entity, _) => Some(entity),
                _ => None,
            })
            .collect()
    }

    pub fn block_changes(&self) -> Vec<BlockPos> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                WorldCall::BlockChange(pos, _) => Some(*pos),
                _ => None,
            })
            .collect()
    }
}

impl WorldModel for RecordingWorld {
    fn apply_block_change(
        &mut self,
        position: BlockPos,
        _before: &BlockState,
        after: &BlockState,
    ) -> Result<(), ApplyError> {
        if self.reject_blocks.contains(&position) {
            return Err(ApplyError::OutOfBounds(position));
        }
        self.calls
            .push(WorldCall::BlockChange(position, after.clone()));
        Ok(())
    }

    fn spawn_entity(
        &mut self,
        entity: &EntitySnapshot,
        spawn_type: SpawnType,
    ) -> Result<(), ApplyError> {
        self.calls.push(WorldCall::Spawn(entity.clone(), spawn_type));
        Ok(())
    }

    fn remove_entity(&mut self, entity: EntityId, reason: DespawnReason) -> Result<(), ApplyError> {
        self.calls.push(WorldCall::Remove(entity, reason));
        Ok(())
    }

    fn transfer_item(
        &mut self,
        slot: SlotRef,
        stack: Option<&ItemStack>,
    ) -> Result<(), ApplyError> {
        self.calls.push(WorldCall::Transfer(slot, stack.cloned()));
        Ok(())
    }

    fn restore_cursor(&mut self, player: EntityId, cursor: &ItemStack) -> Result<(), ApplyError> {
        self.calls
            .push(WorldCall::RestoreCursor(player, cursor.clone()));
        Ok(())
    }
}

/// A tracker that recovers from protocol violations instead of panicking.
pub fn recovering_tracker() -> PhaseTracker {
    PhaseTracker::new(TrackerConfig {
        violation_policy: ViolationPolicy::Recover,
        ..TrackerConfig::default()
    })
}

pub fn player_cause(name: &str) -> Cause {
    Cause::of(CauseObject::Player(name.to_string()))
}

pub fn plugin_cause(id: &str) -> Cause {
    Cause::of(CauseObject::Plugin(id.to_string()))
}

pub fn place(x: i32, block: &str) -> phasetrack::CapturedEffect {
    phasetrack::CapturedEffect::block_change(
        BlockPos::new(x, 64, 0),
        BlockState::air(),
        BlockState::new(block),
    )
}

/// Path to a fixture under `tests/fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Runs the binary to completion with the given arguments.
pub fn run_phasetrack(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_phasetrack"))
        .args(args)
        .env_remove("PHASETRACK_CONFIG")
        .env_remove("PHASETRACK_LOG_LEVEL")
        .output()
        .expect("failed to run phasetrack")
}
