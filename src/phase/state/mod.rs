//! Per-kind phase strategies.
//!
//! Each [`PhaseKind`](super::PhaseKind) resolves to a stateless
//! [`ExecutionPhase`] that decides which captures feed event construction,
//! how they become events, and what bookkeeping runs on unwind.

pub mod packet;
pub mod plugin;
pub mod tick;

use tracing::debug;

use crate::cause::{Cause, EventContextKey};
use crate::effect::{BlockChangeKind, BlockPos, CapturedEffect, EffectKind, SpawnType};
use crate::event::{Event, EventKind, Snapshot, Transaction};
use crate::world::WorldModel;

use super::context::{CaptureRecord, CompletedPhaseContext, PhaseExtra};

/// Behavior of one phase kind.
///
/// Implementations hold no mutable state; the same instance serves every
/// phase of its kind.
pub trait ExecutionPhase: Send + Sync {
    /// Whether captures of `kind` are used for event construction.
    fn should_capture(&self, kind: EffectKind) -> bool;

    /// Extras a freshly pushed phase of this kind starts with.
    fn default_extra(&self) -> PhaseExtra {
        PhaseExtra::default()
    }

    /// Builds the events for a completed phase.
    ///
    /// Must be deterministic and must only look at
    /// [`CompletedPhaseContext::event_captures`]. Captures of the same
    /// effect kind keep their relative order.
    fn build_events(&self, context: &CompletedPhaseContext) -> Vec<Event>;

    /// Runs once after events were built and applied (or discarded).
    fn unwind(
        &self,
        context: &CompletedPhaseContext,
        exceptional: bool,
        world: &mut dyn WorldModel,
    ) {
        let _ = world;
        debug!(
            phase = %context.kind(),
            id = %context.id(),
            exceptional,
            "phase unwound"
        );
    }

    /// What still applies when the phase ends exceptionally.
    fn failure_policy(&self, context: &CompletedPhaseContext) -> FailurePolicy {
        FailurePolicy::from_kinds(&context.extra().partial_apply_on_failure)
    }
}

/// Handling of captured effects after a failed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Nothing applies
    DiscardAll,
    /// Only the listed effect kinds apply
    Partial(Vec<EffectKind>),
}

impl FailurePolicy {
    /// Discard-all unless kinds were explicitly opted in.
    #[must_use]
    pub fn from_kinds(kinds: &[EffectKind]) -> Self {
        if kinds.is_empty() {
            Self::DiscardAll
        } else {
            Self::Partial(kinds.to_vec())
        }
    }

    /// Whether effects of `kind` still apply.
    #[must_use]
    pub fn allows(&self, kind: EffectKind) -> bool {
        match self {
            Self::DiscardAll => false,
            Self::Partial(kinds) => kinds.contains(&kind),
        }
    }
}

/// The sentinel at the bottom of every stack.
#[derive(Debug, Clone, Copy)]
pub struct IdleState;

/// Strategy of [`PhaseKind::Idle`](super::PhaseKind::Idle).
pub static IDLE: IdleState = IdleState;

impl ExecutionPhase for IdleState {
    fn should_capture(&self, _kind: EffectKind) -> bool {
        false
    }

    fn build_events(&self, _context: &CompletedPhaseContext) -> Vec<Event> {
        Vec::new()
    }
}

/// Table-driven strategy: captures a fixed set of effect kinds and builds
/// one event per effect classification and cause.
#[derive(Debug, Clone, Copy)]
pub struct CapturingState {
    captures: &'static [EffectKind],
    spawn_context: Option<SpawnType>,
    custom_spawns: bool,
}

impl CapturingState {
    pub(crate) const fn new(captures: &'static [EffectKind]) -> Self {
        Self {
            captures,
            spawn_context: None,
            custom_spawns: false,
        }
    }

    pub(crate) const fn spawning_as(mut self, spawn_type: SpawnType) -> Self {
        self.spawn_context = Some(spawn_type);
        self
    }

    pub(crate) const fn custom_spawns(mut self) -> Self {
        self.custom_spawns = true;
        self
    }

    fn event_kind(&self, effect: &CapturedEffect) -> EventKind {
        match (effect.kind(), self.custom_spawns) {
            (EffectKind::EntitySpawn, true) => EventKind::SpawnEntityCustom,
            (EffectKind::ItemDrop, true) => EventKind::DropItemCustom,
            _ => generic_event_kind(effect),
        }
    }
}

impl ExecutionPhase for CapturingState {
    fn should_capture(&self, kind: EffectKind) -> bool {
        self.captures.contains(&kind)
    }

    fn build_events(&self, context: &CompletedPhaseContext) -> Vec<Event> {
        let mut builder = EventBuilder::new(context);
        if let Some(spawn_type) = self.spawn_context {
            builder = builder.with_spawn_context(spawn_type);
        }
        for record in context.event_captures() {
            builder.add(self.event_kind(&record.effect), record);
        }
        builder.finish()
    }
}

/// Default event kind for an effect.
#[must_use]
pub fn generic_event_kind(effect: &CapturedEffect) -> EventKind {
    match effect {
        CapturedEffect::BlockChange { before, after, .. } => {
            match BlockChangeKind::classify(before, after) {
                BlockChangeKind::Break => EventKind::ChangeBlockBreak,
                BlockChangeKind::Place => EventKind::ChangeBlockPlace,
                BlockChangeKind::Modify => EventKind::ChangeBlockModify,
            }
        }
        CapturedEffect::EntitySpawn { .. } => EventKind::SpawnEntity,
        CapturedEffect::EntityDespawn { .. } => EventKind::DestructEntity,
        CapturedEffect::ItemDrop { .. } => EventKind::DropItem,
        CapturedEffect::SlotChange { .. } => EventKind::ChangeInventory,
        CapturedEffect::DataAttach { .. } => EventKind::ChangeData,
    }
}

struct Group {
    kind: EventKind,
    cause: Cause,
    transactions: Vec<Transaction>,
    last_drop: Option<BlockPos>,
}

/// Groups transactions into events keyed by event kind and cause.
///
/// Groups come out in order of first appearance, so events are ordered by
/// the first capture they cover.
pub(crate) struct EventBuilder<'a> {
    context: &'a CompletedPhaseContext,
    groups: Vec<Group>,
    merge_drops: bool,
    spawn_context: Option<SpawnType>,
}

impl<'a> EventBuilder<'a> {
    pub(crate) fn new(context: &'a CompletedPhaseContext) -> Self {
        Self {
            context,
            groups: Vec::new(),
            merge_drops: !context.extra().ignores_item_pre_merging,
            spawn_context: None,
        }
    }

    pub(crate) const fn with_spawn_context(mut self, spawn_type: SpawnType) -> Self {
        self.spawn_context = Some(spawn_type);
        self
    }

    pub(crate) fn add(&mut self, kind: EventKind, record: &CaptureRecord) {
        self.add_transaction(kind, record, Transaction::from_record(record));
    }

    pub(crate) fn add_transaction(
        &mut self,
        kind: EventKind,
        record: &CaptureRecord,
        transaction: Transaction,
    ) {
        let cause = self.event_cause(kind, &record.cause);
        let merge_drops = self.merge_drops;
        let index = match self
            .groups
            .iter()
            .position(|g| g.kind == kind && g.cause == cause)
        {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    kind,
                    cause,
                    transactions: Vec::new(),
                    last_drop: None,
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];

        if let CapturedEffect::ItemDrop {
            item_stack,
            source_position,
        } = &record.effect
        {
            if merge_drops && group.last_drop == Some(*source_position) {
                if let Some(last) = group.transactions.last_mut() {
                    if let Snapshot::Item(stack) = &mut last.default {
                        if stack.stacks_with(item_stack) {
                            stack.quantity = stack.quantity.saturating_add(item_stack.quantity);
                            last.merged.push(record.sequence);
                            return;
                        }
                    }
                }
            }
            group.last_drop = Some(*source_position);
        } else {
            group.last_drop = None;
        }
        group.transactions.push(transaction);
    }

    fn event_cause(&self, kind: EventKind, cause: &Cause) -> Cause {
        match self.spawn_context {
            Some(spawn_type)
                if kind.spawns_entities() && cause.context(&EventContextKey::SpawnType).is_none() =>
            {
                cause
                    .clone()
                    .with_context(EventContextKey::SpawnType, spawn_type)
            }
            _ => cause.clone(),
        }
    }

    pub(crate) fn finish(self) -> Vec<Event> {
        let phase = self.context.kind();
        self.groups
            .into_iter()
            .map(|g| Event::new(g.kind, phase, g.cause, g.transactions))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::CauseObject;
    use crate::config::ViolationPolicy;
    use crate::effect::{BlockState, ItemStack};
    use crate::phase::{PhaseContext, PhaseKind};

    fn completed(kind: PhaseKind, effects: Vec<CapturedEffect>) -> CompletedPhaseContext {
        let mut ctx = PhaseContext::new(kind, Cause::of(CauseObject::Plugin("test".into())))
            .with_policy(ViolationPolicy::Recover);
        for effect in effects {
            ctx.capture(effect);
        }
        ctx.complete().unwrap()
    }

    fn place(x: i32) -> CapturedEffect {
        CapturedEffect::block_change(
            BlockPos::new(x, 64, 0),
            BlockState::air(),
            BlockState::new("minecraft:stone"),
        )
    }

    fn brk(x: i32) -> CapturedEffect {
        CapturedEffect::block_change(
            BlockPos::new(x, 64, 0),
            BlockState::new("minecraft:stone"),
            BlockState::air(),
        )
    }

    #[test]
    fn test_failure_policy_defaults_to_discard_all() {
        assert_eq!(FailurePolicy::from_kinds(&[]), FailurePolicy::DiscardAll);
        let partial = FailurePolicy::from_kinds(&[EffectKind::BlockChange]);
        assert!(partial.allows(EffectKind::BlockChange));
        assert!(!partial.allows(EffectKind::ItemDrop));
    }

    #[test]
    fn test_events_split_by_block_classification_in_capture_order() {
        let ctx = completed(PhaseKind::BlockWorker, vec![place(0), brk(1), place(2)]);
        let events = PhaseKind::BlockWorker.state().build_events(&ctx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::ChangeBlockPlace);
        let seqs: Vec<_> = events[0].transactions().iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(events[1].kind(), EventKind::ChangeBlockBreak);
    }

    #[test]
    fn test_block_worker_ignores_item_drops() {
        let drop = CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), BlockPos::new(0, 64, 0));
        let ctx = completed(PhaseKind::BlockWorker, vec![drop]);
        assert!(PhaseKind::BlockWorker.state().build_events(&ctx).is_empty());
    }

    #[test]
    fn test_adjacent_drops_merge() {
        let pos = BlockPos::new(0, 64, 0);
        let ctx = completed(
            PhaseKind::ScheduledTask,
            vec![
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 3), pos),
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 4), pos),
                CapturedEffect::item_drop(ItemStack::new("minecraft:sand", 1), pos),
            ],
        );
        let events = PhaseKind::ScheduledTask.state().build_events(&ctx);
        assert_eq!(events.len(), 1);
        let txs = events[0].transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].default, Snapshot::Item(ItemStack::new("minecraft:dirt", 7)));
        assert_eq!(txs[0].merged, vec![1]);
    }

    #[test]
    fn test_drop_merging_stops_at_full_stack() {
        let pos = BlockPos::new(0, 64, 0);
        let ctx = completed(
            PhaseKind::ScheduledTask,
            vec![
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 40), pos),
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 24), pos),
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 64), pos),
                CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), pos),
            ],
        );
        let events = PhaseKind::ScheduledTask.state().build_events(&ctx);
        let txs = events[0].transactions();
        let quantities: Vec<_> = txs
            .iter()
            .map(|t| match &t.default {
                Snapshot::Item(stack) => stack.quantity,
                other => panic!("expected an item snapshot, got {other:?}"),
            })
            .collect();
        assert_eq!(quantities, vec![64, 64, 1]);
        assert_eq!(txs[0].merged, vec![1]);
        assert!(txs[1].merged.is_empty());
    }

    #[test]
    fn test_custom_spawn_events_carry_spawn_type() {
        let drop = CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), BlockPos::new(0, 64, 0));
        let ctx = completed(PhaseKind::CustomSpawn, vec![drop]);
        let events = PhaseKind::CustomSpawn.state().build_events(&ctx);
        assert_eq!(events[0].kind(), EventKind::DropItemCustom);
        assert_eq!(
            events[0].cause().context(&EventContextKey::SpawnType),
            Some(&SpawnType::Custom.into())
        );
    }

    #[test]
    fn test_distinct_causes_build_distinct_events() {
        let mut ctx = PhaseContext::new(
            PhaseKind::ScheduledTask,
            Cause::of(CauseObject::Plugin("test".into())),
        )
        .with_policy(ViolationPolicy::Recover);
        ctx.capture(place(0));
        {
            let mut frame = ctx.cause_frame(CauseObject::Player("Alex".into()));
            frame.capture(place(1));
        }
        ctx.capture(place(2));
        let done = ctx.complete().unwrap();
        let events = PhaseKind::ScheduledTask.state().build_events(&done);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transactions().len(), 2);
        assert!(events[1].cause().contains(&CauseObject::Player("Alex".into())));
    }
}
