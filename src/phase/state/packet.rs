//! Phases entered while processing inventory packets.
//!
//! Both click phases route spawned entities into the drop event of the
//! click instead of a generic spawn event, credited to the clicking
//! player. On failure the player's cursor is put back.

use tracing::{debug, error};

use crate::effect::{CapturedEffect, EffectKind, EntityId, SpawnType};
use crate::event::{Event, EventKind, Snapshot, Transaction};
use crate::phase::context::{CaptureRecord, ClickButton, CompletedPhaseContext, PhaseExtra};
use crate::world::WorldModel;

use super::{EventBuilder, ExecutionPhase};

const CLICK_CAPTURES: [EffectKind; 3] = [
    EffectKind::SlotChange,
    EffectKind::ItemDrop,
    EffectKind::EntitySpawn,
];

/// Click inside an open inventory window.
#[derive(Debug, Clone, Copy)]
pub struct InventoryClickState;

/// Strategy of `PhaseKind::InventoryClick`.
pub static INVENTORY_CLICK: InventoryClickState = InventoryClickState;

/// Item thrown out of an open window by clicking outside of it.
#[derive(Debug, Clone, Copy)]
pub struct DropItemOutsideWindowState;

/// Strategy of `PhaseKind::DropItemOutsideWindow`.
pub static DROP_ITEM_OUTSIDE_WINDOW: DropItemOutsideWindowState = DropItemOutsideWindowState;

impl ExecutionPhase for InventoryClickState {
    fn should_capture(&self, kind: EffectKind) -> bool {
        CLICK_CAPTURES.contains(&kind)
    }

    fn build_events(&self, context: &CompletedPhaseContext) -> Vec<Event> {
        let records = context.event_captures();
        let player = context.extra().player;

        // Slot transactions first: drops may reference the slots they
        // were taken from.
        let mut builder = EventBuilder::new(context).with_spawn_context(SpawnType::DroppedItem);
        for record in records.iter().filter(|r| is_slot(r)) {
            builder.add(EventKind::ClickInventory, record);
        }
        for record in records.iter().filter(|r| !is_slot(r)) {
            builder.add_transaction(EventKind::DropItem, record, credited(record, player));
        }
        builder.finish()
    }

    fn unwind(
        &self,
        context: &CompletedPhaseContext,
        exceptional: bool,
        world: &mut dyn WorldModel,
    ) {
        restore_cursor(context, exceptional, world);
    }
}

impl ExecutionPhase for DropItemOutsideWindowState {
    fn should_capture(&self, kind: EffectKind) -> bool {
        CLICK_CAPTURES.contains(&kind)
    }

    fn default_extra(&self) -> PhaseExtra {
        PhaseExtra {
            ignores_item_pre_merging: true,
            ..PhaseExtra::default()
        }
    }

    fn build_events(&self, context: &CompletedPhaseContext) -> Vec<Event> {
        let kind = match context.extra().used_button.unwrap_or_default() {
            ClickButton::Primary => EventKind::ClickInventoryDropOutsidePrimary,
            ClickButton::Secondary => EventKind::ClickInventoryDropOutsideSecondary,
        };
        let player = context.extra().player;
        let mut builder = EventBuilder::new(context).with_spawn_context(SpawnType::DroppedItem);
        for record in context.event_captures() {
            builder.add_transaction(kind, record, credited(record, player));
        }
        builder.finish()
    }

    fn unwind(
        &self,
        context: &CompletedPhaseContext,
        exceptional: bool,
        world: &mut dyn WorldModel,
    ) {
        restore_cursor(context, exceptional, world);
    }
}

fn is_slot(record: &CaptureRecord) -> bool {
    record.effect.kind() == EffectKind::SlotChange
}

/// Transaction for a capture, with spawned entities credited to `player`.
fn credited(record: &CaptureRecord, player: Option<EntityId>) -> Transaction {
    let mut transaction = Transaction::from_record(record);
    if let (CapturedEffect::EntitySpawn { entity, .. }, Some(player)) = (&record.effect, player) {
        if entity.creator.is_none() {
            transaction.default = Snapshot::Entity(entity.clone().with_creator(player));
        }
    }
    transaction
}

fn restore_cursor(context: &CompletedPhaseContext, exceptional: bool, world: &mut dyn WorldModel) {
    if !exceptional {
        return;
    }
    let extra = context.extra();
    let (Some(player), Some(cursor)) = (extra.player, extra.cursor_before.as_ref()) else {
        return;
    };
    match world.restore_cursor(player, cursor) {
        Ok(()) => debug!(phase = %context.kind(), %player, %cursor, "cursor restored"),
        Err(e) => error!(phase = %context.kind(), %player, error = %e, "failed to restore cursor"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::{Cause, CauseObject, EventContextKey};
    use crate::config::ViolationPolicy;
    use crate::effect::{BlockPos, EntitySnapshot, ItemStack, SlotRef};
    use crate::phase::{PhaseContext, PhaseKind};

    fn click_context(kind: PhaseKind, player: EntityId) -> PhaseContext {
        let mut ctx = PhaseContext::new(kind, Cause::of(CauseObject::Player("Steve".into())))
            .with_policy(ViolationPolicy::Recover);
        ctx.extra_mut().player = Some(player);
        ctx
    }

    #[test]
    fn test_click_builds_slot_event_before_drop_event() {
        let player = EntityId::random();
        let mut ctx = click_context(PhaseKind::InventoryClick, player);
        ctx.capture(CapturedEffect::item_drop(
            ItemStack::new("minecraft:dirt", 64),
            BlockPos::new(0, 64, 0),
        ));
        ctx.capture(CapturedEffect::SlotChange {
            slot: SlotRef {
                owner: player,
                index: 3,
            },
            before: Some(ItemStack::new("minecraft:dirt", 64)),
            after: None,
        });
        let done = ctx.complete().unwrap();
        let events = INVENTORY_CLICK.build_events(&done);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::ClickInventory, EventKind::DropItem]);
        assert_eq!(
            events[1].cause().context(&EventContextKey::SpawnType),
            Some(&SpawnType::DroppedItem.into())
        );
        assert!(events[0].cause().context(&EventContextKey::SpawnType).is_none());
    }

    #[test]
    fn test_spawned_entities_are_credited_to_player() {
        let player = EntityId::random();
        let mut ctx = click_context(PhaseKind::InventoryClick, player);
        ctx.capture(CapturedEffect::EntitySpawn {
            entity: EntitySnapshot::item(ItemStack::new("minecraft:dirt", 1), BlockPos::new(0, 64, 0)),
            spawn_type: SpawnType::DroppedItem,
        });
        let done = ctx.complete().unwrap();
        let events = INVENTORY_CLICK.build_events(&done);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::DropItem);
        match &events[0].transactions()[0].default {
            Snapshot::Entity(entity) => assert_eq!(entity.creator, Some(player)),
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn test_drop_outside_window_uses_button_and_keeps_drops_apart() {
        let player = EntityId::random();
        let mut ctx = click_context(PhaseKind::DropItemOutsideWindow, player);
        ctx.extra_mut().used_button = Some(ClickButton::Secondary);
        let pos = BlockPos::new(0, 64, 0);
        ctx.capture(CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), pos));
        ctx.capture(CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 1), pos));
        let done = ctx.complete().unwrap();
        let events = DROP_ITEM_OUTSIDE_WINDOW.build_events(&done);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::ClickInventoryDropOutsideSecondary);
        assert_eq!(events[0].transactions().len(), 2);
    }
}
