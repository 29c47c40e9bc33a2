//! Structured events built from completed phases.
//!
//! Every event holds one [`Transaction`] per capture it covers. Observers
//! amend transactions by replacing their final value or invalidating
//! them; the pipeline then turns each valid transaction back into the
//! effect that gets applied.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cause::Cause;
use crate::effect::{BlockState, CapturedEffect, EffectKind, EntitySnapshot, ItemStack};
use crate::error::ObserverError;
use crate::observer::Amendment;
use crate::phase::{CaptureRecord, PhaseKind};

/// Before or after state of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Snapshot {
    /// Nothing there (entity not yet spawned, or removed)
    Absent,
    /// A block state
    Block(BlockState),
    /// An entity
    Entity(EntitySnapshot),
    /// A dropped stack
    Item(ItemStack),
    /// Contents of an inventory slot
    Slot(Option<ItemStack>),
    /// An attached data value
    Data(Option<serde_json::Value>),
}

impl Snapshot {
    /// Whether both snapshots describe the same sort of thing.
    #[must_use]
    pub const fn same_variant(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Absent, Self::Absent)
                | (Self::Block(_), Self::Block(_))
                | (Self::Entity(_), Self::Entity(_))
                | (Self::Item(_), Self::Item(_))
                | (Self::Slot(_), Self::Slot(_))
                | (Self::Data(_), Self::Data(_))
        )
    }
}

/// One captured effect as presented to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Sequence of the capture this transaction came from
    pub sequence: u64,
    /// Kind of the underlying effect
    pub effect_kind: EffectKind,
    /// State before the effect
    pub original: Snapshot,
    /// State the effect would produce
    pub default: Snapshot,
    /// Replacement state set by an observer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Snapshot>,
    /// Cleared by an observer to drop just this transaction
    pub valid: bool,
    /// Later captures folded into this one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<u64>,
}

impl Transaction {
    /// Builds the transaction for a captured record.
    #[must_use]
    pub fn from_record(record: &CaptureRecord) -> Self {
        let (original, default) = match &record.effect {
            CapturedEffect::BlockChange { before, after, .. } => {
                (Snapshot::Block(before.clone()), Snapshot::Block(after.clone()))
            }
            CapturedEffect::EntitySpawn { entity, .. } => {
                (Snapshot::Absent, Snapshot::Entity(entity.clone()))
            }
            CapturedEffect::EntityDespawn { entity, .. } => {
                (Snapshot::Entity(entity.clone()), Snapshot::Absent)
            }
            CapturedEffect::ItemDrop { item_stack, .. } => {
                (Snapshot::Absent, Snapshot::Item(item_stack.clone()))
            }
            CapturedEffect::SlotChange { before, after, .. } => {
                (Snapshot::Slot(before.clone()), Snapshot::Slot(after.clone()))
            }
            CapturedEffect::DataAttach { before, after, .. } => {
                (Snapshot::Data(before.clone()), Snapshot::Data(after.clone()))
            }
        };
        Self {
            sequence: record.sequence,
            effect_kind: record.effect.kind(),
            original,
            default,
            custom: None,
            valid: true,
            merged: Vec::new(),
        }
    }

    /// Number of captures this transaction stands for.
    #[must_use]
    pub fn capture_count(&self) -> usize {
        1 + self.merged.len()
    }

    /// The final state: the observer's replacement if any, else the default.
    #[must_use]
    pub fn effective(&self) -> &Snapshot {
        self.custom.as_ref().unwrap_or(&self.default)
    }

    /// Rebuilds `effect` with this transaction's final state.
    ///
    /// Returns `None` when the final state does not fit the effect, which
    /// amendment validation rules out.
    #[must_use]
    pub fn resolve(&self, effect: &CapturedEffect) -> Option<CapturedEffect> {
        let mut resolved = effect.clone();
        match (&mut resolved, self.effective()) {
            (CapturedEffect::BlockChange { after, .. }, Snapshot::Block(state)) => {
                *after = state.clone();
            }
            (CapturedEffect::EntitySpawn { entity, .. }, Snapshot::Entity(snapshot)) => {
                *entity = snapshot.clone();
            }
            (CapturedEffect::EntityDespawn { .. }, Snapshot::Absent) => {}
            (CapturedEffect::ItemDrop { item_stack, .. }, Snapshot::Item(stack)) => {
                *item_stack = stack.clone();
            }
            (CapturedEffect::SlotChange { after, .. }, Snapshot::Slot(stack)) => {
                after.clone_from(stack);
            }
            (CapturedEffect::DataAttach { after, .. }, Snapshot::Data(value)) => {
                after.clone_from(value);
            }
            _ => return None,
        }
        Some(resolved)
    }
}

/// Kind of a structured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Blocks removed
    ChangeBlockBreak,
    /// Blocks placed
    ChangeBlockPlace,
    /// Blocks changed in place
    ChangeBlockModify,
    /// Entities spawned
    SpawnEntity,
    /// Entities spawned through the custom spawn API
    SpawnEntityCustom,
    /// Entities removed
    DestructEntity,
    /// Items dropped
    DropItem,
    /// Items dropped through the custom spawn API
    DropItemCustom,
    /// Inventory click
    ClickInventory,
    /// Item dropped outside an open window, whole stack
    ClickInventoryDropOutsidePrimary,
    /// Item dropped outside an open window, single item
    ClickInventoryDropOutsideSecondary,
    /// Inventory slots changed outside of a click
    ChangeInventory,
    /// Data values changed
    ChangeData,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::ChangeBlockBreak,
        Self::ChangeBlockPlace,
        Self::ChangeBlockModify,
        Self::SpawnEntity,
        Self::SpawnEntityCustom,
        Self::DestructEntity,
        Self::DropItem,
        Self::DropItemCustom,
        Self::ClickInventory,
        Self::ClickInventoryDropOutsidePrimary,
        Self::ClickInventoryDropOutsideSecondary,
        Self::ChangeInventory,
        Self::ChangeData,
    ];

    /// Snake-case name used in logs, metrics, and scenario files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChangeBlockBreak => "change_block_break",
            Self::ChangeBlockPlace => "change_block_place",
            Self::ChangeBlockModify => "change_block_modify",
            Self::SpawnEntity => "spawn_entity",
            Self::SpawnEntityCustom => "spawn_entity_custom",
            Self::DestructEntity => "destruct_entity",
            Self::DropItem => "drop_item",
            Self::DropItemCustom => "drop_item_custom",
            Self::ClickInventory => "click_inventory",
            Self::ClickInventoryDropOutsidePrimary => "click_inventory_drop_outside_primary",
            Self::ClickInventoryDropOutsideSecondary => "click_inventory_drop_outside_secondary",
            Self::ChangeInventory => "change_inventory",
            Self::ChangeData => "change_data",
        }
    }

    /// Whether events of this kind put new entities into the world.
    #[must_use]
    pub const fn spawns_entities(self) -> bool {
        matches!(
            self,
            Self::SpawnEntity
                | Self::SpawnEntityCustom
                | Self::DropItem
                | Self::DropItemCustom
                | Self::ClickInventoryDropOutsidePrimary
                | Self::ClickInventoryDropOutsideSecondary
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event identifier, unique per tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// An event built from a completed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    id: EventId,
    kind: EventKind,
    phase: PhaseKind,
    cause: Cause,
    transactions: Vec<Transaction>,
    cancelled: bool,
}

impl Event {
    /// Creates an event. The tracker assigns the id when it fires it.
    #[must_use]
    pub const fn new(
        kind: EventKind,
        phase: PhaseKind,
        cause: Cause,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            id: EventId(0),
            kind,
            phase,
            cause,
            transactions,
            cancelled: false,
        }
    }

    /// Event id.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Kind of the phase that built this event.
    #[must_use]
    pub const fn phase(&self) -> PhaseKind {
        self.phase
    }

    /// Why it happened.
    #[must_use]
    pub const fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Transactions, in capture order.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Whether an observer cancelled the event.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Smallest capture sequence covered by the event.
    #[must_use]
    pub fn first_sequence(&self) -> Option<u64> {
        self.transactions.iter().map(|t| t.sequence).min()
    }

    /// Transactions that survive observer amendments.
    pub fn valid_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|t| t.valid)
    }

    /// Drops transactions failing `keep`, returning how many captures
    /// they stood for.
    pub(crate) fn retain_transactions(&mut self, mut keep: impl FnMut(&Transaction) -> bool) -> usize {
        let mut removed = 0;
        self.transactions.retain(|t| {
            let kept = keep(t);
            if !kept {
                removed += t.capture_count();
            }
            kept
        });
        removed
    }

    pub(crate) const fn set_id(&mut self, id: EventId) {
        self.id = id;
    }

    pub(crate) const fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Applies one observer amendment.
    ///
    /// A replacement must describe the same sort of state as the default
    /// it replaces; anything else is rejected and leaves the event as is.
    pub(crate) fn apply_amendment(&mut self, amendment: &Amendment) -> Result<(), ObserverError> {
        let index = amendment.transaction();
        let Some(transaction) = self.transactions.get_mut(index) else {
            return Err(ObserverError::InvalidAmendment(format!(
                "{} has no transaction {index}",
                self.id
            )));
        };
        match amendment {
            Amendment::Invalidate { .. } => transaction.valid = false,
            Amendment::Replace { value, .. } => {
                if !transaction.default.same_variant(value) {
                    return Err(ObserverError::InvalidAmendment(format!(
                        "transaction {index} of {} is a {}, replacement does not fit",
                        self.id, transaction.effect_kind
                    )));
                }
                transaction.custom = Some(value.clone());
            }
        }
        Ok(())
    }
}
