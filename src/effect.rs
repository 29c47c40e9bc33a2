//! Captured world mutations.
//!
//! A [`CapturedEffect`] is a buffered, not-yet-applied description of a
//! mutation the engine attempted while a phase was active. Each variant
//! carries enough before/after state to report the change to observers
//! and to apply it later.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Domain values
// ============================================================================

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    /// East/west coordinate
    pub x: i32,
    /// Height
    pub y: i32,
    /// North/south coordinate
    pub z: i32,
}

impl BlockPos {
    /// Creates a position from its coordinates.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block state identifier, e.g. `minecraft:stone`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockState(pub String);

impl BlockState {
    /// Identifier of the empty block.
    pub const AIR: &'static str = "minecraft:air";

    /// Creates a block state from its identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty block.
    #[must_use]
    pub fn air() -> Self {
        Self(Self::AIR.to_string())
    }

    /// Whether this is the empty block.
    #[must_use]
    pub fn is_air(&self) -> bool {
        self.0 == Self::AIR
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Largest quantity one item stack holds.
pub const MAX_STACK_SIZE: u32 = 64;

/// A stack of items of one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item type identifier, e.g. `minecraft:dirt`
    pub item: String,
    /// Number of items in the stack
    pub quantity: u32,
}

impl ItemStack {
    /// Creates a stack.
    #[must_use]
    pub fn new(item: impl Into<String>, quantity: u32) -> Self {
        Self {
            item: item.into(),
            quantity,
        }
    }

    /// Whether the stack holds no items.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Whether `other` can be folded into this stack without going past
    /// [`MAX_STACK_SIZE`].
    #[must_use]
    pub fn stacks_with(&self, other: &Self) -> bool {
        self.item == other.item
            && self
                .quantity
                .checked_add(other.quantity)
                .is_some_and(|total| total <= MAX_STACK_SIZE)
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x {}", self.quantity, self.item)
    }
}

/// Stable entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of an entity as it would exist in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity identifier; a fresh one when omitted
    #[serde(default = "EntityId::random")]
    pub id: EntityId,
    /// Entity type identifier, e.g. `minecraft:zombie`
    pub entity_type: String,
    /// Block position of the entity
    pub position: BlockPos,
    /// Carried stack, for item entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemStack>,
    /// Entity credited with creating this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<EntityId>,
}

impl EntitySnapshot {
    /// Entity type identifier of dropped item entities.
    pub const ITEM_TYPE: &'static str = "minecraft:item";

    /// Creates an entity snapshot with a fresh id.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, position: BlockPos) -> Self {
        Self {
            id: EntityId::random(),
            entity_type: entity_type.into(),
            position,
            item: None,
            creator: None,
        }
    }

    /// Creates the item entity that carries a dropped stack.
    #[must_use]
    pub fn item(stack: ItemStack, position: BlockPos) -> Self {
        Self {
            item: Some(stack),
            ..Self::new(Self::ITEM_TYPE, position)
        }
    }

    /// Returns this snapshot credited to `creator`.
    #[must_use]
    pub const fn with_creator(mut self, creator: EntityId) -> Self {
        self.creator = Some(creator);
        self
    }

    /// Whether this is an item entity.
    #[must_use]
    pub fn is_item(&self) -> bool {
        self.entity_type == Self::ITEM_TYPE
    }
}

/// Why an entity was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnType {
    /// Item dropped by a player or container
    DroppedItem,
    /// Placed by a player (armor stands, boats)
    Placement,
    /// Spawned directly by a plugin
    Plugin,
    /// Custom spawn requested through the API
    Custom,
    /// Natural world spawning
    WorldSpawner,
    /// Passive spawning (breeding, spawn eggs)
    Passive,
    /// Produced by a block (dispenser, block break)
    Block,
    /// Spawned by a command
    Command,
}

/// Why an entity was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DespawnReason {
    /// Entity died
    Killed,
    /// Natural despawn
    Despawned,
    /// Chunk unloaded
    Unloaded,
    /// Removed by a plugin
    Plugin,
    /// Item picked up
    PickedUp,
}

/// A slot in an entity's inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    /// Inventory owner
    pub owner: EntityId,
    /// Slot index within the inventory
    pub index: u32,
}

/// Something custom data can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataHolder {
    /// Block (tile entity) at a position
    Block {
        /// Block position
        position: BlockPos,
    },
    /// Entity
    Entity {
        /// Entity id
        id: EntityId,
    },
}

/// Key of an attached data value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKey(pub String);

impl DataKey {
    /// Creates a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Captured effects
// ============================================================================

/// Kind tag of a [`CapturedEffect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Block state change
    BlockChange,
    /// Entity spawn
    EntitySpawn,
    /// Entity removal
    EntityDespawn,
    /// Item dropped into the world
    ItemDrop,
    /// Inventory slot transaction
    SlotChange,
    /// Custom data attached to a holder
    DataAttach,
}

impl EffectKind {
    /// Every effect kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::BlockChange,
        Self::EntitySpawn,
        Self::EntityDespawn,
        Self::ItemDrop,
        Self::SlotChange,
        Self::DataAttach,
    ];

    /// Snake-case name used in logs, metrics, and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockChange => "block_change",
            Self::EntitySpawn => "entity_spawn",
            Self::EntityDespawn => "entity_despawn",
            Self::ItemDrop => "item_drop",
            Self::SlotChange => "slot_change",
            Self::DataAttach => "data_attach",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buffered world mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapturedEffect {
    /// A block changed state.
    BlockChange {
        /// Where
        position: BlockPos,
        /// State before the change
        before: BlockState,
        /// State after the change
        after: BlockState,
    },
    /// An entity is about to enter the world.
    EntitySpawn {
        /// The spawned entity
        entity: EntitySnapshot,
        /// Why it spawned
        spawn_type: SpawnType,
    },
    /// An entity is about to leave the world.
    EntityDespawn {
        /// The removed entity
        entity: EntitySnapshot,
        /// Why it was removed
        reason: DespawnReason,
    },
    /// A stack is about to be dropped into the world.
    ItemDrop {
        /// The dropped stack
        item_stack: ItemStack,
        /// Where it is dropped from
        source_position: BlockPos,
    },
    /// An inventory slot changed contents.
    SlotChange {
        /// The slot
        slot: SlotRef,
        /// Contents before
        before: Option<ItemStack>,
        /// Contents after
        after: Option<ItemStack>,
    },
    /// A data value was attached to (or removed from) a holder.
    DataAttach {
        /// Owner of the value
        holder: DataHolder,
        /// Value key
        key: DataKey,
        /// Value before
        before: Option<serde_json::Value>,
        /// Value after; `None` removes the key
        after: Option<serde_json::Value>,
    },
}

impl CapturedEffect {
    /// Returns the kind tag of this effect.
    #[must_use]
    pub const fn kind(&self) -> EffectKind {
        match self {
            Self::BlockChange { .. } => EffectKind::BlockChange,
            Self::EntitySpawn { .. } => EffectKind::EntitySpawn,
            Self::EntityDespawn { .. } => EffectKind::EntityDespawn,
            Self::ItemDrop { .. } => EffectKind::ItemDrop,
            Self::SlotChange { .. } => EffectKind::SlotChange,
            Self::DataAttach { .. } => EffectKind::DataAttach,
        }
    }

    /// Convenience constructor for a block change.
    #[must_use]
    pub const fn block_change(position: BlockPos, before: BlockState, after: BlockState) -> Self {
        Self::BlockChange {
            position,
            before,
            after,
        }
    }

    /// Convenience constructor for an item drop.
    #[must_use]
    pub const fn item_drop(item_stack: ItemStack, source_position: BlockPos) -> Self {
        Self::ItemDrop {
            item_stack,
            source_position,
        }
    }

    /// Position the effect happens at, when it has one.
    #[must_use]
    pub fn position(&self) -> Option<BlockPos> {
        match self {
            Self::BlockChange { position, .. } => Some(*position),
            Self::EntitySpawn { entity, .. } | Self::EntityDespawn { entity, .. } => {
                Some(entity.position)
            }
            Self::ItemDrop {
                source_position, ..
            } => Some(*source_position),
            Self::DataAttach {
                holder: DataHolder::Block { position },
                ..
            } => Some(*position),
            Self::SlotChange { .. } | Self::DataAttach { .. } => None,
        }
    }

    /// Classifies a block change; `None` for other effects.
    #[must_use]
    pub fn block_change_kind(&self) -> Option<BlockChangeKind> {
        match self {
            Self::BlockChange { before, after, .. } => Some(BlockChangeKind::classify(before, after)),
            _ => None,
        }
    }
}

/// Classification of a block change by what it did to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockChangeKind {
    /// A block was removed (replaced by air)
    Break,
    /// A block was placed where there was air
    Place,
    /// A block changed into another non-air block
    Modify,
}

impl BlockChangeKind {
    /// Classifies a before/after pair.
    #[must_use]
    pub fn classify(before: &BlockState, after: &BlockState) -> Self {
        match (before.is_air(), after.is_air()) {
            (false, true) => Self::Break,
            (true, false) => Self::Place,
            _ => Self::Modify,
        }
    }
}
