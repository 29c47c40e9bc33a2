//! The world model the tracker applies accepted effects to.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde_json::Value;

use crate::effect::{
    BlockPos, BlockState, CapturedEffect, DataHolder, DataKey, DespawnReason, EntityId,
    EntitySnapshot, ItemStack, SlotRef, SpawnType,
};
use crate::error::ApplyError;

/// Mutation primitives of a world.
///
/// Only the tracker's apply step calls these. Each call either applies
/// the change completely or rejects it with an [`ApplyError`].
pub trait WorldModel {
    /// Sets the block at `position` to `after`.
    ///
    /// # Errors
    ///
    /// Returns an error when the world rejects the change.
    fn apply_block_change(
        &mut self,
        position: BlockPos,
        before: &BlockState,
        after: &BlockState,
    ) -> Result<(), ApplyError>;

    /// Adds an entity to the world.
    ///
    /// # Errors
    ///
    /// Returns an error when the world rejects the entity.
    fn spawn_entity(
        &mut self,
        entity: &EntitySnapshot,
        spawn_type: SpawnType,
    ) -> Result<(), ApplyError>;

    /// Removes an entity from the world.
    ///
    /// # Errors
    ///
    /// Returns an error when the entity does not exist.
    fn remove_entity(&mut self, entity: EntityId, reason: DespawnReason) -> Result<(), ApplyError>;

    /// Sets the contents of an inventory slot; `None` empties it.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot cannot be written.
    fn transfer_item(&mut self, slot: SlotRef, stack: Option<&ItemStack>)
    -> Result<(), ApplyError>;

    /// Attaches a data value to a holder; `None` removes it.
    ///
    /// # Errors
    ///
    /// The default implementation rejects every call.
    fn attach_data(
        &mut self,
        holder: DataHolder,
        key: &DataKey,
        value: Option<&Value>,
    ) -> Result<(), ApplyError> {
        let _ = (holder, key, value);
        Err(ApplyError::Unsupported("attach_data"))
    }

    /// Puts a stack back on a player's cursor.
    ///
    /// # Errors
    ///
    /// The default implementation rejects every call.
    fn restore_cursor(&mut self, player: EntityId, cursor: &ItemStack) -> Result<(), ApplyError> {
        let _ = (player, cursor);
        Err(ApplyError::Unsupported("restore_cursor"))
    }
}

/// Applies one effect through the matching world primitive.
///
/// Dropped stacks become item entities credited to `owner`. Empty stacks
/// are skipped.
///
/// # Errors
///
/// Propagates the world's rejection.
pub fn apply_effect(
    world: &mut dyn WorldModel,
    effect: &CapturedEffect,
    owner: Option<EntityId>,
) -> Result<(), ApplyError> {
    match effect {
        CapturedEffect::BlockChange {
            position,
            before,
            after,
        } => world.apply_block_change(*position, before, after),
        CapturedEffect::EntitySpawn { entity, spawn_type } => {
            world.spawn_entity(entity, *spawn_type)
        }
        CapturedEffect::EntityDespawn { entity, reason } => {
            world.remove_entity(entity.id, *reason)
        }
        CapturedEffect::ItemDrop {
            item_stack,
            source_position,
        } => {
            if item_stack.is_empty() {
                return Ok(());
            }
            let mut entity = EntitySnapshot::item(item_stack.clone(), *source_position);
            entity.creator = owner;
            world.spawn_entity(&entity, SpawnType::DroppedItem)
        }
        CapturedEffect::SlotChange { slot, after, .. } => world.transfer_item(*slot, after.as_ref()),
        CapturedEffect::DataAttach {
            holder, key, after, ..
        } => world.attach_data(*holder, key, after.as_ref()),
    }
}

/// A complete world held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryWorld {
    min_y: i32,
    max_y: i32,
    blocks: BTreeMap<BlockPos, BlockState>,
    entities: IndexMap<EntityId, EntitySnapshot>,
    slots: HashMap<SlotRef, ItemStack>,
    data: HashMap<(DataHolder, DataKey), Value>,
    cursors: HashMap<EntityId, ItemStack>,
}

impl Default for InMemoryWorld {
    fn default() -> Self {
        Self::new(0, 256)
    }
}

impl InMemoryWorld {
    /// Creates an empty world whose blocks live in `min_y..max_y`.
    #[must_use]
    pub fn new(min_y: i32, max_y: i32) -> Self {
        Self {
            min_y,
            max_y,
            blocks: BTreeMap::new(),
            entities: IndexMap::new(),
            slots: HashMap::new(),
            data: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    /// Block at `position`; air when never set.
    #[must_use]
    pub fn block(&self, position: BlockPos) -> BlockState {
        self.blocks
            .get(&position)
            .cloned()
            .unwrap_or_else(BlockState::air)
    }

    /// Entity by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.get(&id)
    }

    /// Entities in spawn order.
    pub fn entities(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.entities.values()
    }

    /// Number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of non-air blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Contents of an inventory slot.
    #[must_use]
    pub fn slot(&self, slot: SlotRef) -> Option<&ItemStack> {
        self.slots.get(&slot)
    }

    /// Attached data value.
    #[must_use]
    pub fn data(&self, holder: DataHolder, key: &DataKey) -> Option<&Value> {
        self.data.get(&(holder, key.clone()))
    }

    /// Stack on a player's cursor.
    #[must_use]
    pub fn cursor(&self, player: EntityId) -> Option<&ItemStack> {
        self.cursors.get(&player)
    }

    /// Sets a player's cursor directly.
    pub fn set_cursor(&mut self, player: EntityId, cursor: Option<ItemStack>) {
        match cursor {
            Some(stack) => {
                self.cursors.insert(player, stack);
            }
            None => {
                self.cursors.remove(&player);
            }
        }
    }

    /// Adds an entity directly, bypassing any tracking.
    pub fn insert_entity(&mut self, entity: EntitySnapshot) {
        self.entities.insert(entity.id, entity);
    }

    const fn check_bounds(&self, position: BlockPos) -> Result<(), ApplyError> {
        if position.y < self.min_y || position.y >= self.max_y {
            Err(ApplyError::OutOfBounds(position))
        } else {
            Ok(())
        }
    }
}

impl WorldModel for InMemoryWorld {
    fn apply_block_change(
        &mut self,
        position: BlockPos,
        _before: &BlockState,
        after: &BlockState,
    ) -> Result<(), ApplyError> {
        self.check_bounds(position)?;
        if after.is_air() {
            self.blocks.remove(&position);
        } else {
            self.blocks.insert(position, after.clone());
        }
        Ok(())
    }

    fn spawn_entity(
        &mut self,
        entity: &EntitySnapshot,
        _spawn_type: SpawnType,
    ) -> Result<(), ApplyError> {
        self.check_bounds(entity.position)?;
        if self.entities.contains_key(&entity.id) {
            return Err(ApplyError::DuplicateEntity(entity.id));
        }
        self.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    fn remove_entity(&mut self, entity: EntityId, _reason: DespawnReason) -> Result<(), ApplyError> {
        self.entities
            .shift_remove(&entity)
            .map(|_| ())
            .ok_or(ApplyError::UnknownEntity(entity))
    }

    fn transfer_item(
        &mut self,
        slot: SlotRef,
        stack: Option<&ItemStack>,
    ) -> Result<(), ApplyError> {
        match stack.filter(|s| !s.is_empty()) {
            Some(stack) => {
                self.slots.insert(slot, stack.clone());
            }
            None => {
                self.slots.remove(&slot);
            }
        }
        Ok(())
    }

    fn attach_data(
        &mut self,
        holder: DataHolder,
        key: &DataKey,
        value: Option<&Value>,
    ) -> Result<(), ApplyError> {
        if let DataHolder::Entity { id } = holder {
            if !self.entities.contains_key(&id) {
                return Err(ApplyError::UnknownEntity(id));
            }
        }
        match value {
            Some(value) => {
                self.data.insert((holder, key.clone()), value.clone());
            }
            None => {
                self.data.remove(&(holder, key.clone()));
            }
        }
        Ok(())
    }

    fn restore_cursor(&mut self, player: EntityId, cursor: &ItemStack) -> Result<(), ApplyError> {
        self.cursors.insert(player, cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_changes_and_bounds() {
        let mut world = InMemoryWorld::default();
        let pos = BlockPos::new(1, 64, 1);
        let stone = BlockState::new("minecraft:stone");
        world
            .apply_block_change(pos, &BlockState::air(), &stone)
            .unwrap();
        assert_eq!(world.block(pos), stone);

        let below = BlockPos::new(0, -1, 0);
        assert_eq!(
            world.apply_block_change(below, &BlockState::air(), &stone),
            Err(ApplyError::OutOfBounds(below))
        );
    }

    #[test]
    fn test_item_drop_spawns_credited_item_entity() {
        let mut world = InMemoryWorld::default();
        let player = EntityId::random();
        let drop = CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 64), BlockPos::new(0, 64, 0));
        apply_effect(&mut world, &drop, Some(player)).unwrap();

        let entity = world.entities().next().unwrap();
        assert!(entity.is_item());
        assert_eq!(entity.creator, Some(player));
        assert_eq!(entity.item, Some(ItemStack::new("minecraft:dirt", 64)));
    }

    #[test]
    fn test_empty_drop_is_skipped() {
        let mut world = InMemoryWorld::default();
        let drop = CapturedEffect::item_drop(ItemStack::new("minecraft:dirt", 0), BlockPos::new(0, 64, 0));
        apply_effect(&mut world, &drop, None).unwrap();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_entity_lifecycle_errors() {
        let mut world = InMemoryWorld::default();
        let zombie = EntitySnapshot::new("minecraft:zombie", BlockPos::new(0, 64, 0));
        world.spawn_entity(&zombie, SpawnType::WorldSpawner).unwrap();
        assert_eq!(
            world.spawn_entity(&zombie, SpawnType::WorldSpawner),
            Err(ApplyError::DuplicateEntity(zombie.id))
        );
        world.remove_entity(zombie.id, DespawnReason::Killed).unwrap();
        assert_eq!(
            world.remove_entity(zombie.id, DespawnReason::Killed),
            Err(ApplyError::UnknownEntity(zombie.id))
        );
    }
}
