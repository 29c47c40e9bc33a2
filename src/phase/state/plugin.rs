//! Phases entered on behalf of plugins and commands.

use crate::effect::{EffectKind, SpawnType};

use super::CapturingState;

/// Plugin-driven block worker: block changes and the entities they spawn.
pub static BLOCK_WORKER: CapturingState =
    CapturingState::new(&[EffectKind::BlockChange, EffectKind::EntitySpawn])
        .spawning_as(SpawnType::Block);

/// Custom spawns through the API.
pub static CUSTOM_SPAWN: CapturingState =
    CapturingState::new(&[EffectKind::EntitySpawn, EffectKind::ItemDrop])
        .spawning_as(SpawnType::Custom)
        .custom_spawns();

/// A scheduled plugin task.
pub static SCHEDULED_TASK: CapturingState =
    CapturingState::new(&EffectKind::ALL).spawning_as(SpawnType::Plugin);

/// Entity teleport, including chunk loads it triggers.
pub static TELEPORT: CapturingState = CapturingState::new(&[
    EffectKind::EntitySpawn,
    EffectKind::EntityDespawn,
    EffectKind::BlockChange,
]);

/// Command execution. The command source heads the cause chain.
pub static COMMAND_EXECUTION: CapturingState =
    CapturingState::new(&EffectKind::ALL).spawning_as(SpawnType::Command);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::state::ExecutionPhase;

    #[test]
    fn test_capture_tables() {
        assert!(BLOCK_WORKER.should_capture(EffectKind::BlockChange));
        assert!(!BLOCK_WORKER.should_capture(EffectKind::ItemDrop));
        assert!(!CUSTOM_SPAWN.should_capture(EffectKind::BlockChange));
        assert!(!TELEPORT.should_capture(EffectKind::SlotChange));
        assert!(
            EffectKind::ALL
                .iter()
                .all(|k| SCHEDULED_TASK.should_capture(*k) && COMMAND_EXECUTION.should_capture(*k))
        );
    }
}
