//! Tick boundaries and listener dispatch.

use tracing::debug;

use crate::effect::{EffectKind, SpawnType};
use crate::event::Event;
use crate::phase::context::CompletedPhaseContext;
use crate::world::WorldModel;

use super::{CapturingState, ExecutionPhase};

/// A world tick.
pub static WORLD_TICK: CapturingState =
    CapturingState::new(&EffectKind::ALL).spawning_as(SpawnType::WorldSpawner);

/// A server tick.
pub static SERVER_TICK: CapturingState = CapturingState::new(&EffectKind::ALL);

/// Listener dispatch. Read-only: builds no events, anything a listener
/// does to the world is audit-only.
#[derive(Debug, Clone, Copy)]
pub struct ListenerState;

/// Strategy shared by every listener phase.
pub static LISTENER: ListenerState = ListenerState;

impl ExecutionPhase for ListenerState {
    fn should_capture(&self, _kind: EffectKind) -> bool {
        false
    }

    fn build_events(&self, _context: &CompletedPhaseContext) -> Vec<Event> {
        Vec::new()
    }

    fn unwind(
        &self,
        context: &CompletedPhaseContext,
        exceptional: bool,
        _world: &mut dyn WorldModel,
    ) {
        let mutations = context.captures().len();
        if mutations > 0 {
            debug!(
                phase = %context.kind(),
                mutations,
                exceptional,
                "listener mutated the world outside of any event"
            );
        }
    }
}
