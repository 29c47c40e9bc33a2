//! Phase kind tags.
//!
//! [`PhaseKind`] is the closed set of work classifications. Each kind maps
//! to a stateless strategy through [`PhaseKind::state`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::{self, ExecutionPhase};

/// Event listener flavours. Listener phases never build events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Generic plugin listener
    General,
    /// Event bus dispatch
    EventBus,
    /// Listener run before a world tick
    PreWorldTick,
    /// Listener run after a world tick
    PostWorldTick,
    /// Listener run before a server tick
    PreServerTick,
    /// Listener run after a server tick
    PostServerTick,
}

/// Classification of a unit of engine work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PhaseKind {
    /// Sentinel at the bottom of every stack; rejects captures.
    Idle,
    /// A plugin mutating blocks through a block worker
    BlockWorker,
    /// A plugin spawning entities through the API
    CustomSpawn,
    /// A scheduled plugin task
    ScheduledTask,
    /// A plugin teleporting an entity
    Teleport,
    /// A command (player, console, or command block) executing
    CommandExecution,
    /// One world tick
    WorldTick,
    /// One server tick
    ServerTick,
    /// An event listener running
    Listener(ListenerKind),
    /// A player clicking in an inventory window
    InventoryClick,
    /// A player dropping the cursor stack outside the window
    DropItemOutsideWindow,
}

impl PhaseKind {
    /// Every phase kind.
    pub const ALL: [Self; 16] = [
        Self::Idle,
        Self::BlockWorker,
        Self::CustomSpawn,
        Self::ScheduledTask,
        Self::Teleport,
        Self::CommandExecution,
        Self::WorldTick,
        Self::ServerTick,
        Self::Listener(ListenerKind::General),
        Self::Listener(ListenerKind::EventBus),
        Self::Listener(ListenerKind::PreWorldTick),
        Self::Listener(ListenerKind::PostWorldTick),
        Self::Listener(ListenerKind::PreServerTick),
        Self::Listener(ListenerKind::PostServerTick),
        Self::InventoryClick,
        Self::DropItemOutsideWindow,
    ];

    /// Stable name used in logs, metrics, and configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BlockWorker => "block_worker",
            Self::CustomSpawn => "custom_spawn",
            Self::ScheduledTask => "scheduled_task",
            Self::Teleport => "teleport",
            Self::CommandExecution => "command_execution",
            Self::WorldTick => "world_tick",
            Self::ServerTick => "server_tick",
            Self::Listener(ListenerKind::General) => "listener:general",
            Self::Listener(ListenerKind::EventBus) => "listener:event_bus",
            Self::Listener(ListenerKind::PreWorldTick) => "listener:pre_world_tick",
            Self::Listener(ListenerKind::PostWorldTick) => "listener:post_world_tick",
            Self::Listener(ListenerKind::PreServerTick) => "listener:pre_server_tick",
            Self::Listener(ListenerKind::PostServerTick) => "listener:post_server_tick",
            Self::InventoryClick => "inventory_click",
            Self::DropItemOutsideWindow => "drop_item_outside_window",
        }
    }

    /// The strategy implementing this kind's capture, event, and unwind rules.
    #[must_use]
    pub fn state(self) -> &'static dyn ExecutionPhase {
        match self {
            Self::Idle => &state::IDLE,
            Self::BlockWorker => &state::plugin::BLOCK_WORKER,
            Self::CustomSpawn => &state::plugin::CUSTOM_SPAWN,
            Self::ScheduledTask => &state::plugin::SCHEDULED_TASK,
            Self::Teleport => &state::plugin::TELEPORT,
            Self::CommandExecution => &state::plugin::COMMAND_EXECUTION,
            Self::WorldTick => &state::tick::WORLD_TICK,
            Self::ServerTick => &state::tick::SERVER_TICK,
            Self::Listener(_) => &state::tick::LISTENER,
            Self::InventoryClick => &state::packet::INVENTORY_CLICK,
            Self::DropItemOutsideWindow => &state::packet::DROP_ITEM_OUTSIDE_WINDOW,
        }
    }

    /// Whether this is the idle sentinel.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether this is a listener phase.
    #[must_use]
    pub const fn is_listener(self) -> bool {
        matches!(self, Self::Listener(_))
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PhaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown phase kind '{s}'"))
    }
}

impl TryFrom<String> for PhaseKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhaseKind> for String {
    fn from(kind: PhaseKind) -> Self {
        kind.name().to_string()
    }
}
