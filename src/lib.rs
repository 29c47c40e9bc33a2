//! `phasetrack` - nested-phase causation tracking for world mutations
//!
//! Engine work runs inside phases. While a phase is on the stack, world
//! mutations are captured instead of applied. When the phase pops, its
//! captures are grouped into events carrying the phase's cause, offered
//! to observers that may cancel or amend them, and only then applied.
//!
//! ```
//! use phasetrack::{
//!     BlockPos, BlockState, CapturedEffect, Cause, CauseObject, InMemoryWorld, PhaseKind,
//!     PhaseTracker,
//! };
//!
//! let mut tracker = PhaseTracker::default();
//! let mut world = InMemoryWorld::default();
//!
//! let token = tracker
//!     .enter(PhaseKind::BlockWorker, Cause::of(CauseObject::Plugin("builder".into())))
//!     .unwrap();
//! tracker.capture(CapturedEffect::block_change(
//!     BlockPos::new(0, 64, 0),
//!     BlockState::air(),
//!     BlockState::new("minecraft:stone"),
//! ));
//! let report = tracker.exit(token, &mut world).unwrap();
//!
//! assert_eq!(report.events.len(), 1);
//! assert_eq!(world.block(BlockPos::new(0, 64, 0)), BlockState::new("minecraft:stone"));
//! ```

pub mod cause;
pub mod cli;
pub mod config;
pub mod effect;
pub mod error;
pub mod event;
pub mod observability;
pub mod observer;
pub mod phase;
pub mod pipeline;
pub mod scenario;
pub mod world;

pub use cause::{Cause, CauseObject, ContextValue, EventContextKey, FrameHandle};
pub use config::{ConfigLoader, TrackerConfig, ViolationPolicy};
pub use effect::{
    BlockPos, BlockState, CapturedEffect, DespawnReason, EffectKind, EntityId, EntitySnapshot,
    ItemStack, SlotRef, SpawnType,
};
pub use error::{ApplyError, ObserverError, PhaseError, TrackerError};
pub use event::{Event, EventKind, Snapshot, Transaction};
pub use observer::{Amendment, Decision, EventFilter, ObserverId, ObserverRegistry};
pub use phase::{
    CaptureOutcome, CompletedPhaseContext, ExecutionPhase, PhaseContext, PhaseExtra, PhaseKind,
    PhaseStack, PhaseToken,
};
pub use pipeline::{PhaseReport, PhaseRun, PhaseTracker};
pub use world::{InMemoryWorld, WorldModel};
