//! Phase contexts.
//!
//! A [`PhaseContext`] is created when a phase is pushed and owns everything
//! captured while the phase is on top of the stack. Popping completes it
//! exactly once into a [`CompletedPhaseContext`], the read-only input to
//! event construction.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::cause::{Cause, CauseObject, ContextValue, EventContextKey, FrameHandle};
use crate::config::ViolationPolicy;
use crate::effect::{CapturedEffect, EffectKind, EntityId, ItemStack};
use crate::error::PhaseError;
use crate::observability::metrics;

use super::kind::PhaseKind;
use super::{log_violation, report_violation};

/// Identifier of a pushed phase, unique per stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PhaseId(pub u64);

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a phase instance. Transitions are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLifecycle {
    /// Created, not yet installed on a stack
    Pushed,
    /// Top (or buried) on the stack, accepting captures while on top
    Active,
    /// Popped and completed, waiting for event construction
    PoppedPendingBuild,
    /// Events built
    Built,
    /// Unwind ran; the context is finished
    Unwound,
}

impl PhaseLifecycle {
    /// The only state this one may move to.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pushed => Some(Self::Active),
            Self::Active => Some(Self::PoppedPendingBuild),
            Self::PoppedPendingBuild => Some(Self::Built),
            Self::Built => Some(Self::Unwound),
            Self::Unwound => None,
        }
    }
}

/// Mouse button of an inventory click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickButton {
    /// Left click: whole stack
    #[default]
    Primary,
    /// Right click: single item
    Secondary,
}

/// Phase-specific configuration carried by a context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseExtra {
    /// Player performing the work, credited as creator of dropped items
    pub player: Option<EntityId>,
    /// Button used, for click phases
    pub used_button: Option<ClickButton>,
    /// Cursor contents when the click started; restored on failure
    pub cursor_before: Option<ItemStack>,
    /// Report every dropped stack individually instead of folding
    /// adjacent drops of the same item into one
    pub ignores_item_pre_merging: bool,
    /// Maximum number of captures used for event construction; captures
    /// past it are kept for audit only
    pub capture_limit: Option<usize>,
    /// Effect kinds still applied when the phase fails
    pub partial_apply_on_failure: Vec<EffectKind>,
}

impl PhaseExtra {
    /// Sets the acting player.
    #[must_use]
    pub const fn with_player(mut self, player: EntityId) -> Self {
        self.player = Some(player);
        self
    }

    /// Sets the click button.
    #[must_use]
    pub const fn with_button(mut self, button: ClickButton) -> Self {
        self.used_button = Some(button);
        self
    }

    /// Sets the cursor stack to restore on failure.
    #[must_use]
    pub fn with_cursor(mut self, cursor: ItemStack) -> Self {
        self.cursor_before = Some(cursor);
        self
    }

    /// Sets the capture limit.
    #[must_use]
    pub const fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = Some(limit);
        self
    }

    /// Opts effect kinds into partial apply on failure.
    #[must_use]
    pub fn with_partial_apply(mut self, kinds: impl IntoIterator<Item = EffectKind>) -> Self {
        self.partial_apply_on_failure = kinds.into_iter().collect();
        self
    }
}

/// One captured effect with its attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    /// Capture order within the phase, starting at zero
    pub sequence: u64,
    /// The buffered mutation
    pub effect: CapturedEffect,
    /// Cause at the moment of capture, including open frames
    pub cause: Cause,
}

/// Result of a capture call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Recorded with the given sequence number
    Recorded(u64),
    /// Dropped: no phase to attribute it to
    Rejected,
}

impl CaptureOutcome {
    /// Whether the effect was recorded.
    #[must_use]
    pub const fn is_recorded(self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

#[derive(Debug)]
struct OpenFrame {
    handle: FrameHandle,
    chain_mark: usize,
    replaced: Vec<(EventContextKey, Option<ContextValue>)>,
}

/// The mutable context of an active phase.
#[derive(Debug)]
pub struct PhaseContext {
    id: PhaseId,
    kind: PhaseKind,
    cause: Cause,
    captures: Vec<CaptureRecord>,
    extra: PhaseExtra,
    frames: Vec<OpenFrame>,
    next_frame: u64,
    lifecycle: PhaseLifecycle,
    policy: ViolationPolicy,
    rejected: usize,
}

impl PhaseContext {
    /// Creates a free-standing context with the kind's default extras.
    #[must_use]
    pub fn new(kind: PhaseKind, cause: Cause) -> Self {
        Self::with_parts(
            PhaseId(0),
            kind,
            cause,
            kind.state().default_extra(),
            ViolationPolicy::default(),
        )
    }

    pub(crate) const fn with_parts(
        id: PhaseId,
        kind: PhaseKind,
        cause: Cause,
        extra: PhaseExtra,
        policy: ViolationPolicy,
    ) -> Self {
        Self {
            id,
            kind,
            cause,
            captures: Vec::new(),
            extra,
            frames: Vec::new(),
            next_frame: 0,
            lifecycle: PhaseLifecycle::Pushed,
            policy,
            rejected: 0,
        }
    }

    /// Sets how protocol violations in this context are handled.
    #[must_use]
    pub const fn with_policy(mut self, policy: ViolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Phase id.
    #[must_use]
    pub const fn id(&self) -> PhaseId {
        self.id
    }

    /// Phase kind.
    #[must_use]
    pub const fn kind(&self) -> PhaseKind {
        self.kind
    }

    /// Current cause, including open frames.
    #[must_use]
    pub const fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Phase-specific configuration.
    #[must_use]
    pub const fn extra(&self) -> &PhaseExtra {
        &self.extra
    }

    /// Mutable phase-specific configuration, for adapters populating the
    /// context right after the push.
    pub const fn extra_mut(&mut self) -> &mut PhaseExtra {
        &mut self.extra
    }

    /// Captured effects so far, in capture order.
    #[must_use]
    pub fn captures(&self) -> &[CaptureRecord] {
        &self.captures
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn lifecycle(&self) -> PhaseLifecycle {
        self.lifecycle
    }

    /// Whether `complete()` already ran.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lifecycle >= PhaseLifecycle::PoppedPendingBuild
    }

    /// Number of open cause frames.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of captures rejected by this context.
    #[must_use]
    pub const fn rejected_captures(&self) -> usize {
        self.rejected
    }

    pub(crate) fn activate(&mut self) {
        if self.lifecycle == PhaseLifecycle::Pushed {
            self.lifecycle = PhaseLifecycle::Active;
        }
    }

    /// Appends an effect to the capture log.
    ///
    /// Never fails. Effects the phase kind is not interested in are still
    /// recorded; they are excluded later, during event construction.
    /// Captures into the idle sentinel or into a completed context are
    /// logged and dropped.
    pub fn capture(&mut self, effect: CapturedEffect) -> CaptureOutcome {
        let kind = effect.kind();
        if self.kind.is_idle() {
            self.rejected += 1;
            warn!(effect = %kind, "capture outside of any phase; dropping effect");
            metrics::record_capture_rejected("idle");
            return CaptureOutcome::Rejected;
        }
        if self.is_complete() {
            self.rejected += 1;
            error!(
                phase = %self.kind,
                id = %self.id,
                effect = %kind,
                "capture after phase completion; dropping effect"
            );
            metrics::record_capture_rejected("completed");
            return CaptureOutcome::Rejected;
        }

        let sequence = self.captures.len() as u64;
        if let Some(limit) = self.extra.capture_limit {
            let interesting = self.kind.state().should_capture(kind);
            if interesting && self.event_capture_count() == limit {
                warn!(
                    phase = %self.kind,
                    limit,
                    "capture limit reached; further captures are audit-only"
                );
            }
        }

        trace!(phase = %self.kind, sequence, effect = %kind, "captured");
        metrics::record_capture(kind);
        self.captures.push(CaptureRecord {
            sequence,
            effect,
            cause: self.cause.clone(),
        });
        CaptureOutcome::Recorded(sequence)
    }

    fn event_capture_count(&self) -> usize {
        let state = self.kind.state();
        self.captures
            .iter()
            .filter(|record| state.should_capture(record.effect.kind()))
            .count()
    }

    /// Opens a cause frame and appends `object` to the chain.
    pub fn push_cause_frame(&mut self, object: CauseObject) -> FrameHandle {
        let handle = FrameHandle {
            id: self.next_frame,
        };
        self.next_frame += 1;
        self.frames.push(OpenFrame {
            handle,
            chain_mark: self.cause.len(),
            replaced: Vec::new(),
        });
        self.cause.push(object);
        handle
    }

    /// Sets a context entry. Inside a frame the entry is undone when the
    /// frame pops; outside of any frame it lasts for the whole phase.
    pub fn add_context(&mut self, key: EventContextKey, value: impl Into<ContextValue>) {
        let previous = self.cause.insert_context(key.clone(), value.into());
        if let Some(frame) = self.frames.last_mut() {
            frame.replaced.push((key, previous));
        }
    }

    /// Closes a cause frame.
    ///
    /// Frames must close in LIFO order. Closing a buried frame is a
    /// protocol violation: every frame above it is closed as well, then
    /// under [`ViolationPolicy::Panic`] it panics and under
    /// [`ViolationPolicy::Recover`] the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::CauseFrameOutOfOrder`] or
    /// [`PhaseError::UnknownCauseFrame`] after recovering.
    pub fn pop_cause_frame(&mut self, handle: FrameHandle) -> Result<(), PhaseError> {
        self.pop_cause_frame_with(handle, self.policy)
    }

    fn pop_cause_frame_with(
        &mut self,
        handle: FrameHandle,
        policy: ViolationPolicy,
    ) -> Result<(), PhaseError> {
        let Some(position) = self.frames.iter().rposition(|f| f.handle == handle) else {
            let err = PhaseError::UnknownCauseFrame(handle.id);
            report_violation(policy, &err);
            return Err(err);
        };

        if position + 1 == self.frames.len() {
            self.close_top_frame();
            return Ok(());
        }

        let top = self.frames.last().map_or(handle.id, |f| f.handle.id);
        let err = PhaseError::CauseFrameOutOfOrder {
            handle: handle.id,
            top,
        };
        while self.frames.len() > position {
            self.close_top_frame();
        }
        report_violation(policy, &err);
        Err(err)
    }

    fn close_top_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            for (key, previous) in frame.replaced.into_iter().rev() {
                self.cause.restore_context(&key, previous);
            }
            self.cause.truncate(frame.chain_mark);
        }
    }

    /// Opens a cause frame that closes when the guard drops, on every exit
    /// path including panics.
    pub fn cause_frame(&mut self, object: CauseObject) -> CauseFrame<'_> {
        let handle = self.push_cause_frame(object);
        CauseFrame {
            context: self,
            handle,
        }
    }

    /// Completes the context, draining its capture log.
    ///
    /// One-shot: a second call is rejected and leaves the context as is.
    /// Cause frames still open are a protocol violation and are closed.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::AlreadyComplete`] on a repeated call.
    pub fn complete(&mut self) -> Result<CompletedPhaseContext, PhaseError> {
        if self.is_complete() {
            let err = PhaseError::AlreadyComplete(self.kind);
            error!(phase = %self.kind, id = %self.id, "{err}");
            metrics::record_violation(err.label());
            return Err(err);
        }

        if !self.frames.is_empty() {
            let err = PhaseError::UnbalancedCauseFrames {
                phase: self.kind,
                open: self.frames.len(),
            };
            while !self.frames.is_empty() {
                self.close_top_frame();
            }
            log_violation(&err, None);
        }

        self.lifecycle = PhaseLifecycle::PoppedPendingBuild;
        Ok(CompletedPhaseContext {
            id: self.id,
            kind: self.kind,
            cause: self.cause.clone(),
            captures: std::mem::take(&mut self.captures),
            extra: std::mem::take(&mut self.extra),
            lifecycle: PhaseLifecycle::PoppedPendingBuild,
            rejected: self.rejected,
        })
    }
}

/// Scoped cause frame. Derefs to the context it was opened on.
#[derive(Debug)]
pub struct CauseFrame<'a> {
    context: &'a mut PhaseContext,
    handle: FrameHandle,
}

impl CauseFrame<'_> {
    /// Handle of the guarded frame.
    #[must_use]
    pub const fn handle(&self) -> FrameHandle {
        self.handle
    }
}

impl Deref for CauseFrame<'_> {
    type Target = PhaseContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl DerefMut for CauseFrame<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for CauseFrame<'_> {
    fn drop(&mut self) {
        // Never escalate to a second panic while already unwinding.
        let policy = if std::thread::panicking() {
            ViolationPolicy::Recover
        } else {
            self.context.policy
        };
        let _ = self.context.pop_cause_frame_with(self.handle, policy);
    }
}

/// Immutable view of a popped phase.
#[derive(Debug, Clone)]
pub struct CompletedPhaseContext {
    id: PhaseId,
    kind: PhaseKind,
    cause: Cause,
    captures: Vec<CaptureRecord>,
    extra: PhaseExtra,
    lifecycle: PhaseLifecycle,
    rejected: usize,
}

impl CompletedPhaseContext {
    /// Phase id.
    #[must_use]
    pub const fn id(&self) -> PhaseId {
        self.id
    }

    /// Phase kind.
    #[must_use]
    pub const fn kind(&self) -> PhaseKind {
        self.kind
    }

    /// Cause of the phase as it stood when it completed.
    #[must_use]
    pub const fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Every captured effect, in capture order.
    #[must_use]
    pub fn captures(&self) -> &[CaptureRecord] {
        &self.captures
    }

    /// Phase-specific configuration.
    #[must_use]
    pub const fn extra(&self) -> &PhaseExtra {
        &self.extra
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn lifecycle(&self) -> PhaseLifecycle {
        self.lifecycle
    }

    /// Number of captures the context rejected while active.
    #[must_use]
    pub const fn rejected_captures(&self) -> usize {
        self.rejected
    }

    /// Looks up a record by sequence number.
    #[must_use]
    pub fn record(&self, sequence: u64) -> Option<&CaptureRecord> {
        self.captures
            .binary_search_by_key(&sequence, |r| r.sequence)
            .ok()
            .map(|i| &self.captures[i])
    }

    /// Splits the captures into those used for event construction and
    /// those kept for audit only, both in capture order.
    #[must_use]
    pub fn partition_captures(&self) -> (Vec<&CaptureRecord>, Vec<&CaptureRecord>) {
        let state = self.kind.state();
        let limit = self.extra.capture_limit.unwrap_or(usize::MAX);
        let mut for_events = Vec::new();
        let mut audit = Vec::new();
        for record in &self.captures {
            if state.should_capture(record.effect.kind()) && for_events.len() < limit {
                for_events.push(record);
            } else {
                audit.push(record);
            }
        }
        (for_events, audit)
    }

    /// Captures used for event construction.
    #[must_use]
    pub fn event_captures(&self) -> Vec<&CaptureRecord> {
        self.partition_captures().0
    }

    /// Moves the lifecycle one step forward.
    pub(crate) fn advance(&mut self, to: PhaseLifecycle) -> Result<(), PhaseError> {
        if self.lifecycle.next() == Some(to) {
            self.lifecycle = to;
            Ok(())
        } else {
            Err(PhaseError::InvalidTransition(format!(
                "{} {}: {:?} -> {:?}",
                self.kind, self.id, self.lifecycle, to
            )))
        }
    }
}
