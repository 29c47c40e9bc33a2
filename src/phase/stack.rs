//! The per-world stack of active phases.

use std::fmt::Write as _;

use tracing::{debug, warn};

use crate::cause::Cause;
use crate::config::{TrackerConfig, ViolationPolicy};
use crate::effect::CapturedEffect;
use crate::error::PhaseError;
use crate::observability::metrics;

use super::context::{CaptureOutcome, CompletedPhaseContext, PhaseContext, PhaseExtra, PhaseId};
use super::kind::PhaseKind;
use super::log_violation;

/// Default nesting limit.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Proof of a push, required to pop the same phase again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "the token is needed to pop the phase"]
pub struct PhaseToken {
    id: PhaseId,
    kind: PhaseKind,
    depth: usize,
}

impl PhaseToken {
    /// Id of the pushed phase.
    #[must_use]
    pub const fn id(self) -> PhaseId {
        self.id
    }

    /// Kind of the pushed phase.
    #[must_use]
    pub const fn kind(self) -> PhaseKind {
        self.kind
    }

    /// Depth the phase was pushed at (1 for the first phase above idle).
    #[must_use]
    pub const fn depth(self) -> usize {
        self.depth
    }
}

/// LIFO stack of phase contexts with an idle sentinel at the bottom.
///
/// The sentinel is never popped, so [`PhaseStack::current`] always has
/// something to return.
#[derive(Debug)]
pub struct PhaseStack {
    contexts: Vec<PhaseContext>,
    max_depth: usize,
    policy: ViolationPolicy,
    dump_on_violation: bool,
    next_id: u64,
    abandoned: Vec<CompletedPhaseContext>,
}

impl Default for PhaseStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, ViolationPolicy::default())
    }
}

impl PhaseStack {
    /// Creates an idle stack.
    #[must_use]
    pub fn new(max_depth: usize, policy: ViolationPolicy) -> Self {
        let mut idle = PhaseContext::with_parts(
            PhaseId(0),
            PhaseKind::Idle,
            Cause::empty(),
            PhaseExtra::default(),
            policy,
        );
        idle.activate();
        Self {
            contexts: vec![idle],
            max_depth,
            policy,
            dump_on_violation: true,
            next_id: 1,
            abandoned: Vec::new(),
        }
    }

    /// Creates an idle stack configured from `config`.
    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        let mut stack = Self::new(config.max_phase_depth, config.violation_policy);
        stack.dump_on_violation = config.logging.stack_dump_on_violation;
        stack
    }

    /// Violation handling of this stack.
    #[must_use]
    pub const fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Pushes a phase with the kind's default extras.
    ///
    /// # Errors
    ///
    /// See [`PhaseStack::push_with`].
    pub fn push(&mut self, kind: PhaseKind, cause: Cause) -> Result<PhaseToken, PhaseError> {
        self.push_with(kind, cause, kind.state().default_extra())
    }

    /// Pushes a phase.
    ///
    /// # Errors
    ///
    /// Refuses the push, leaving the stack unchanged, when `kind` is
    /// idle, when the top context was already completed (a missed pop),
    /// or when the depth limit is reached.
    pub fn push_with(
        &mut self,
        kind: PhaseKind,
        cause: Cause,
        extra: PhaseExtra,
    ) -> Result<PhaseToken, PhaseError> {
        if kind.is_idle() {
            let err = PhaseError::IdlePush;
            log_violation(&err, None);
            return Err(err);
        }

        let top = self.current();
        if top.is_complete() && !top.kind().is_idle() {
            let err = PhaseError::MissedPop {
                attempted: kind,
                top: top.kind(),
            };
            let dump = self.violation_dump();
            log_violation(&err, dump.as_deref());
            return Err(err);
        }

        let depth = self.depth();
        if depth >= self.max_depth {
            let err = PhaseError::DepthExceeded {
                depth,
                limit: self.max_depth,
                attempted: kind,
            };
            warn!(
                phase = %kind,
                depth,
                limit = self.max_depth,
                "phase nesting limit reached, refusing push\n{}",
                self.dump()
            );
            metrics::record_violation(err.label());
            return Err(err);
        }

        let id = PhaseId(self.next_id);
        self.next_id += 1;
        let mut context = PhaseContext::with_parts(id, kind, cause, extra, self.policy);
        context.activate();
        self.contexts.push(context);

        let depth = self.depth();
        debug!(phase = %kind, %id, depth, "phase pushed");
        metrics::record_phase_entered(kind);
        metrics::set_phase_depth(depth);
        Ok(PhaseToken { id, kind, depth })
    }

    /// Pops the phase `token` refers to, which must be the top.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::UnknownPhase`] (stack unchanged) when the
    /// token is not on the stack. Returns [`PhaseError::UnbalancedPop`]
    /// when it is buried: every phase from the top down to and including
    /// the token's is then completed and set aside as abandoned, see
    /// [`PhaseStack::take_abandoned`].
    pub fn pop(&mut self, token: PhaseToken) -> Result<CompletedPhaseContext, PhaseError> {
        let Some(position) = self.position_of(token.id) else {
            let err = PhaseError::UnknownPhase(format!("{} {}", token.kind, token.id));
            log_violation(&err, None);
            return Err(err);
        };

        if position + 1 != self.contexts.len() {
            let top = self.current();
            let err = PhaseError::UnbalancedPop {
                expected: format!("{} {}", top.kind(), top.id()),
                found: format!("{} {}", token.kind, token.id),
            };
            let dump = self.violation_dump();
            self.unwind_to(position);
            log_violation(&err, dump.as_deref());
            return Err(err);
        }

        let mut context = self
            .contexts
            .pop()
            .ok_or_else(|| PhaseError::UnknownPhase(token.id.to_string()))?;
        let depth = self.depth();
        debug!(phase = %context.kind(), id = %context.id(), depth, "phase popped");
        metrics::set_phase_depth(depth);
        context.complete()
    }

    /// Force-completes every context at or above `position`.
    fn unwind_to(&mut self, position: usize) {
        while self.contexts.len() > position.max(1) {
            let Some(mut context) = self.contexts.pop() else {
                break;
            };
            warn!(
                phase = %context.kind(),
                id = %context.id(),
                captures = context.captures().len(),
                "force-unwinding abandoned phase"
            );
            if let Ok(completed) = context.complete() {
                self.abandoned.push(completed);
            }
        }
        metrics::set_phase_depth(self.depth());
    }

    /// Completes and abandons every phase above the one `token` refers
    /// to, without reporting a violation. Used when a failing unit of work
    /// left nested phases behind. Returns how many were abandoned.
    pub(crate) fn unwind_above(&mut self, token: PhaseToken) -> usize {
        let Some(position) = self.position_of(token.id) else {
            return 0;
        };
        let before = self.abandoned.len();
        self.unwind_to(position + 1);
        self.abandoned.len() - before
    }

    fn position_of(&self, id: PhaseId) -> Option<usize> {
        self.contexts
            .iter()
            .skip(1)
            .rposition(|c| c.id() == id)
            .map(|i| i + 1)
    }

    /// Whether the phase `token` refers to is still on the stack.
    #[must_use]
    pub fn contains(&self, token: PhaseToken) -> bool {
        self.position_of(token.id).is_some()
    }

    /// The top context, or the idle sentinel.
    #[must_use]
    pub fn current(&self) -> &PhaseContext {
        // The sentinel is never removed.
        &self.contexts[self.contexts.len() - 1]
    }

    /// Mutable access to the top context.
    pub fn current_mut(&mut self) -> &mut PhaseContext {
        let top = self.contexts.len() - 1;
        &mut self.contexts[top]
    }

    /// Routes a capture to the top context.
    pub fn capture(&mut self, effect: CapturedEffect) -> CaptureOutcome {
        self.current_mut().capture(effect)
    }

    /// Number of phases above the idle sentinel.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.contexts.len() - 1
    }

    /// Whether no phase is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.depth() == 0
    }

    /// Phases completed by forced unwinding since the last call, top-most
    /// first.
    pub fn take_abandoned(&mut self) -> Vec<CompletedPhaseContext> {
        std::mem::take(&mut self.abandoned)
    }

    /// Human-readable listing of the stack, top first.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::from("phase stack (top first):");
        for (depth, context) in self.contexts.iter().enumerate().rev() {
            let _ = write!(
                out,
                "\n  [{depth}] {} {} cause={} captures={} frames={}",
                context.kind(),
                context.id(),
                context.cause(),
                context.captures().len(),
                context.frame_depth(),
            );
        }
        out
    }

    fn violation_dump(&self) -> Option<String> {
        self.dump_on_violation.then(|| self.dump())
    }
}
