//! Phases: kinds, contexts, strategies, and the stack that nests them.

pub mod context;
pub mod kind;
pub mod stack;
pub mod state;

pub use context::{
    CaptureOutcome, CaptureRecord, CauseFrame, ClickButton, CompletedPhaseContext, PhaseContext,
    PhaseExtra, PhaseId, PhaseLifecycle,
};
pub use kind::{ListenerKind, PhaseKind};
pub use stack::{PhaseStack, PhaseToken};
pub use state::{ExecutionPhase, FailurePolicy};

use tracing::error;

use crate::config::ViolationPolicy;
use crate::error::PhaseError;
use crate::observability::metrics;

/// Logs and counts a protocol violation.
///
/// Stack-level violations only ever come through here: the stack has
/// already been brought back to a consistent state when this is called.
pub(crate) fn log_violation(err: &PhaseError, stack: Option<&str>) {
    metrics::record_violation(err.label());
    match stack {
        Some(dump) => error!(
            violation = err.label(),
            error = %err,
            "phase protocol violation\n{dump}"
        ),
        None => error!(violation = err.label(), error = %err, "phase protocol violation"),
    }
}

/// Logs a cause-frame violation, then panics under
/// [`ViolationPolicy::Panic`].
///
/// Callers restore the frame stack first, so a host that catches the
/// panic still sees consistent state.
///
/// # Panics
///
/// Panics when `policy` is [`ViolationPolicy::Panic`].
pub(crate) fn report_violation(policy: ViolationPolicy, err: &PhaseError) {
    log_violation(err, None);
    if policy == ViolationPolicy::Panic {
        panic!("phase protocol violation [{}]: {err}", err.label());
    }
}
