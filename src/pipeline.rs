//! The phase tracker: one per world.
//!
//! [`PhaseTracker`] owns the [`PhaseStack`] and the observers. Popping a
//! phase runs the whole pipeline before control returns to the caller:
//!
//! 1. the phase's strategy builds events from its captures
//! 2. each event goes through the observers
//! 3. accepted effects are applied to the world in capture order
//! 4. the strategy's unwind hook runs
//!
//! Nothing in this pipeline propagates a panic or an apply failure to the
//! caller. Protocol violations are returned as [`PhaseError`] after the
//! stack has recovered.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cause::Cause;
use crate::config::TrackerConfig;
use crate::effect::{CapturedEffect, EffectKind};
use crate::error::{ApplyError, PhaseError};
use crate::event::{Event, EventId};
use crate::observability::metrics;
use crate::observability::{EventEmitter, TraceEntry};
use crate::observer::ObserverRegistry;
use crate::phase::{
    CaptureOutcome, CompletedPhaseContext, PhaseContext, PhaseExtra, PhaseId, PhaseKind,
    PhaseLifecycle, PhaseStack, PhaseToken,
};
use crate::world::{WorldModel, apply_effect};

/// What happened to one popped phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Phase kind
    pub kind: PhaseKind,
    /// Phase id
    pub id: PhaseId,
    /// Whether the phase ended exceptionally
    pub exceptional: bool,
    /// Events fired, as left by the observers
    pub events: Vec<Event>,
    /// Effects applied to the world
    pub applied: usize,
    /// Effects the world rejected
    pub failed: usize,
    /// Captures dropped by cancellation or invalidation
    pub cancelled: usize,
    /// Captures dropped because the phase failed
    pub discarded: usize,
    /// Captures applied without going through any event
    pub audit_only: usize,
    /// Observer failures while dispatching
    pub observer_failures: usize,
}

impl PhaseReport {
    const fn new(kind: PhaseKind, id: PhaseId, exceptional: bool) -> Self {
        Self {
            kind,
            id,
            exceptional,
            events: Vec::new(),
            applied: 0,
            failed: 0,
            cancelled: 0,
            discarded: 0,
            audit_only: 0,
            observer_failures: 0,
        }
    }
}

/// Result of [`PhaseTracker::run_phase`].
#[derive(Debug)]
pub struct PhaseRun<T, E> {
    /// What the unit of work returned
    pub output: Result<T, E>,
    /// What happened to its phase
    pub report: PhaseReport,
}

/// Phase stack, observers, and pipeline of one world.
#[derive(Debug)]
pub struct PhaseTracker {
    stack: PhaseStack,
    observers: ObserverRegistry,
    config: TrackerConfig,
    next_event_id: u64,
    trace: Option<EventEmitter>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl PhaseTracker {
    /// Creates an idle tracker.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            stack: PhaseStack::from_config(&config),
            observers: ObserverRegistry::new(),
            config,
            next_event_id: 1,
            trace: None,
        }
    }

    /// Writes a trace entry for every phase, event, and violation.
    #[must_use]
    pub fn with_trace(mut self, emitter: EventEmitter) -> Self {
        self.trace = Some(emitter);
        self
    }

    /// The phase stack.
    #[must_use]
    pub const fn stack(&self) -> &PhaseStack {
        &self.stack
    }

    /// Tracker configuration.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Registered observers.
    #[must_use]
    pub const fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Registered observers, for registration.
    pub const fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }

    /// The top context, or the idle sentinel.
    #[must_use]
    pub fn current(&self) -> &PhaseContext {
        self.stack.current()
    }

    /// The top context, for cause frames and extras.
    pub fn context_mut(&mut self) -> &mut PhaseContext {
        self.stack.current_mut()
    }

    /// Pushes a phase with its kind's default extras.
    ///
    /// # Errors
    ///
    /// See [`PhaseStack::push_with`].
    pub fn enter(&mut self, kind: PhaseKind, cause: Cause) -> Result<PhaseToken, PhaseError> {
        self.enter_with(kind, cause, kind.state().default_extra())
    }

    /// Pushes a phase. Configured overrides fill whatever `extra` leaves
    /// unset.
    ///
    /// # Errors
    ///
    /// See [`PhaseStack::push_with`].
    pub fn enter_with(
        &mut self,
        kind: PhaseKind,
        cause: Cause,
        mut extra: PhaseExtra,
    ) -> Result<PhaseToken, PhaseError> {
        if let Some(overrides) = self.config.phases.get(&kind) {
            if extra.capture_limit.is_none() {
                extra.capture_limit = overrides.capture_limit;
            }
            if extra.partial_apply_on_failure.is_empty() {
                extra
                    .partial_apply_on_failure
                    .clone_from(&overrides.partial_apply_on_failure);
            }
        }

        let rendered = self.trace.is_some().then(|| cause.to_string());
        match self.stack.push_with(kind, cause, extra) {
            Ok(token) => {
                if let (Some(trace), Some(cause)) = (&self.trace, rendered) {
                    trace.emit(TraceEntry::PhaseEntered {
                        timestamp: Utc::now(),
                        phase: kind.name(),
                        id: token.id().0,
                        depth: token.depth(),
                        cause,
                    });
                }
                Ok(token)
            }
            Err(e) => {
                self.trace_violation(&e);
                Err(e)
            }
        }
    }

    /// Captures an effect into the top phase.
    pub fn capture(&mut self, effect: CapturedEffect) -> CaptureOutcome {
        self.stack.capture(effect)
    }

    /// Pops a phase whose unit of work completed normally.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation when `token` is not the top phase.
    /// The stack has recovered by then: phases the violation abandoned
    /// were processed as failed.
    pub fn exit(
        &mut self,
        token: PhaseToken,
        world: &mut dyn WorldModel,
    ) -> Result<PhaseReport, PhaseError> {
        self.exit_inner(token, world, false)
    }

    /// Pops a phase whose unit of work failed. Its captures are discarded
    /// unless the phase opted effect kinds into partial apply.
    ///
    /// # Errors
    ///
    /// See [`PhaseTracker::exit`].
    pub fn exit_exceptionally(
        &mut self,
        token: PhaseToken,
        world: &mut dyn WorldModel,
    ) -> Result<PhaseReport, PhaseError> {
        self.exit_inner(token, world, true)
    }

    /// Runs `work` inside a phase.
    ///
    /// The phase pops normally when `work` returns `Ok` and exceptionally
    /// when it returns `Err` or panics. A panic is re-raised once the
    /// phase has unwound. Phases `work` pushed and never popped are
    /// abandoned first.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation when the phase cannot be pushed or
    /// popped.
    pub fn run_phase<T, E, F>(
        &mut self,
        kind: PhaseKind,
        cause: Cause,
        world: &mut dyn WorldModel,
        work: F,
    ) -> Result<PhaseRun<T, E>, PhaseError>
    where
        F: FnOnce(&mut Self, &mut dyn WorldModel) -> Result<T, E>,
    {
        let token = self.enter(kind, cause)?;
        let outcome = catch_unwind(AssertUnwindSafe(|| work(&mut *self, &mut *world)));
        self.abandon_above(token, world);
        match outcome {
            Ok(Ok(value)) => {
                let report = self.exit(token, world)?;
                Ok(PhaseRun {
                    output: Ok(value),
                    report,
                })
            }
            Ok(Err(e)) => {
                let report = self.exit_exceptionally(token, world)?;
                Ok(PhaseRun {
                    output: Err(e),
                    report,
                })
            }
            Err(payload) => {
                error!(phase = %kind, id = %token.id(), "unit of work panicked, unwinding phase");
                let _ = self.exit_exceptionally(token, world);
                resume_unwind(payload)
            }
        }
    }

    fn abandon_above(&mut self, token: PhaseToken, world: &mut dyn WorldModel) {
        if self.stack.unwind_above(token) > 0 {
            warn!(phase = %token.kind(), id = %token.id(), "nested phases left open");
            self.drain_abandoned(world);
        }
    }

    fn exit_inner(
        &mut self,
        token: PhaseToken,
        world: &mut dyn WorldModel,
        exceptional: bool,
    ) -> Result<PhaseReport, PhaseError> {
        let popped = self.stack.pop(token);
        self.drain_abandoned(world);
        match popped {
            Ok(context) => Ok(self.process(context, exceptional, world)),
            Err(e) => {
                self.trace_violation(&e);
                Err(e)
            }
        }
    }

    fn drain_abandoned(&mut self, world: &mut dyn WorldModel) {
        for context in self.stack.take_abandoned() {
            let report = self.process(context, true, world);
            warn!(
                phase = %report.kind,
                id = %report.id,
                discarded = report.discarded,
                "abandoned phase processed as failed"
            );
        }
    }

    fn next_event_id(&mut self) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        id
    }

    /// Build, dispatch, apply, unwind.
    fn process(
        &mut self,
        mut context: CompletedPhaseContext,
        exceptional: bool,
        world: &mut dyn WorldModel,
    ) -> PhaseReport {
        let started = Instant::now();
        let kind = context.kind();
        let state = kind.state();

        let (mut events, exceptional) =
            match catch_unwind(AssertUnwindSafe(|| state.build_events(&context))) {
                Ok(events) => (events, exceptional),
                Err(_) => {
                    error!(phase = %kind, id = %context.id(), "event construction panicked, discarding captures");
                    (Vec::new(), true)
                }
            };
        if let Err(e) = context.advance(PhaseLifecycle::Built) {
            error!(phase = %kind, error = %e, "lifecycle out of order");
        }

        let mut report = PhaseReport::new(kind, context.id(), exceptional);
        let failure_policy = exceptional.then(|| state.failure_policy(&context));
        let mut accepted: Vec<(u64, CapturedEffect)> = Vec::new();

        for event in &mut events {
            if let Some(policy) = &failure_policy {
                report.discarded += event.retain_transactions(|t| policy.allows(t.effect_kind));
                if event.transactions().is_empty() {
                    continue;
                }
            }
            let id = self.next_event_id();
            event.set_id(id);

            let outcome = self.observers.dispatch(event);
            report.observer_failures += outcome.failures;
            self.trace_event(event);

            if event.is_cancelled() {
                metrics::record_event(event.kind(), "cancelled");
                report.cancelled += event
                    .transactions()
                    .iter()
                    .map(crate::event::Transaction::capture_count)
                    .sum::<usize>();
                debug!(event = %id, kind = %event.kind(), "event cancelled, effects dropped");
                continue;
            }
            metrics::record_event(event.kind(), "allowed");

            for transaction in event.transactions() {
                if !transaction.valid {
                    report.cancelled += transaction.capture_count();
                    continue;
                }
                let resolved = context
                    .record(transaction.sequence)
                    .and_then(|record| transaction.resolve(&record.effect));
                match resolved {
                    Some(effect) => accepted.push((transaction.sequence, effect)),
                    None => {
                        report.failed += 1;
                        let e = ApplyError::SnapshotMismatch(format!(
                            "transaction {} of {id}",
                            transaction.sequence
                        ));
                        warn!(event = %id, error = %e, "dropping unresolvable transaction");
                    }
                }
            }
        }

        let (_, audit) = context.partition_captures();
        for record in audit {
            let kind = record.effect.kind();
            if failure_policy.as_ref().is_some_and(|p| !p.allows(kind)) {
                report.discarded += 1;
            } else {
                report.audit_only += 1;
                accepted.push((record.sequence, record.effect.clone()));
            }
        }

        accepted.sort_by_key(|(sequence, _)| *sequence);
        let owner = context.extra().player;
        for (sequence, effect) in &accepted {
            match apply_effect(world, effect, owner) {
                Ok(()) => {
                    report.applied += 1;
                    self.log_applied(kind, *sequence, effect);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_apply_failure(effect.kind());
                    warn!(
                        phase = %kind,
                        sequence,
                        effect = %effect.kind(),
                        error = %e,
                        "world rejected effect, skipping"
                    );
                }
            }
        }
        metrics::record_effects_applied(report.applied as u64);
        metrics::record_effects_discarded((report.discarded + report.cancelled) as u64);

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            state.unwind(&context, exceptional, &mut *world);
        }));
        if unwound.is_err() {
            error!(phase = %kind, id = %context.id(), "unwind hook panicked");
        }
        if let Err(e) = context.advance(PhaseLifecycle::Unwound) {
            error!(phase = %kind, error = %e, "lifecycle out of order");
        }

        report.events = events
            .into_iter()
            .filter(|e| !e.transactions().is_empty())
            .collect();
        metrics::record_exit_duration(kind, started.elapsed());
        debug!(
            phase = %kind,
            id = %report.id,
            exceptional,
            events = report.events.len(),
            applied = report.applied,
            failed = report.failed,
            cancelled = report.cancelled,
            discarded = report.discarded,
            "phase processed"
        );
        if let Some(trace) = &self.trace {
            trace.emit(TraceEntry::PhaseExited {
                timestamp: Utc::now(),
                phase: kind.name(),
                id: report.id.0,
                exceptional,
                events: report.events.len(),
                applied: report.applied,
                failed: report.failed,
                cancelled: report.cancelled,
                discarded: report.discarded,
            });
        }
        report
    }

    fn log_applied(&self, phase: PhaseKind, sequence: u64, effect: &CapturedEffect) {
        let logging = &self.config.logging;
        let enabled = match effect.kind() {
            EffectKind::BlockChange => logging.block_changes,
            EffectKind::EntitySpawn | EffectKind::ItemDrop => logging.entity_spawns,
            EffectKind::EntityDespawn => logging.entity_despawns,
            EffectKind::SlotChange | EffectKind::DataAttach => false,
        };
        if enabled {
            info!(%phase, sequence, effect = ?effect, "applied");
        }
    }

    fn trace_event(&self, event: &Event) {
        if let Some(trace) = &self.trace {
            trace.emit(TraceEntry::EventFired {
                timestamp: Utc::now(),
                event_id: event.id(),
                kind: event.kind(),
                phase: event.phase().name(),
                cause: event.cause().to_string(),
                transactions: event.transactions().len(),
                cancelled: event.is_cancelled(),
            });
        }
    }

    fn trace_violation(&self, err: &PhaseError) {
        if let Some(trace) = &self.trace {
            trace.emit(TraceEntry::ProtocolViolation {
                timestamp: Utc::now(),
                violation: err.label(),
                message: err.to_string(),
            });
        }
    }
}
