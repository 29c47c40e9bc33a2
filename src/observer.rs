//! Observers: plugin code that may allow, cancel, or amend events.
//!
//! Observers run in registration order. A failing or panicking observer
//! counts as "no objection" and never stops the others.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::event::{Event, EventKind, Snapshot};
use crate::observability::metrics;
use crate::phase::PhaseKind;

/// An observer's verdict on one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No objection
    Allow,
    /// None of the event's effects apply
    Cancel,
    /// Effects apply with the given changes
    Amend(Vec<Amendment>),
}

/// A change to one transaction of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Amendment {
    /// Replace the final state of a transaction
    Replace {
        /// Transaction index within the event
        transaction: usize,
        /// New final state
        value: Snapshot,
    },
    /// Drop a single transaction
    Invalidate {
        /// Transaction index within the event
        transaction: usize,
    },
}

impl Amendment {
    /// Index of the transaction this amendment targets.
    #[must_use]
    pub const fn transaction(&self) -> usize {
        match self {
            Self::Replace { transaction, .. } | Self::Invalidate { transaction } => *transaction,
        }
    }
}

/// Which events an observer sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event
    All,
    /// Events of the listed kinds
    Kinds(Vec<EventKind>),
    /// Events built by phases of one kind
    Phase(PhaseKind),
}

impl EventFilter {
    /// Filter for a single event kind.
    #[must_use]
    pub fn kind(kind: EventKind) -> Self {
        Self::Kinds(vec![kind])
    }

    /// Whether `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(&event.kind()),
            Self::Phase(phase) => *phase == event.phase(),
        }
    }
}

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Observer callback.
pub type ObserverFn = Box<dyn FnMut(&Event) -> Result<Decision, ObserverError>>;

struct Registration {
    id: ObserverId,
    name: String,
    filter: EventFilter,
    callback: ObserverFn,
}

/// Ordered set of observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Registration>,
    next_id: u64,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|r| (&r.id, &r.name, &r.filter)))
            .finish()
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Observers that saw the event
    pub notified: usize,
    /// Observers that failed, panicked, or sent invalid amendments
    pub failures: usize,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer after all existing ones.
    pub fn register<F>(&mut self, name: impl Into<String>, filter: EventFilter, callback: F) -> ObserverId
    where
        F: FnMut(&Event) -> Result<Decision, ObserverError> + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        debug!(observer = %name, %id, "observer registered");
        self.observers.push(Registration {
            id,
            name,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    /// Removes an observer. Returns whether it was registered.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|r| r.id != id);
        before != self.observers.len()
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Runs every matching observer on `event`, in registration order.
    ///
    /// Each observer sees the event as left by the previous one. A
    /// cancelled event stays cancelled. Amendments from one decision apply
    /// all together or not at all.
    pub fn dispatch(&mut self, event: &mut Event) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for observer in &mut self.observers {
            if !observer.filter.matches(event) {
                continue;
            }
            outcome.notified += 1;

            let snapshot: &Event = event;
            let result = catch_unwind(AssertUnwindSafe(|| (observer.callback)(snapshot)))
                .unwrap_or_else(|payload| Err(ObserverError::Panicked(panic_message(&*payload))));

            let failure = match result {
                Ok(Decision::Allow) => None,
                Ok(Decision::Cancel) => {
                    debug!(observer = %observer.name, event = %event.id(), "event cancelled");
                    event.cancel();
                    None
                }
                Ok(Decision::Amend(amendments)) => amend(event, &amendments).err(),
                Err(e) => Some(e),
            };

            if let Some(e) = failure {
                outcome.failures += 1;
                metrics::record_observer_failure();
                warn!(
                    observer = %observer.name,
                    event = %event.id(),
                    kind = %event.kind(),
                    error = %e,
                    "observer failed, treating as no objection"
                );
            }
        }
        outcome
    }
}

fn amend(event: &mut Event, amendments: &[Amendment]) -> Result<(), ObserverError> {
    let mut amended = event.clone();
    for amendment in amendments {
        amended.apply_amendment(amendment)?;
    }
    *event = amended;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cause::{Cause, CauseObject};
    use crate::effect::{BlockPos, BlockState, CapturedEffect};
    use crate::event::Transaction;
    use crate::phase::CaptureRecord;

    fn event(kind: EventKind) -> Event {
        let record = CaptureRecord {
            sequence: 0,
            effect: CapturedEffect::block_change(
                BlockPos::new(0, 64, 0),
                BlockState::air(),
                BlockState::new("minecraft:stone"),
            ),
            cause: Cause::of(CauseObject::Plugin("test".into())),
        };
        Event::new(
            kind,
            PhaseKind::BlockWorker,
            record.cause.clone(),
            vec![Transaction::from_record(&record)],
        )
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        for name in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            registry.register(name, EventFilter::All, move |_| {
                seen.borrow_mut().push(name);
                Ok(Decision::Allow)
            });
        }
        let mut ev = event(EventKind::ChangeBlockPlace);
        let outcome = registry.dispatch(&mut ev);
        assert_eq!(outcome.notified, 3);
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_later_observer_sees_earlier_amendment() {
        let mut registry = ObserverRegistry::new();
        registry.register("amender", EventFilter::All, |_| {
            Ok(Decision::Amend(vec![Amendment::Replace {
                transaction: 0,
                value: Snapshot::Block(BlockState::new("minecraft:glass")),
            }]))
        });
        let saw_glass = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&saw_glass);
        registry.register("reader", EventFilter::All, move |ev| {
            *flag.borrow_mut() = ev.transactions()[0].custom.is_some();
            Ok(Decision::Allow)
        });
        let mut ev = event(EventKind::ChangeBlockPlace);
        registry.dispatch(&mut ev);
        assert!(*saw_glass.borrow());
    }

    #[test]
    fn test_failing_and_panicking_observers_are_isolated() {
        let mut registry = ObserverRegistry::new();
        registry.register("broken", EventFilter::All, |_| {
            Err(ObserverError::Failed("boom".into()))
        });
        registry.register("panicky", EventFilter::All, |_| panic!("observer bug"));
        registry.register("canceller", EventFilter::All, |_| Ok(Decision::Cancel));
        let mut ev = event(EventKind::ChangeBlockPlace);
        let outcome = registry.dispatch(&mut ev);
        assert_eq!(outcome.failures, 2);
        assert!(ev.is_cancelled());
    }

    #[test]
    fn test_invalid_amendment_set_is_dropped_whole() {
        let mut registry = ObserverRegistry::new();
        registry.register("bad", EventFilter::All, |_| {
            Ok(Decision::Amend(vec![
                Amendment::Invalidate { transaction: 0 },
                Amendment::Invalidate { transaction: 9 },
            ]))
        });
        let mut ev = event(EventKind::ChangeBlockPlace);
        let outcome = registry.dispatch(&mut ev);
        assert_eq!(outcome.failures, 1);
        assert!(ev.transactions()[0].valid);
    }

    #[test]
    fn test_filters_and_unregister() {
        let mut registry = ObserverRegistry::new();
        let id = registry.register("drops", EventFilter::kind(EventKind::DropItem), |_| {
            Ok(Decision::Cancel)
        });
        let mut ev = event(EventKind::ChangeBlockPlace);
        assert_eq!(registry.dispatch(&mut ev).notified, 0);
        assert!(!ev.is_cancelled());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_phase_filter() {
        let filter = EventFilter::Phase(PhaseKind::InventoryClick);
        assert!(!filter.matches(&event(EventKind::ChangeBlockPlace)));
        assert!(EventFilter::Phase(PhaseKind::BlockWorker).matches(&event(EventKind::ChangeBlockPlace)));
    }
}
