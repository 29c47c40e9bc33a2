//! Scripted scenarios.
//!
//! A scenario is a YAML script of phase operations (push, capture, cause
//! frames, pop) replayed against an [`InMemoryWorld`], with declarative
//! observer rules standing in for plugin listeners. The CLI `replay`
//! command runs them; the integration tests use them as fixtures.

pub mod builtin;

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cause::{Cause, CauseObject, ContextValue, EventContextKey, FrameHandle};
use crate::effect::{BlockPos, BlockState, CapturedEffect, EffectKind, EntityId, ItemStack};
use crate::error::{PhaseError, ScenarioError};
use crate::event::EventKind;
use crate::observer::{Amendment, Decision, EventFilter, ObserverRegistry};
use crate::phase::{ClickButton, PhaseId, PhaseKind, PhaseToken};
use crate::pipeline::{PhaseReport, PhaseTracker};
use crate::world::{InMemoryWorld, WorldModel};

pub use builtin::{BuiltinScenario, find_scenario, list_scenarios};

// ============================================================================
// Script
// ============================================================================

/// A parsed scenario script.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioScript {
    /// Scenario name, used in the summary
    pub name: String,

    /// What the scenario demonstrates
    #[serde(default)]
    pub description: Option<String>,

    /// Initial world
    #[serde(default)]
    pub world: WorldSetup,

    /// Observer rules, registered in order
    #[serde(default)]
    pub observers: Vec<ObserverRule>,

    /// Steps, replayed in order
    pub steps: Vec<Step>,
}

/// Initial state of the replay world.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldSetup {
    /// Lowest valid block height
    pub min_y: i32,
    /// One past the highest valid block height
    pub max_y: i32,
    /// Blocks present before the first step
    pub blocks: Vec<BlockSetup>,
    /// Player cursors present before the first step
    pub cursors: Vec<CursorSetup>,
}

impl Default for WorldSetup {
    fn default() -> Self {
        Self {
            min_y: 0,
            max_y: 256,
            blocks: Vec::new(),
            cursors: Vec::new(),
        }
    }
}

/// A block placed before replay starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockSetup {
    /// Where
    pub position: BlockPos,
    /// Block state
    pub state: BlockState,
}

/// A player cursor set before replay starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CursorSetup {
    /// Player
    pub player: EntityId,
    /// Stack on the cursor
    pub stack: ItemStack,
}

/// A declarative observer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserverRule {
    /// Observer name, used in logs
    pub name: String,

    /// Event kinds the rule applies to; every event when empty
    #[serde(default)]
    pub events: Vec<EventKind>,

    /// Verdict for matching events
    pub action: RuleAction,

    /// Transaction targeted by `invalidate`
    #[serde(default)]
    pub transaction: usize,
}

/// What an [`ObserverRule`] does with a matching event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Let the event through
    Allow,
    /// Cancel the whole event
    Cancel,
    /// Invalidate one transaction
    Invalidate,
}

/// One scripted operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Enter a phase.
    Push {
        /// Name later steps use for this phase
        label: String,
        /// Phase kind
        kind: PhaseKind,
        /// Cause chain, root first
        #[serde(default)]
        cause: Vec<CauseObject>,
        /// Acting player
        #[serde(default)]
        player: Option<EntityId>,
        /// Click button, for click phases
        #[serde(default)]
        button: Option<ClickButton>,
        /// Cursor before the click, for click phases
        #[serde(default)]
        cursor: Option<ItemStack>,
        /// Captures used for events
        #[serde(default)]
        capture_limit: Option<usize>,
        /// Effect kinds applied even if the phase fails
        #[serde(default)]
        partial_apply_on_failure: Vec<EffectKind>,
    },
    /// Capture an effect into the current phase.
    Capture {
        /// The effect
        effect: CapturedEffect,
    },
    /// Open a cause frame on the current phase.
    PushFrame {
        /// Name the matching `pop_frame` uses
        label: String,
        /// Object appended to the cause chain
        object: CauseObject,
    },
    /// Set a cause context entry on the current phase.
    Context {
        /// Context key, e.g. `owner` or `custom:reason`
        key: String,
        /// Value
        value: ContextValue,
    },
    /// Close a cause frame.
    PopFrame {
        /// Label given at `push_frame`
        label: String,
    },
    /// Pop a phase whose work completed normally.
    Pop {
        /// Label given at `push`
        label: String,
    },
    /// Pop a phase whose work failed.
    Fail {
        /// Label given at `push`
        label: String,
    },
}

impl ScenarioScript {
    /// Parses a script from YAML text. `source` is used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Parse`] when the text is not a valid script.
    pub fn from_yaml(raw: &str, source: &Path) -> Result<Self, ScenarioError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        serde_yaml::from_str(raw).map_err(|e| ScenarioError::Parse {
            path: source.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads and parses a script file.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Parse`] when the file cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ScenarioError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&raw, path)
    }

    /// Builds the initial world.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Setup`] when a block lies outside the
    /// world's height range.
    pub fn build_world(&self) -> Result<InMemoryWorld, ScenarioError> {
        let setup = &self.world;
        if setup.min_y >= setup.max_y {
            return Err(ScenarioError::Setup(format!(
                "min_y {} must be below max_y {}",
                setup.min_y, setup.max_y
            )));
        }

        let mut world = InMemoryWorld::new(setup.min_y, setup.max_y);
        for block in &setup.blocks {
            world
                .apply_block_change(block.position, &BlockState::air(), &block.state)
                .map_err(|e| ScenarioError::Setup(e.to_string()))?;
        }
        for cursor in &setup.cursors {
            world.set_cursor(cursor.player, Some(cursor.stack.clone()));
        }
        Ok(world)
    }

    /// Registers the script's observer rules.
    pub fn register_observers(&self, registry: &mut ObserverRegistry) {
        for rule in &self.observers {
            let filter = if rule.events.is_empty() {
                EventFilter::All
            } else {
                EventFilter::Kinds(rule.events.clone())
            };
            let action = rule.action;
            let transaction = rule.transaction;
            registry.register(rule.name.clone(), filter, move |_event| {
                Ok(match action {
                    RuleAction::Allow => Decision::Allow,
                    RuleAction::Cancel => Decision::Cancel,
                    RuleAction::Invalidate => {
                        Decision::Amend(vec![Amendment::Invalidate { transaction }])
                    }
                })
            });
        }
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Outcome of replaying a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    /// Scenario name
    pub scenario: String,
    /// Steps executed
    pub steps: usize,
    /// Reports of popped phases, in pop order
    pub phases: Vec<PhaseReport>,
    /// Protocol violations hit along the way
    pub violations: Vec<String>,
    /// Captures the tracker refused
    pub rejected_captures: usize,
    /// Phases still open at the end and unwound as failed
    pub left_open: usize,
}

impl ReplaySummary {
    /// Events fired across every phase.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.phases.iter().map(|p| p.events.len()).sum()
    }

    /// Effects applied across every phase.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.phases.iter().map(|p| p.applied).sum()
    }
}

struct OpenFrame {
    phase: PhaseId,
    handle: FrameHandle,
}

/// Replays `script` through `tracker` against `world`.
///
/// Protocol violations are recorded in the summary, not returned; how
/// the tracker itself reacts to them follows its configured policy.
/// Phases left open when the script ends are popped as failed.
///
/// # Errors
///
/// Returns a [`ScenarioError`] when a step names a label that is unknown
/// or already taken, or a context key that does not parse.
pub fn replay(
    script: &ScenarioScript,
    tracker: &mut PhaseTracker,
    world: &mut dyn WorldModel,
) -> Result<ReplaySummary, ScenarioError> {
    let mut phases: IndexMap<String, PhaseToken> = IndexMap::new();
    let mut frames: IndexMap<String, OpenFrame> = IndexMap::new();
    let mut summary = ReplaySummary {
        scenario: script.name.clone(),
        steps: 0,
        phases: Vec::new(),
        violations: Vec::new(),
        rejected_captures: 0,
        left_open: 0,
    };

    info!(scenario = %script.name, steps = script.steps.len(), "replaying scenario");

    for (index, step) in script.steps.iter().enumerate() {
        debug!(step = index, ?step, "scenario step");
        match step {
            Step::Push {
                label,
                kind,
                cause,
                player,
                button,
                cursor,
                capture_limit,
                partial_apply_on_failure,
            } => {
                if phases.contains_key(label) {
                    return Err(ScenarioError::DuplicateLabel {
                        step: index,
                        label: label.clone(),
                    });
                }
                let mut extra = kind.state().default_extra();
                extra.player = player.or(extra.player);
                extra.used_button = button.or(extra.used_button);
                if cursor.is_some() {
                    extra.cursor_before.clone_from(cursor);
                }
                extra.capture_limit = capture_limit.or(extra.capture_limit);
                extra
                    .partial_apply_on_failure
                    .extend(partial_apply_on_failure.iter().copied());

                let cause: Cause = cause.iter().cloned().collect();
                match tracker.enter_with(*kind, cause, extra) {
                    Ok(token) => {
                        phases.insert(label.clone(), token);
                    }
                    Err(e) => record_violation(&mut summary, index, &e),
                }
            }
            Step::Capture { effect } => {
                if !tracker.capture(effect.clone()).is_recorded() {
                    summary.rejected_captures += 1;
                }
            }
            Step::PushFrame { label, object } => {
                if frames.contains_key(label) {
                    return Err(ScenarioError::DuplicateLabel {
                        step: index,
                        label: label.clone(),
                    });
                }
                let context = tracker.context_mut();
                let phase = context.id();
                let handle = context.push_cause_frame(object.clone());
                frames.insert(label.clone(), OpenFrame { phase, handle });
            }
            Step::Context { key, value } => {
                let key: EventContextKey = key.parse().map_err(|message| ScenarioError::Parse {
                    path: format!("step {index}").into(),
                    message,
                })?;
                tracker.context_mut().add_context(key, value.clone());
            }
            Step::PopFrame { label } => {
                let frame = frames
                    .shift_remove(label)
                    .ok_or_else(|| ScenarioError::UnknownLabel {
                        step: index,
                        label: label.clone(),
                    })?;
                let current = tracker.current().id();
                if frame.phase == current {
                    if let Err(e) = tracker.context_mut().pop_cause_frame(frame.handle) {
                        record_violation(&mut summary, index, &e);
                    }
                } else {
                    warn!(
                        step = index,
                        frame = %label,
                        owner = %frame.phase,
                        current = %current,
                        "cause frame popped outside the phase that opened it"
                    );
                    summary.violations.push(format!(
                        "step {index}: frame '{label}' belongs to phase {}, current phase is {current}",
                        frame.phase
                    ));
                }
            }
            Step::Pop { label } | Step::Fail { label } => {
                let token =
                    phases
                        .shift_remove(label)
                        .ok_or_else(|| ScenarioError::UnknownLabel {
                            step: index,
                            label: label.clone(),
                        })?;
                let exceptional = matches!(step, Step::Fail { .. });
                let outcome = if exceptional {
                    tracker.exit_exceptionally(token, world)
                } else {
                    tracker.exit(token, world)
                };
                match outcome {
                    Ok(report) => summary.phases.push(report),
                    Err(e) => record_violation(&mut summary, index, &e),
                }
                phases.retain(|_, token| tracker.stack().contains(*token));
                frames.retain(|_, frame| {
                    phases.values().any(|token| token.id() == frame.phase)
                        || frame.phase == tracker.current().id()
                });
            }
        }
        summary.steps += 1;
    }

    for (label, token) in phases.into_iter().rev() {
        if !tracker.stack().contains(token) {
            continue;
        }
        warn!(scenario = %script.name, phase = %label, "phase left open, unwinding as failed");
        summary.left_open += 1;
        match tracker.exit_exceptionally(token, world) {
            Ok(report) => summary.phases.push(report),
            Err(e) => record_violation(&mut summary, script.steps.len(), &e),
        }
    }

    info!(
        scenario = %script.name,
        phases = summary.phases.len(),
        events = summary.event_count(),
        applied = summary.applied(),
        violations = summary.violations.len(),
        "scenario replayed"
    );
    Ok(summary)
}

fn record_violation(summary: &mut ReplaySummary, step: usize, err: &PhaseError) {
    summary.violations.push(format!("step {step}: {err}"));
}
