//! Lifecycle auditing for recorded progress streams.
//!
//! Checks that a stream obeys the per-step ordering
//! `Started, Progress*, Terminal` (a skipped or cancelled step may have no
//! `Started`), that each step and the plan end exactly once, that the plan
//! terminal event is last and that `seq` strictly increases.

use crate::event::{ProgressEvent, ProgressKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use weft_core::StepId;

/// Lifecycle violation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The first event was not `PlanStarted`
    #[error("stream does not begin with planStarted (seq {seq})")]
    PlanNotStarted {
        /// Offending event
        seq: u64,
    },

    /// A second `PlanStarted`
    #[error("duplicate planStarted at seq {seq}")]
    DuplicatePlanStart {
        /// Offending event
        seq: u64,
    },

    /// Sequence numbers went backwards or repeated
    #[error("seq {found} does not follow {previous}")]
    OutOfOrder {
        /// Last accepted seq
        previous: u64,
        /// Offending seq
        found: u64,
    },

    /// Anything after the plan's terminal event
    #[error("event at seq {seq} after plan terminal event")]
    EventAfterPlanTerminal {
        /// Offending event
        seq: u64,
    },

    /// A step-level event with no step id
    #[error("{event} at seq {seq} has no step id")]
    MissingStepId {
        /// Offending event
        seq: u64,
        /// Event name
        event: &'static str,
    },

    /// A step was started twice
    #[error("step '{step}' started twice")]
    DuplicateStart {
        /// Offending step
        step: StepId,
    },

    /// Progress or completion for a step that never started
    #[error("{event} for step '{step}' before stepStarted")]
    StepNotStarted {
        /// Offending step
        step: StepId,
        /// Event name
        event: &'static str,
    },

    /// Anything for a step after its terminal event
    #[error("{event} for step '{step}' after its terminal event")]
    EventAfterStepTerminal {
        /// Offending step
        step: StepId,
        /// Event name
        event: &'static str,
    },

    /// The plan ended while a step was still running
    #[error("plan ended while step '{step}' was running")]
    UnterminatedStep {
        /// Offending step
        step: StepId,
    },

    /// The stream ended without a plan terminal event
    #[error("stream ended without a plan terminal event")]
    MissingPlanTerminal,

    /// Not every step of the plan reached a terminal event
    #[error("{terminal} of {expected} steps reached a terminal event")]
    StepCountMismatch {
        /// Steps announced by `PlanStarted`
        expected: usize,
        /// Steps with a terminal event
        terminal: usize,
    },
}

/// Counts gathered while auditing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    /// Events observed
    pub events: usize,
    /// Steps that completed
    pub completed: usize,
    /// Steps that failed
    pub failed: usize,
    /// Steps that were skipped
    pub skipped: usize,
    /// Steps that were cancelled
    pub cancelled: usize,
    /// Progress ticks observed
    pub progress_ticks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPhase {
    Running,
    Finished,
}

/// Incremental lifecycle checker
#[derive(Debug, Default)]
pub struct LifecycleAuditor {
    /// Steps announced by `PlanStarted`
    total_steps: Option<usize>,
    /// Last accepted seq
    last_seq: Option<u64>,
    /// Whether the plan terminal event has been seen
    plan_finished: bool,
    /// Phase per step
    steps: HashMap<StepId, StepPhase>,
    /// Running counts
    summary: AuditSummary,
}

impl LifecycleAuditor {
    /// Create a new auditor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one event against everything seen so far
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle rule the event breaks
    pub fn observe(&mut self, event: &ProgressEvent) -> Result<(), LifecycleError> {
        let seq = event.seq;

        if let Some(previous) = self.last_seq {
            if seq <= previous {
                return Err(LifecycleError::OutOfOrder {
                    previous,
                    found: seq,
                });
            }
        }
        if self.plan_finished {
            return Err(LifecycleError::EventAfterPlanTerminal { seq });
        }

        match &event.kind {
            ProgressKind::PlanStarted { total_steps } => {
                if self.total_steps.is_some() {
                    return Err(LifecycleError::DuplicatePlanStart { seq });
                }
                self.total_steps = Some(*total_steps);
            }
            _ if self.total_steps.is_none() => {
                return Err(LifecycleError::PlanNotStarted { seq });
            }
            kind if kind.is_plan_terminal() => {
                if let Some((step, _)) = self
                    .steps
                    .iter()
                    .find(|(_, phase)| **phase == StepPhase::Running)
                {
                    return Err(LifecycleError::UnterminatedStep { step: step.clone() });
                }
                self.plan_finished = true;
            }
            kind => self.observe_step(event, kind)?,
        }

        self.last_seq = Some(seq);
        self.summary.events += 1;
        Ok(())
    }

    fn observe_step(&mut self, event: &ProgressEvent, kind: &ProgressKind) -> Result<(), LifecycleError> {
        let name = kind.name();
        let Some(step) = event.step_id.as_ref() else {
            return Err(LifecycleError::MissingStepId {
                seq: event.seq,
                event: name,
            });
        };
        let phase = self.steps.get(step).copied();

        if phase == Some(StepPhase::Finished) {
            return Err(LifecycleError::EventAfterStepTerminal {
                step: step.clone(),
                event: name,
            });
        }

        match kind {
            ProgressKind::StepStarted { .. } => {
                if phase.is_some() {
                    return Err(LifecycleError::DuplicateStart { step: step.clone() });
                }
                self.steps.insert(step.clone(), StepPhase::Running);
            }
            ProgressKind::StepProgress { .. } => {
                if phase.is_none() {
                    return Err(LifecycleError::StepNotStarted {
                        step: step.clone(),
                        event: name,
                    });
                }
                self.summary.progress_ticks += 1;
            }
            ProgressKind::StepCompleted { .. } | ProgressKind::StepFailed { .. } => {
                if phase.is_none() {
                    return Err(LifecycleError::StepNotStarted {
                        step: step.clone(),
                        event: name,
                    });
                }
                if matches!(kind, ProgressKind::StepCompleted { .. }) {
                    self.summary.completed += 1;
                } else {
                    self.summary.failed += 1;
                }
                self.steps.insert(step.clone(), StepPhase::Finished);
            }
            ProgressKind::StepSkipped { .. } => {
                self.summary.skipped += 1;
                self.steps.insert(step.clone(), StepPhase::Finished);
            }
            ProgressKind::StepCancelled => {
                self.summary.cancelled += 1;
                self.steps.insert(step.clone(), StepPhase::Finished);
            }
            _ => {}
        }

        Ok(())
    }

    /// Check a whole recorded stream
    ///
    /// # Errors
    ///
    /// Returns the first violation found, including a missing plan
    /// terminal event or steps that never finished
    pub fn validate_sequence(&mut self, events: &[ProgressEvent]) -> Result<AuditSummary, LifecycleError> {
        for event in events {
            self.observe(event)?;
        }
        self.finish()
    }

    /// Check that the stream is complete
    ///
    /// # Errors
    ///
    /// Returns error if the plan never ended or a step has no terminal event
    pub fn finish(&self) -> Result<AuditSummary, LifecycleError> {
        if !self.plan_finished {
            return Err(LifecycleError::MissingPlanTerminal);
        }

        let terminal = self
            .steps
            .values()
            .filter(|phase| **phase == StepPhase::Finished)
            .count();
        let expected = self.total_steps.unwrap_or(0);
        if terminal != expected {
            return Err(LifecycleError::StepCountMismatch { expected, terminal });
        }

        Ok(self.summary.clone())
    }

    /// Counts gathered so far
    #[must_use]
    pub fn summary(&self) -> &AuditSummary {
        &self.summary
    }

    /// Forget everything seen
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
