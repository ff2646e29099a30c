//! Step state machine.
//!
//! The scheduler owns the [`ExecutionState`] of one run and is only ever
//! touched by the run's coordinator, so every transition is serialized.
//! Dispatch order is deterministic:
//! - Ready steps are considered in plan declaration order
//! - Only the earliest ready step is a dispatch candidate
//! - A step with `canParallelize = false` waits at the head of the line
//!   until nothing else is running, and nothing behind it overtakes it
//! - While an exclusive step runs, nothing else is dispatched

use crate::report::StepResult;
use std::sync::Arc;
use weft_core::{RunStatus, StepId, StepStatus};
use weft_plan::ExecutionPlan;
use weft_progress::SkipReason;

/// Scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Dispatch the step at this index
    Dispatch(usize),
    /// Wait for a running step to finish
    Wait,
    /// Every step is terminal
    Complete,
    /// Steps remain but nothing is ready or running
    Stalled {
        /// Non-terminal steps left
        pending: usize,
    },
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{step}' cannot move from {from} to {to}")]
pub struct ScheduleError {
    /// Step involved
    pub step: StepId,
    /// Current status
    pub from: StepStatus,
    /// Requested status
    pub to: StepStatus,
}

/// Mutable per-run state
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    /// Status per step, by plan index
    pub statuses: Vec<StepStatus>,
    /// Result per terminal step, by plan index
    pub results: Vec<Option<StepResult>>,
    /// Whether cancellation was requested
    pub cancelled: bool,
}

impl ExecutionState {
    /// Fresh state with every step pending
    #[must_use]
    pub fn new(steps: usize) -> Self {
        Self {
            statuses: vec![StepStatus::Pending; steps],
            results: vec![None; steps],
            cancelled: false,
        }
    }
}

/// Deterministic scheduler for one run
pub struct Scheduler {
    /// Plan being executed
    plan: Arc<ExecutionPlan>,
    /// Effective concurrency bound
    max_parallel: usize,
    /// Run state
    state: ExecutionState,
    /// Steps currently running
    running: usize,
    /// Whether the running set holds an exclusive step
    exclusive_running: bool,
}

impl Scheduler {
    /// Create a scheduler and promote the plan's root steps to ready
    #[must_use]
    pub fn new(plan: Arc<ExecutionPlan>, max_parallel: usize) -> Self {
        let state = ExecutionState::new(plan.len());
        let mut scheduler = Self {
            plan,
            max_parallel: max_parallel.max(1),
            state,
            running: 0,
            exclusive_running: false,
        };
        scheduler.promote_ready();
        scheduler
    }

    /// Plan being executed
    #[must_use]
    pub fn plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    /// Effective concurrency bound
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Move pending steps whose dependencies all completed to ready
    ///
    /// Returns the newly promoted steps in declaration order.
    pub fn promote_ready(&mut self) -> Vec<usize> {
        if self.state.cancelled {
            return Vec::new();
        }
        let promoted: Vec<usize> = self
            .plan
            .ready_steps(&self.state.statuses)
            .into_iter()
            .filter(|&idx| self.state.statuses[idx] == StepStatus::Pending)
            .collect();
        for &idx in &promoted {
            self.state.statuses[idx] = StepStatus::Ready;
        }
        promoted
    }

    /// Decide what to do next
    #[must_use]
    pub fn decide(&self) -> ScheduleDecision {
        if self.is_finished() {
            return ScheduleDecision::Complete;
        }

        let head = if self.state.cancelled {
            None
        } else {
            self.state
                .statuses
                .iter()
                .position(|status| *status == StepStatus::Ready)
        };

        match head {
            Some(idx) => {
                let blocked = self.running >= self.max_parallel
                    || self.exclusive_running
                    || (!self.plan.step(idx).can_parallelize && self.running > 0);
                if blocked {
                    ScheduleDecision::Wait
                } else {
                    ScheduleDecision::Dispatch(idx)
                }
            }
            None if self.running > 0 => ScheduleDecision::Wait,
            None => ScheduleDecision::Stalled {
                pending: self.non_terminal(),
            },
        }
    }

    fn transition(&mut self, idx: usize, expected: &[StepStatus], to: StepStatus) -> Result<(), ScheduleError> {
        let from = self.state.statuses[idx];
        if !expected.contains(&from) {
            return Err(ScheduleError {
                step: self.plan.step(idx).id.clone(),
                from,
                to,
            });
        }
        if from == StepStatus::Running {
            self.running -= 1;
            if !self.plan.step(idx).can_parallelize {
                self.exclusive_running = false;
            }
        }
        self.state.statuses[idx] = to;
        Ok(())
    }

    /// Mark a ready step as running
    ///
    /// # Errors
    ///
    /// Returns error if the step is not ready
    pub fn mark_running(&mut self, idx: usize) -> Result<(), ScheduleError> {
        self.transition(idx, &[StepStatus::Ready], StepStatus::Running)?;
        self.running += 1;
        if !self.plan.step(idx).can_parallelize {
            self.exclusive_running = true;
        }
        Ok(())
    }

    /// Mark a running step as completed, returning newly ready dependents
    ///
    /// # Errors
    ///
    /// Returns error if the step is not running
    pub fn mark_completed(&mut self, idx: usize, result: StepResult) -> Result<Vec<usize>, ScheduleError> {
        self.transition(idx, &[StepStatus::Running], StepStatus::Completed)?;
        self.state.results[idx] = Some(result);
        Ok(self.promote_ready())
    }

    /// Mark a running step as failed and skip everything downstream
    ///
    /// Returns the dependents that were skipped, in declaration order.
    /// Dependents already terminal are left alone.
    ///
    /// # Errors
    ///
    /// Returns error if the step is not running
    pub fn mark_failed(&mut self, idx: usize, result: StepResult) -> Result<Vec<usize>, ScheduleError> {
        self.transition(idx, &[StepStatus::Running], StepStatus::Failed)?;
        self.state.results[idx] = Some(result);

        let failed_id = self.plan.step(idx).id.clone();
        let skipped: Vec<usize> = self
            .plan
            .transitive_dependents(idx)
            .into_iter()
            .filter(|&dep| !self.state.statuses[dep].is_terminal())
            .collect();

        for &dep in &skipped {
            // Dependents of a step that never completed cannot be running.
            self.state.statuses[dep] = StepStatus::Skipped;
            self.state.results[dep] = Some(StepResult::skipped(SkipReason::DependencyFailed {
                dependency: failed_id.clone(),
            }));
        }
        Ok(skipped)
    }

    /// Mark a running step as cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the step is not running
    pub fn mark_cancelled(&mut self, idx: usize, result: StepResult) -> Result<(), ScheduleError> {
        self.transition(idx, &[StepStatus::Running], StepStatus::Cancelled)?;
        self.state.results[idx] = Some(result);
        Ok(())
    }

    /// Stop dispatching and cancel every pending or ready step
    ///
    /// Returns the cancelled steps in declaration order. Running steps are
    /// left for the caller to resolve.
    pub fn cancel_pending(&mut self) -> Vec<usize> {
        self.state.cancelled = true;
        let cancelled: Vec<usize> = (0..self.state.statuses.len())
            .filter(|&idx| {
                matches!(
                    self.state.statuses[idx],
                    StepStatus::Pending | StepStatus::Ready
                )
            })
            .collect();

        for &idx in &cancelled {
            self.state.statuses[idx] = StepStatus::Cancelled;
            self.state.results[idx] = Some(StepResult::cancelled(None, 0));
        }
        cancelled
    }

    /// Status of one step
    #[must_use]
    pub fn status(&self, idx: usize) -> StepStatus {
        self.state.statuses[idx]
    }

    /// Indices of running steps
    #[must_use]
    pub fn running_steps(&self) -> Vec<usize> {
        (0..self.state.statuses.len())
            .filter(|&idx| self.state.statuses[idx] == StepStatus::Running)
            .collect()
    }

    /// Number of running steps
    #[must_use]
    pub fn running(&self) -> usize {
        self.running
    }

    /// Number of steps with the given status
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.state.statuses.iter().filter(|s| **s == status).count()
    }

    /// Number of steps not yet terminal
    #[must_use]
    pub fn non_terminal(&self) -> usize {
        self.state.statuses.iter().filter(|s| !s.is_terminal()).count()
    }

    /// Whether every step is terminal
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.non_terminal() == 0
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled
    }

    /// Run-level status implied by the step statuses
    #[must_use]
    pub fn run_status(&self) -> RunStatus {
        if self.state.cancelled {
            RunStatus::Cancelled
        } else if !self.is_finished() {
            RunStatus::Running
        } else if self.count(StepStatus::Completed) == self.state.statuses.len() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Consume into the final state
    #[must_use]
    pub fn into_state(self) -> ExecutionState {
        self.state
    }
}
