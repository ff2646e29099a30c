//! Step results, run metrics and the final execution report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{PlanId, RunId, RunStatus, StepId, StepStatus};
use weft_progress::{SkipReason, StepError};

/// Outcome recorded for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Terminal status
    pub status: StepStatus,
    /// Primary tool output, for completed steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Wall time spent in the tool
    pub duration_ms: u64,
    /// Context keys written
    #[serde(default)]
    pub produced_keys: Vec<String>,
    /// Why the step was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl StepResult {
    /// A completed step
    #[must_use]
    pub fn completed(output: Value, duration_ms: u64, produced_keys: Vec<String>) -> Self {
        Self {
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            duration_ms,
            produced_keys,
            skip_reason: None,
        }
    }

    /// A failed step
    #[must_use]
    pub fn failed(error: StepError, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            produced_keys: Vec::new(),
            skip_reason: None,
        }
    }

    /// A step skipped because a dependency failed
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
            produced_keys: Vec::new(),
            skip_reason: Some(reason),
        }
    }

    /// A cancelled step, with the tool's abort error if it returned one
    #[must_use]
    pub fn cancelled(error: Option<StepError>, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Cancelled,
            output: None,
            error,
            duration_ms,
            produced_keys: Vec::new(),
            skip_reason: None,
        }
    }
}

/// Counters gathered over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Steps handed to a tool
    pub dispatched: u64,
    /// Steps completed
    pub completed: u64,
    /// Steps failed
    pub failed: u64,
    /// Steps skipped
    pub skipped: u64,
    /// Steps cancelled
    pub cancelled: u64,
    /// Most steps running at once
    pub peak_parallelism: usize,
    /// Progress ticks turned into events
    pub progress_ticks: u64,
    /// Events published
    pub events_published: u64,
}

impl RunMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch with the resulting number of running steps
    pub fn record_dispatch(&mut self, running: usize) {
        self.dispatched += 1;
        self.peak_parallelism = self.peak_parallelism.max(running);
    }

    /// Record a terminal status
    pub fn record_terminal(&mut self, status: StepStatus) {
        match status {
            StepStatus::Completed => self.completed += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Skipped => self.skipped += 1,
            StepStatus::Cancelled => self.cancelled += 1,
            StepStatus::Pending | StepStatus::Ready | StepStatus::Running => {}
        }
    }

    /// Record a progress tick
    pub fn record_tick(&mut self) {
        self.progress_ticks += 1;
    }

    /// Record a published event
    pub fn record_event(&mut self) {
        self.events_published += 1;
    }

    /// Fraction of dispatched steps that completed (1.0 if none ran)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.dispatched == 0 {
            return 1.0;
        }
        self.completed as f64 / self.dispatched as f64
    }
}

/// Final per-step entry in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    /// Step id
    pub step_id: StepId,
    /// Tool the step was dispatched to
    pub tool: String,
    /// Terminal status and detail
    #[serde(flatten)]
    pub result: StepResult,
}

impl StepReport {
    /// Terminal status
    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.result.status
    }
}

/// Result of a finished run
///
/// Per-step statuses are always kept; a failed run still reports which
/// steps completed and what they produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Plan that ran
    pub plan_id: PlanId,
    /// Run id
    pub run_id: RunId,
    /// Run-level status
    pub status: RunStatus,
    /// One entry per step, in declaration order
    pub steps: Vec<StepReport>,
    /// Wall time of the whole run
    pub total_duration_ms: u64,
    /// Run counters
    pub metrics: RunMetrics,
}

impl ExecutionReport {
    /// Look up a step's entry
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step_id.as_str() == id)
    }

    /// Whether every step completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Number of steps with the given status
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status() == status).count()
    }
}
