//! Progress event types.
//!
//! Events are serialized flat: the envelope fields sit next to a `type`
//! tag and the variant's own fields, so a stream of events reads as one
//! JSON object per line.

use serde::{Deserialize, Serialize};
use weft_core::{PlanId, RunId, StepId, Timestamp};

/// Per-step error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepErrorKind {
    /// No tool registered under the step's tool id
    ToolNotFound,
    /// The tool exceeded its timeout
    ToolTimeout,
    /// The tool returned an error
    ToolExecutionError,
    /// The tool succeeded but its output could not be stored
    ContextWrite,
    /// The tool aborted after cancellation was requested
    Cancelled,
    /// The tool panicked
    Panicked,
}

impl StepErrorKind {
    /// Stable name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolNotFound => "ToolNotFound",
            Self::ToolTimeout => "ToolTimeout",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::ContextWrite => "ContextWrite",
            Self::Cancelled => "Cancelled",
            Self::Panicked => "Panicked",
        }
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable record of why a step did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Error class
    pub kind: StepErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl StepError {
    /// Create a new step error
    #[must_use]
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StepError {}

/// Why a step was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// A direct or transitive dependency failed
    DependencyFailed {
        /// The step whose failure caused the skip
        dependency: StepId,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependencyFailed { dependency } => {
                write!(f, "skipped due to dependency failure ({})", dependency)
            }
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressKind {
    /// The run began
    PlanStarted {
        /// Number of steps in the plan
        total_steps: usize,
    },
    /// A step was dispatched to its tool
    StepStarted {
        /// Tool the step runs
        tool: String,
    },
    /// A running step reported progress
    StepProgress {
        /// Completion estimate, 0..=100
        percent: u8,
    },
    /// A step completed and its outputs were stored
    StepCompleted {
        /// Wall time spent in the tool
        duration_ms: u64,
        /// Context keys written
        produced_keys: Vec<String>,
    },
    /// A step failed
    StepFailed {
        /// Failure detail
        error: StepError,
    },
    /// A step will never run because a dependency failed
    StepSkipped {
        /// Skip cause
        reason: SkipReason,
    },
    /// A step was cancelled
    StepCancelled,
    /// Every step completed
    PlanCompleted,
    /// All steps are terminal and at least one did not complete
    PlanFailed {
        /// Number of failed steps
        failed: usize,
        /// Number of skipped steps
        skipped: usize,
    },
    /// The run was cancelled
    PlanCancelled,
}

impl ProgressKind {
    /// Whether this is a step's final event
    #[must_use]
    pub const fn is_step_terminal(&self) -> bool {
        matches!(
            self,
            Self::StepCompleted { .. }
                | Self::StepFailed { .. }
                | Self::StepSkipped { .. }
                | Self::StepCancelled
        )
    }

    /// Whether this is the run's final event
    #[must_use]
    pub const fn is_plan_terminal(&self) -> bool {
        matches!(
            self,
            Self::PlanCompleted | Self::PlanFailed { .. } | Self::PlanCancelled
        )
    }

    /// Whether the event concerns a single step
    #[must_use]
    pub const fn is_step_event(&self) -> bool {
        !matches!(
            self,
            Self::PlanStarted { .. } | Self::PlanCompleted | Self::PlanFailed { .. } | Self::PlanCancelled
        )
    }

    /// Variant name as it appears on the wire
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PlanStarted { .. } => "planStarted",
            Self::StepStarted { .. } => "stepStarted",
            Self::StepProgress { .. } => "stepProgress",
            Self::StepCompleted { .. } => "stepCompleted",
            Self::StepFailed { .. } => "stepFailed",
            Self::StepSkipped { .. } => "stepSkipped",
            Self::StepCancelled => "stepCancelled",
            Self::PlanCompleted => "planCompleted",
            Self::PlanFailed { .. } => "planFailed",
            Self::PlanCancelled => "planCancelled",
        }
    }
}

/// One entry in a run's progress stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Position in the run's stream, starting at 0 with no gaps
    pub seq: u64,
    /// Plan being executed
    pub plan_id: PlanId,
    /// Run the event belongs to
    pub run_id: RunId,
    /// Step the event concerns, absent for plan-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// When the event was published
    pub timestamp: Timestamp,
    /// Event payload
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    /// Whether this is a step's final event
    #[must_use]
    pub fn is_step_terminal(&self) -> bool {
        self.kind.is_step_terminal()
    }

    /// Whether this is the run's final event
    #[must_use]
    pub fn is_plan_terminal(&self) -> bool {
        self.kind.is_plan_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_event(step: Option<&str>, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            seq: 3,
            plan_id: PlanId::new("p"),
            run_id: RunId::from_bytes([7; 16]),
            step_id: step.map(StepId::new),
            timestamp: Timestamp::from_millis(0).unwrap(),
            kind,
        }
    }

    #[test]
    fn test_kind_classification() {
        assert!(ProgressKind::StepCancelled.is_step_terminal());
        assert!(!ProgressKind::StepProgress { percent: 10 }.is_step_terminal());
        assert!(ProgressKind::PlanCancelled.is_plan_terminal());
        assert!(!ProgressKind::PlanStarted { total_steps: 1 }.is_plan_terminal());
        assert!(ProgressKind::StepStarted { tool: "t".into() }.is_step_event());
        assert!(!ProgressKind::PlanCompleted.is_step_event());
    }

    #[test]
    fn test_event_wire_format() {
        let event = make_event(
            Some("a"),
            ProgressKind::StepCompleted {
                duration_ms: 12,
                produced_keys: vec!["k".to_string()],
            },
        );
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "stepCompleted");
        assert_eq!(value["stepId"], "a");
        assert_eq!(value["durationMs"], 12);
        assert_eq!(value["producedKeys"], json!(["k"]));
        assert!(value["timestamp"].as_str().unwrap().starts_with("1970-01-01T00:00:00"));
    }

    #[test]
    fn test_event_wire_name_matches_tag() {
        let kinds = vec![
            ProgressKind::PlanStarted { total_steps: 2 },
            ProgressKind::StepProgress { percent: 50 },
            ProgressKind::StepCancelled,
            ProgressKind::PlanFailed { failed: 1, skipped: 2 },
        ];
        for kind in kinds {
            let name = kind.name();
            let value = serde_json::to_value(make_event(None, kind)).unwrap();
            assert_eq!(value["type"], name);
            assert!(value.get("stepId").is_none());
        }
    }

    #[test]
    fn test_event_parse() {
        let event = make_event(
            Some("b"),
            ProgressKind::StepFailed {
                error: StepError::new(StepErrorKind::ToolTimeout, "exceeded 100ms"),
            },
        );
        let line = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::DependencyFailed {
            dependency: StepId::new("a"),
        };
        assert_eq!(reason.to_string(), "skipped due to dependency failure (a)");
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::new(StepErrorKind::ToolNotFound, "no tool 'x'");
        assert_eq!(err.to_string(), "ToolNotFound: no tool 'x'");
    }
}
