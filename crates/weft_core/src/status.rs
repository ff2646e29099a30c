//! Step and run status model.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single step within a run.
///
/// `pending -> ready -> running -> {completed | failed | skipped | cancelled}`.
/// A step may also move straight from `pending`/`ready` to `skipped` or
/// `cancelled` without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on at least one dependency
    Pending,
    /// All dependencies completed, not yet dispatched
    Ready,
    /// Dispatched to its tool
    Running,
    /// Tool returned successfully and outputs were published
    Completed,
    /// Tool failed, timed out or could not be resolved
    Failed,
    /// Never ran because a dependency failed
    Skipped,
    /// Never ran, or its result was discarded, because the run was cancelled
    Cancelled,
}

impl StepStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Lowercase name used in logs and reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Validated but not started
    Created,
    /// Steps are being dispatched
    Running,
    /// Every step completed
    Completed,
    /// At least one step did not complete
    Failed,
    /// Cancellation was requested before the run finished
    Cancelled,
}

impl RunStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name used in logs and reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_terminal_states() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Ready.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_run_terminal_states() {
        assert!(!RunStatus::Created.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
