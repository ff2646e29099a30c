//! Tool invocation errors.

use serde::{Deserialize, Serialize};
use weft_progress::{StepError, StepErrorKind};

/// Why a tool invocation did not produce output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ToolError {
    /// No tool registered under the requested id
    #[error("tool not found: {tool}")]
    NotFound {
        /// Requested tool id
        tool: String,
    },

    /// The tool did not finish within its timeout
    #[error("tool '{tool}' timed out after {timeout_ms}ms in step '{step}'")]
    Timeout {
        /// Tool name
        tool: String,
        /// Step being executed
        step: String,
        /// Effective timeout
        timeout_ms: u64,
    },

    /// The tool returned an error
    #[error("tool '{tool}' failed in step '{step}': {message}")]
    Execution {
        /// Tool name
        tool: String,
        /// Step being executed
        step: String,
        /// The tool's error, with its cause chain
        message: String,
    },

    /// The tool aborted after cancellation was requested
    #[error("tool '{tool}' aborted on cancellation in step '{step}'")]
    Cancelled {
        /// Tool name
        tool: String,
        /// Step being executed
        step: String,
    },

    /// The tool panicked
    #[error("tool '{tool}' panicked in step '{step}': {message}")]
    Panicked {
        /// Tool name
        tool: String,
        /// Step being executed
        step: String,
        /// Panic payload, if it was a string
        message: String,
    },
}

impl ToolError {
    /// Per-step error class for progress events and reports
    #[must_use]
    pub const fn kind(&self) -> StepErrorKind {
        match self {
            Self::NotFound { .. } => StepErrorKind::ToolNotFound,
            Self::Timeout { .. } => StepErrorKind::ToolTimeout,
            Self::Execution { .. } => StepErrorKind::ToolExecutionError,
            Self::Cancelled { .. } => StepErrorKind::Cancelled,
            Self::Panicked { .. } => StepErrorKind::Panicked,
        }
    }

    /// Whether the error came from cooperative cancellation
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<&ToolError> for StepError {
    fn from(err: &ToolError) -> Self {
        StepError::new(err.kind(), err.to_string())
    }
}

impl From<ToolError> for StepError {
    fn from(err: ToolError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::Timeout {
            tool: "tts".to_string(),
            step: "voice".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "tool 'tts' timed out after 250ms in step 'voice'");
    }

    #[test]
    fn test_tool_error_to_step_error() {
        let err = ToolError::NotFound {
            tool: "ghost".to_string(),
        };
        let step_err = StepError::from(&err);

        assert_eq!(step_err.kind, StepErrorKind::ToolNotFound);
        assert_eq!(step_err.message, "tool not found: ghost");
    }

    #[test]
    fn test_tool_error_serde() {
        let err = ToolError::Cancelled {
            tool: "sleep".to_string(),
            step: "wait".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "cancelled");

        let back: ToolError = serde_json::from_value(json).unwrap();
        assert!(back.is_cancellation());
    }
}
