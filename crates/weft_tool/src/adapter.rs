//! Invocation adapter.
//!
//! Wraps one tool for one step: applies the effective timeout, contains
//! panics and maps every way a call can end into a [`ToolError`].

use crate::error::ToolError;
use crate::tool::{Tool, ToolCall, ToolOutput};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Adapter for executing a tool on behalf of a step
pub struct ToolAdapter {
    /// The underlying tool
    tool: Arc<dyn Tool>,
    /// Effective timeout, if any
    timeout: Option<Duration>,
}

impl ToolAdapter {
    /// Create an adapter that uses the tool's default timeout
    #[must_use]
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        let timeout = tool.default_timeout();
        Self { tool, timeout }
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pick the timeout for a step
    ///
    /// The step's own timeout wins, then the tool's default, then the
    /// engine-wide default.
    #[must_use]
    pub fn effective_timeout(
        step_timeout_ms: Option<u64>,
        tool: &dyn Tool,
        engine_default: Option<Duration>,
    ) -> Option<Duration> {
        step_timeout_ms
            .map(Duration::from_millis)
            .or_else(|| tool.default_timeout())
            .or(engine_default)
    }

    /// Timeout this adapter applies
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Name of the wrapped tool
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    /// Invoke the tool
    ///
    /// # Errors
    ///
    /// - [`ToolError::Timeout`] if the timeout elapses first; the tool's
    ///   future is dropped
    /// - [`ToolError::Cancelled`] if the tool fails after its cancellation
    ///   token fired
    /// - [`ToolError::Execution`] for any other tool error
    /// - [`ToolError::Panicked`] if the tool panics
    pub async fn invoke(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let tool = self.tool.name().to_string();
        let step = call.step_id.to_string();
        let cancel = call.cancel.clone();

        let execution = AssertUnwindSafe(self.tool.execute(call)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool,
                        step,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => execution.await,
        };

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_)) if cancel.is_cancelled() => Err(ToolError::Cancelled { tool, step }),
            Ok(Err(err)) => Err(ToolError::Execution {
                tool,
                step,
                message: format!("{:#}", err),
            }),
            Err(payload) => Err(ToolError::Panicked {
                tool,
                step,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for ToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAdapter")
            .field("tool", &self.tool.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
