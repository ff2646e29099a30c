//! The tool contract.

use crate::reporter::ProgressReporter;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weft_context::ContextSlice;
use weft_core::{PlanId, StepId};

/// An opaque unit of work invoked by the engine
///
/// Implementations receive only the context keys the step declared and
/// should return promptly once `call.cancel` fires.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// One-line summary shown by tool listings
    fn description(&self) -> &str {
        ""
    }

    /// Timeout applied when the step does not set one
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool for one step
    ///
    /// # Errors
    ///
    /// Any error fails the step; it is reported with its cause chain
    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput>;
}

/// Everything a tool receives for one invocation
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Plan the step belongs to
    pub plan_id: PlanId,
    /// Step being executed
    pub step_id: StepId,
    /// Step parameters
    pub params: Value,
    /// Values of the step's required context keys that were present
    pub context: ContextSlice,
    /// Progress handle
    pub progress: ProgressReporter,
    /// Fires when the run is cancelled
    pub cancel: CancellationToken,
}

impl ToolCall {
    /// Build a call with no context, a no-op reporter and a fresh token
    #[must_use]
    pub fn new(plan_id: impl Into<PlanId>, step_id: impl Into<StepId>, params: Value) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_id: step_id.into(),
            params,
            context: ContextSlice::new(),
            progress: ProgressReporter::noop(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the context slice
    #[must_use]
    pub fn with_context(mut self, context: ContextSlice) -> Self {
        self.context = context;
        self
    }

    /// Set the progress reporter
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Set the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What a tool returns on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Primary result
    pub value: Value,
    /// Values for specific produced context keys
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub produced: IndexMap<String, Value>,
}

impl ToolOutput {
    /// Output with a primary value only
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            produced: IndexMap::new(),
        }
    }

    /// Set the value for one produced key
    #[must_use]
    pub fn with_produced(mut self, key: impl Into<String>, value: Value) -> Self {
        self.produced.insert(key.into(), value);
        self
    }

    /// Values to store for the step's declared keys, in declared order
    ///
    /// Each declared key takes its entry from `produced` if present and
    /// the primary value otherwise. Entries in `produced` for keys the
    /// step did not declare are dropped.
    #[must_use]
    pub fn resolve_produced(&self, declared: &[String]) -> Vec<(String, Value)> {
        for key in self.produced.keys() {
            if !declared.contains(key) {
                tracing::debug!(key = %key, "ignoring undeclared produced key");
            }
        }

        declared
            .iter()
            .map(|key| {
                let value = self.produced.get(key).unwrap_or(&self.value).clone();
                (key.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
            let text: String = call
                .context
                .get_as("text")
                .ok_or_else(|| anyhow::anyhow!("missing context key 'text'"))??;
            Ok(ToolOutput::new(json!(text.to_uppercase())))
        }
    }

    #[test]
    fn test_resolve_produced_prefers_explicit() {
        let output = ToolOutput::new(json!("primary"))
            .with_produced("b", json!(2))
            .with_produced("stray", json!(3));
        let declared = vec!["a".to_string(), "b".to_string()];

        let resolved = output.resolve_produced(&declared);
        assert_eq!(
            resolved,
            vec![
                ("a".to_string(), json!("primary")),
                ("b".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_resolve_produced_nothing_declared() {
        let output = ToolOutput::new(json!(1));
        assert!(output.resolve_produced(&[]).is_empty());
    }

    #[test]
    fn test_output_serde_omits_empty_produced() {
        let json = serde_json::to_value(ToolOutput::new(json!(true))).unwrap();
        assert_eq!(json, json!({"value": true}));
    }

    #[tokio::test]
    async fn test_tool_reads_context() {
        let context: ContextSlice = [("text".to_string(), json!("hi"))].into_iter().collect();
        let call = ToolCall::new("p", "s", Value::Null).with_context(context);

        let output = Upper.execute(call).await.unwrap();
        assert_eq!(output.value, json!("HI"));
        assert!(Upper.default_timeout().is_none());
    }

    #[tokio::test]
    async fn test_tool_missing_context_is_error() {
        let call = ToolCall::new("p", "s", Value::Null);
        let err = Upper.execute(call).await.unwrap_err();
        assert!(err.to_string().contains("missing context key"));
    }
}
