//! Step definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{StepId, ToolId};

fn default_true() -> bool {
    true
}

/// One tool invocation node within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique id within the plan
    pub id: StepId,
    /// Registry key of the tool to invoke
    pub tool_id: ToolId,
    /// Opaque parameters handed to the tool
    #[serde(default)]
    pub params: Value,
    /// Steps that must complete first; duplicates are ignored
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    /// Context keys the tool reads
    #[serde(default)]
    pub required_context_keys: Vec<String>,
    /// Context keys written when the step completes
    #[serde(default)]
    pub produced_context_keys: Vec<String>,
    /// Whether the step may run alongside other steps
    #[serde(default = "default_true")]
    pub can_parallelize: bool,
    /// Per-step timeout, overriding the tool's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    /// Create a step with no dependencies, context keys or params
    #[must_use]
    pub fn new(id: impl Into<StepId>, tool_id: impl Into<ToolId>) -> Self {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            params: Value::Null,
            dependencies: Vec::new(),
            required_context_keys: Vec::new(),
            produced_context_keys: Vec::new(),
            can_parallelize: true,
            timeout_ms: None,
        }
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    /// Declare a context key the tool reads
    #[must_use]
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.required_context_keys.push(key.into());
        self
    }

    /// Declare a context key the step writes
    #[must_use]
    pub fn produces(mut self, key: impl Into<String>) -> Self {
        self.produced_context_keys.push(key.into());
        self
    }

    /// Set the tool parameters
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Require the step to run with no concurrent siblings
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.can_parallelize = false;
        self
    }

    /// Set the per-step timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}
