//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use weft_context::ContextConfig;
use weft_core::{CoreError, CoreResult};
use weft_progress::DEFAULT_BUFFER;

/// Default grace period granted to in-flight steps after cancellation
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5_000;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound applied on top of each plan's `maxParallel`
    pub max_parallel_cap: Option<usize>,
    /// Timeout for steps whose step and tool set none
    pub default_step_timeout_ms: Option<u64>,
    /// How long in-flight steps may run after cancellation
    pub cancel_grace_ms: u64,
    /// Broadcast buffer of the progress channel
    pub progress_buffer: usize,
    /// Interval for sweeping expired context entries during a run
    pub sweep_interval_ms: Option<u64>,
    /// Context store bounds
    pub context: ContextConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_cap: None,
            default_step_timeout_ms: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            progress_buffer: DEFAULT_BUFFER,
            sweep_interval_ms: None,
            context: ContextConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| CoreError::Io {
            reason: format!("{}: {}", path.as_ref().display(), err),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Cap every plan's parallelism
    #[must_use]
    pub fn with_max_parallel_cap(mut self, cap: usize) -> Self {
        self.max_parallel_cap = Some(cap);
        self
    }

    /// Set the engine-wide step timeout
    #[must_use]
    pub fn with_default_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_step_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the cancellation grace period
    #[must_use]
    pub fn with_cancel_grace_ms(mut self, grace_ms: u64) -> Self {
        self.cancel_grace_ms = grace_ms;
        self
    }

    /// Set the progress channel buffer
    #[must_use]
    pub fn with_progress_buffer(mut self, buffer: usize) -> Self {
        self.progress_buffer = buffer;
        self
    }

    /// Sweep expired context entries on this interval
    #[must_use]
    pub fn with_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = Some(interval_ms);
        self
    }

    /// Set the context store bounds
    #[must_use]
    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    /// Parallelism for a plan declaring `plan_max`
    #[must_use]
    pub fn effective_parallelism(&self, plan_max: usize) -> usize {
        let capped = match self.max_parallel_cap {
            Some(cap) => plan_max.min(cap),
            None => plan_max,
        };
        capped.max(1)
    }

    /// Engine-wide step timeout as a duration
    #[must_use]
    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_ms.map(Duration::from_millis)
    }

    /// Grace period as a duration
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Sweep interval as a duration, ignoring a zero interval
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
