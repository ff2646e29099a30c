//! Step dispatch.
//!
//! The executor turns a ready step into a running tokio task and reports
//! back through channels; it never touches run state itself. Tools keep
//! running until they return, time out or are abandoned by the
//! coordinator after the cancellation grace period.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};
use weft_context::ContextStore;
use weft_plan::ExecutionPlan;
use weft_tool::{ProgressReporter, ProgressTick, ToolAdapter, ToolCall, ToolError, ToolOutput, ToolRegistry};

/// Progress ticks buffered per run before reporters start dropping them
pub const TICK_BUFFER: usize = 256;

/// How one dispatched step ended
#[derive(Debug)]
pub struct StepOutcome {
    /// Plan index of the step
    pub index: usize,
    /// Tool output or the reason it failed
    pub result: Result<ToolOutput, ToolError>,
    /// Time spent in the tool
    pub duration: Duration,
}

/// Receiving ends the coordinator selects over
#[derive(Debug)]
pub struct StepChannels {
    /// One message per dispatched step
    pub outcomes: mpsc::UnboundedReceiver<StepOutcome>,
    /// Progress reported by running tools, bounded by [`TICK_BUFFER`]
    pub ticks: mpsc::Receiver<ProgressTick>,
}

/// Dispatches steps of one run to their tools
pub struct StepExecutor {
    /// Plan being executed
    plan: Arc<ExecutionPlan>,
    /// Tool lookup
    registry: Arc<ToolRegistry>,
    /// Source of each step's context slice
    store: Arc<ContextStore>,
    /// Run cancellation token; each step gets a child
    cancel: CancellationToken,
    /// Timeout for steps whose step and tool set none
    default_timeout: Option<Duration>,
    /// Outcome sender
    outcomes: mpsc::UnboundedSender<StepOutcome>,
    /// Tick sender handed to reporters
    ticks: mpsc::Sender<ProgressTick>,
}

impl StepExecutor {
    /// Create an executor and the channels it reports into
    #[must_use]
    pub fn new(
        plan: Arc<ExecutionPlan>,
        registry: Arc<ToolRegistry>,
        store: Arc<ContextStore>,
        cancel: CancellationToken,
        default_timeout: Option<Duration>,
    ) -> (Self, StepChannels) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);
        let executor = Self {
            plan,
            registry,
            store,
            cancel,
            default_timeout,
            outcomes: outcome_tx,
            ticks: tick_tx,
        };
        let channels = StepChannels {
            outcomes: outcome_rx,
            ticks: tick_rx,
        };
        (executor, channels)
    }

    /// Dispatch the step at `index`
    ///
    /// The step's context slice is read here, so it reflects every write
    /// made by steps that completed before the dispatch. An unknown tool
    /// is reported as an immediate [`ToolError::NotFound`] outcome and no
    /// task is spawned.
    pub fn dispatch(&self, index: usize) -> Option<JoinHandle<()>> {
        let step = self.plan.step(index);
        let tool = match self.registry.get(step.tool_id.as_str()) {
            Ok(tool) => tool,
            Err(err) => {
                debug!(step = %step.id, tool = %step.tool_id, "tool not registered");
                self.send(StepOutcome {
                    index,
                    result: Err(err),
                    duration: Duration::ZERO,
                });
                return None;
            }
        };

        let timeout = ToolAdapter::effective_timeout(step.timeout_ms, tool.as_ref(), self.default_timeout);
        let adapter = ToolAdapter::new(tool).with_timeout(timeout);
        let call = ToolCall::new(self.plan.id().clone(), step.id.clone(), step.params.clone())
            .with_context(self.store.get_many(&step.required_context_keys))
            .with_progress(ProgressReporter::new(step.id.clone(), self.ticks.clone()))
            .with_cancel(self.cancel.child_token());

        let outcomes = self.outcomes.clone();
        let span = tracing::debug_span!("step", step = %step.id, tool = %step.tool_id);
        let step_id = step.id.clone();

        let task = async move {
            let started = Instant::now();
            let result = adapter.invoke(call).await;
            let outcome = StepOutcome {
                index,
                result,
                duration: started.elapsed(),
            };
            if outcomes.send(outcome).is_err() {
                warn!(step = %step_id, "run already finished, discarding late result");
            }
        };
        Some(tokio::spawn(task.instrument(span)))
    }

    fn send(&self, outcome: StepOutcome) {
        if self.outcomes.send(outcome).is_err() {
            warn!("run already finished, discarding outcome");
        }
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("plan", self.plan.id())
            .field("registry", &self.registry)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
