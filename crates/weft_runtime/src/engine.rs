//! Run coordinator.
//!
//! One tokio task per run owns the [`Scheduler`] and is the only place
//! run state changes. It waits on whichever happens first: a step
//! outcome, a progress tick, cancellation, the end of the cancellation
//! grace period or the context sweep interval. Tools run concurrently in
//! their own tasks and report back through the executor's channels.

use crate::config::EngineConfig;
use crate::executor::{StepChannels, StepExecutor, StepOutcome};
use crate::report::{ExecutionReport, RunMetrics, StepReport, StepResult};
use crate::scheduler::{ScheduleDecision, ScheduleError, Scheduler};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use weft_context::{ContextError, ContextStore, PutOutcome};
use weft_core::{PlanId, RunId, RunStatus, StepId, StepStatus};
use weft_plan::{ExecutionPlan, Step, ValidationError};
use weft_progress::{ProgressChannel, ProgressKind, ProgressSubscription, StepError, StepErrorKind};
use weft_tool::{ProgressTick, ToolError, ToolOutput, ToolRegistry};

/// Engine error
///
/// Step failures never surface here; they are recorded in the
/// [`ExecutionReport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The plan was rejected before any step ran
    #[error("invalid plan: {0}")]
    Validation(#[from] ValidationError),

    /// Steps remain but none can make progress
    #[error("scheduler invariant violated with {pending} steps pending: {detail}")]
    InvariantViolation {
        /// Non-terminal steps at the time
        pending: usize,
        /// What went wrong
        detail: String,
    },

    /// The coordinator task did not finish normally
    #[error("run task failed: {0}")]
    Join(String),
}

impl EngineError {
    fn from_schedule(err: ScheduleError, pending: usize) -> Self {
        Self::InvariantViolation {
            pending,
            detail: err.to_string(),
        }
    }
}

/// Executes plans against a tool registry
#[derive(Debug, Clone)]
pub struct Engine {
    /// Tools available to steps
    registry: Arc<ToolRegistry>,
    /// Engine configuration
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the default configuration
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Tools available to steps
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a plan to completion
    ///
    /// # Errors
    ///
    /// Returns error only if the scheduler reaches an impossible state or
    /// the run task dies; step failures are part of the report
    pub async fn run(&self, plan: ExecutionPlan) -> Result<ExecutionReport, EngineError> {
        self.spawn(plan).wait().await
    }

    /// Validate raw steps and run them
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] before any step executes if the
    /// steps do not form a valid plan
    pub async fn run_steps(
        &self,
        id: impl Into<PlanId>,
        max_parallel: usize,
        steps: Vec<Step>,
    ) -> Result<ExecutionReport, EngineError> {
        let plan = ExecutionPlan::new(id, max_parallel, steps)?;
        self.run(plan).await
    }

    /// Start a run in the background with a fresh context store
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, plan: ExecutionPlan) -> RunHandle {
        let store = Arc::new(ContextStore::with_config(self.config.context.clone()));
        self.run_with(plan, store, CancellationToken::new())
    }

    /// Start a run with a caller-supplied store and cancellation token
    ///
    /// Values already in `store` are visible to steps that declare them.
    #[must_use]
    pub fn run_with(
        &self,
        plan: ExecutionPlan,
        store: Arc<ContextStore>,
        cancel: CancellationToken,
    ) -> RunHandle {
        let plan = Arc::new(plan);
        let run_id = RunId::new();
        let progress = ProgressChannel::new(plan.id().clone(), run_id, self.config.progress_buffer);
        let max_parallel = self.config.effective_parallelism(plan.max_parallel());

        for (key, producers) in plan.shared_producers() {
            warn!(
                plan_id = %plan.id(),
                key = %key,
                producers = ?producers,
                "several steps produce the same context key; last writer wins"
            );
        }

        let (executor, channels) = StepExecutor::new(
            Arc::clone(&plan),
            Arc::clone(&self.registry),
            Arc::clone(&store),
            cancel.clone(),
            self.config.default_step_timeout(),
        );

        let coordinator = Coordinator {
            scheduler: Scheduler::new(Arc::clone(&plan), max_parallel),
            plan: Arc::clone(&plan),
            executor,
            progress: progress.clone(),
            store: Arc::clone(&store),
            metrics: RunMetrics::new(),
            dispatched_at: vec![None; plan.len()],
            grace: self.config.cancel_grace(),
            grace_deadline: None,
            run_id,
        };

        let span = info_span!("run", plan_id = %plan.id(), run_id = %run_id);
        let sweep = self.config.sweep_interval();
        let token = cancel.clone();
        let task = tokio::spawn(
            async move { coordinator.run(channels, token, sweep).await }.instrument(span),
        );

        RunHandle {
            run_id,
            plan_id: plan.id().clone(),
            progress,
            cancel,
            store,
            task,
        }
    }
}

/// Handle to a run in progress
#[derive(Debug)]
pub struct RunHandle {
    /// Run id
    run_id: RunId,
    /// Plan id
    plan_id: PlanId,
    /// Progress channel of the run
    progress: ProgressChannel,
    /// Run cancellation token
    cancel: CancellationToken,
    /// Context store of the run
    store: Arc<ContextStore>,
    /// Coordinator task
    task: JoinHandle<Result<ExecutionReport, EngineError>>,
}

impl RunHandle {
    /// Run id
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Plan id
    #[must_use]
    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    /// Subscribe to progress events
    ///
    /// Every event published so far is replayed first, so a late
    /// subscriber still sees the whole run.
    #[must_use]
    pub fn subscribe(&self) -> ProgressSubscription {
        self.progress.subscribe()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run's cancellation token
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The run's context store
    #[must_use]
    pub fn context(&self) -> Arc<ContextStore> {
        Arc::clone(&self.store)
    }

    /// Wait for the run to finish
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvariantViolation`] if the scheduler got
    /// stuck, or [`EngineError::Join`] if the coordinator task died
    pub async fn wait(self) -> Result<ExecutionReport, EngineError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(EngineError::Join(err.to_string())),
        }
    }
}

/// What woke the coordinator
enum Wake {
    Outcome(StepOutcome),
    Tick(ProgressTick),
    Cancel,
    GraceElapsed,
    Sweep,
    Closed,
}

/// Owns the run state for the lifetime of one run
struct Coordinator {
    plan: Arc<ExecutionPlan>,
    scheduler: Scheduler,
    executor: StepExecutor,
    progress: ProgressChannel,
    store: Arc<ContextStore>,
    metrics: RunMetrics,
    dispatched_at: Vec<Option<Instant>>,
    grace: Duration,
    grace_deadline: Option<Instant>,
    run_id: RunId,
}

impl Coordinator {
    async fn run(
        mut self,
        channels: StepChannels,
        cancel: CancellationToken,
        sweep: Option<Duration>,
    ) -> Result<ExecutionReport, EngineError> {
        let StepChannels {
            mut outcomes,
            mut ticks,
        } = channels;
        let mut sweeper: Option<Interval> = sweep.map(|period| {
            tokio::time::interval_at(Instant::now() + period, period)
        });
        let started = Instant::now();

        info!(steps = self.plan.len(), max_parallel = self.scheduler.max_parallel(), "run started");
        self.publish(None, ProgressKind::PlanStarted {
            total_steps: self.plan.len(),
        });

        loop {
            if cancel.is_cancelled() && !self.scheduler.is_cancelled() {
                self.begin_cancel();
            }
            self.dispatch_ready()?;

            match self.scheduler.decide() {
                ScheduleDecision::Complete => break,
                ScheduleDecision::Stalled { pending } => {
                    return Err(EngineError::InvariantViolation {
                        pending,
                        detail: "no step is ready or running".to_string(),
                    });
                }
                ScheduleDecision::Wait | ScheduleDecision::Dispatch(_) => {}
            }

            let deadline = self.grace_deadline;
            let grace_elapsed = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending().await,
                }
            };
            let sweep_due = async {
                match sweeper.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => pending().await,
                }
            };

            let wake = tokio::select! {
                Some(outcome) = outcomes.recv() => Wake::Outcome(outcome),
                Some(tick) = ticks.recv() => Wake::Tick(tick),
                () = cancel.cancelled(), if !self.scheduler.is_cancelled() => Wake::Cancel,
                () = grace_elapsed => Wake::GraceElapsed,
                () = sweep_due => Wake::Sweep,
                else => Wake::Closed,
            };

            match wake {
                Wake::Outcome(outcome) => {
                    // Ticks sent before the tool returned belong before its terminal event
                    while let Ok(tick) = ticks.try_recv() {
                        self.handle_tick(tick);
                    }
                    self.handle_outcome(outcome)?;
                }
                Wake::Tick(tick) => self.handle_tick(tick),
                Wake::Cancel => self.begin_cancel(),
                Wake::GraceElapsed => self.expire_grace()?,
                Wake::Sweep => {
                    self.store.sweep_expired();
                }
                Wake::Closed => {
                    return Err(EngineError::InvariantViolation {
                        pending: self.scheduler.non_terminal(),
                        detail: "step channels closed".to_string(),
                    });
                }
            }
        }

        Ok(self.finish(started.elapsed()))
    }

    fn publish(&mut self, step_id: Option<StepId>, kind: ProgressKind) {
        if self.progress.publish(step_id, kind).is_some() {
            self.metrics.record_event();
        }
    }

    fn step_id(&self, idx: usize) -> StepId {
        self.plan.step(idx).id.clone()
    }

    fn invariant(&self, err: ScheduleError) -> EngineError {
        EngineError::from_schedule(err, self.scheduler.non_terminal())
    }

    fn dispatch_ready(&mut self) -> Result<(), EngineError> {
        while let ScheduleDecision::Dispatch(idx) = self.scheduler.decide() {
            self.scheduler.mark_running(idx).map_err(|err| self.invariant(err))?;
            self.metrics.record_dispatch(self.scheduler.running());
            self.dispatched_at[idx] = Some(Instant::now());

            let step = self.plan.step(idx);
            debug!(step = %step.id, tool = %step.tool_id, "step started");
            let kind = ProgressKind::StepStarted {
                tool: step.tool_id.to_string(),
            };
            self.publish(Some(self.step_id(idx)), kind);
            self.executor.dispatch(idx);
        }
        Ok(())
    }

    fn handle_tick(&mut self, tick: ProgressTick) {
        let Some(idx) = self.plan.index_of(&tick.step_id) else {
            return;
        };
        // Ticks racing a terminal transition are dropped
        if self.scheduler.status(idx) == StepStatus::Running {
            self.metrics.record_tick();
            self.publish(Some(tick.step_id), ProgressKind::StepProgress {
                percent: tick.percent,
            });
        }
    }

    fn handle_outcome(&mut self, outcome: StepOutcome) -> Result<(), EngineError> {
        let StepOutcome {
            index,
            result,
            duration,
        } = outcome;
        let step_id = self.step_id(index);

        if self.scheduler.status(index) != StepStatus::Running {
            warn!(step = %step_id, "discarding result that arrived after the grace period");
            return Ok(());
        }
        let duration_ms = millis(duration);

        match result {
            Ok(output) => match self.write_context(index, &output) {
                Ok(produced_keys) => {
                    self.complete(index, StepResult::completed(output.value, duration_ms, produced_keys))
                }
                Err(err) => {
                    let error = StepError::new(StepErrorKind::ContextWrite, err.to_string());
                    self.fail(index, StepResult::failed(error, duration_ms))
                }
            },
            Err(err) if err.is_cancellation() || self.scheduler.is_cancelled() => {
                self.cancel_running(index, StepResult::cancelled(Some(StepError::from(&err)), duration_ms))
            }
            Err(err) => {
                log_tool_error(&step_id, &err);
                self.fail(index, StepResult::failed(StepError::from(err), duration_ms))
            }
        }
    }

    /// Store a completed step's declared keys, all or none
    fn write_context(&self, idx: usize, output: &ToolOutput) -> Result<Vec<String>, ContextError> {
        let step = self.plan.step(idx);
        let produced = output.resolve_produced(&step.produced_context_keys);
        let outcomes = self.store.put_many(produced, step.id.clone(), None)?;

        let mut written = Vec::with_capacity(outcomes.len());
        for (key, outcome) in outcomes {
            if let PutOutcome::Replaced { previous_producer } = outcome {
                if previous_producer != step.id {
                    warn!(
                        key = %key,
                        previous = %previous_producer,
                        step = %step.id,
                        "context key overwritten by a later writer"
                    );
                }
            }
            written.push(key);
        }
        Ok(written)
    }

    fn complete(&mut self, idx: usize, result: StepResult) -> Result<(), EngineError> {
        let kind = ProgressKind::StepCompleted {
            duration_ms: result.duration_ms,
            produced_keys: result.produced_keys.clone(),
        };
        let ready = self.scheduler.mark_completed(idx, result).map_err(|err| self.invariant(err))?;
        self.metrics.record_terminal(StepStatus::Completed);
        debug!(step = %self.step_id(idx), newly_ready = ready.len(), "step completed");
        self.publish(Some(self.step_id(idx)), kind);
        Ok(())
    }

    fn fail(&mut self, idx: usize, result: StepResult) -> Result<(), EngineError> {
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| StepError::new(StepErrorKind::ToolExecutionError, "unknown failure"));
        let skipped = self.scheduler.mark_failed(idx, result).map_err(|err| self.invariant(err))?;
        self.metrics.record_terminal(StepStatus::Failed);
        debug!(step = %self.step_id(idx), skipped = skipped.len(), "step failed");
        self.publish(Some(self.step_id(idx)), ProgressKind::StepFailed { error });

        for dep in skipped {
            let reason = self.scheduler.state().results[dep]
                .as_ref()
                .and_then(|result| result.skip_reason.clone());
            if let Some(reason) = reason {
                self.metrics.record_terminal(StepStatus::Skipped);
                debug!(step = %self.step_id(dep), %reason, "step skipped");
                self.publish(Some(self.step_id(dep)), ProgressKind::StepSkipped { reason });
            }
        }
        Ok(())
    }

    fn cancel_running(&mut self, idx: usize, result: StepResult) -> Result<(), EngineError> {
        self.scheduler.mark_cancelled(idx, result).map_err(|err| self.invariant(err))?;
        self.metrics.record_terminal(StepStatus::Cancelled);
        debug!(step = %self.step_id(idx), "step cancelled");
        self.publish(Some(self.step_id(idx)), ProgressKind::StepCancelled);
        Ok(())
    }

    /// Stop dispatching, cancel everything not yet running and start the
    /// grace period for the rest
    fn begin_cancel(&mut self) {
        let cancelled = self.scheduler.cancel_pending();
        info!(
            running = self.scheduler.running(),
            cancelled = cancelled.len(),
            grace_ms = millis(self.grace),
            "cancellation requested"
        );
        for idx in cancelled {
            self.metrics.record_terminal(StepStatus::Cancelled);
            self.publish(Some(self.step_id(idx)), ProgressKind::StepCancelled);
        }
        if self.scheduler.running() > 0 {
            self.grace_deadline = Some(Instant::now() + self.grace);
        }
    }

    /// Give up on steps still running when the grace period ends
    fn expire_grace(&mut self) -> Result<(), EngineError> {
        self.grace_deadline = None;
        for idx in self.scheduler.running_steps() {
            let elapsed = self.dispatched_at[idx].map_or(0, |at| millis(at.elapsed()));
            warn!(step = %self.step_id(idx), "grace period elapsed; abandoning step");
            let error = StepError::new(StepErrorKind::Cancelled, "grace period elapsed before the tool returned");
            self.cancel_running(idx, StepResult::cancelled(Some(error), elapsed))?;
        }
        Ok(())
    }

    fn finish(mut self, elapsed: Duration) -> ExecutionReport {
        let status = self.scheduler.run_status();
        let terminal = match status {
            RunStatus::Completed => ProgressKind::PlanCompleted,
            RunStatus::Cancelled => ProgressKind::PlanCancelled,
            _ => ProgressKind::PlanFailed {
                failed: self.scheduler.count(StepStatus::Failed),
                skipped: self.scheduler.count(StepStatus::Skipped),
            },
        };
        self.publish(None, terminal);
        self.progress.close();

        let total_duration_ms = millis(elapsed);
        info!(
            status = %status,
            completed = self.metrics.completed,
            failed = self.metrics.failed,
            skipped = self.metrics.skipped,
            cancelled = self.metrics.cancelled,
            duration_ms = total_duration_ms,
            "run finished"
        );

        let plan = Arc::clone(&self.plan);
        let state = self.scheduler.into_state();
        let steps = plan
            .iter()
            .zip(state.results)
            .map(|((_, step), result)| StepReport {
                step_id: step.id.clone(),
                tool: step.tool_id.to_string(),
                result: result.unwrap_or_else(|| StepResult::cancelled(None, 0)),
            })
            .collect();

        ExecutionReport {
            plan_id: plan.id().clone(),
            run_id: self.run_id,
            status,
            steps,
            total_duration_ms,
            metrics: self.metrics,
        }
    }
}

fn log_tool_error(step: &StepId, err: &ToolError) {
    match err {
        ToolError::Panicked { message, .. } => warn!(step = %step, panic = %message, "tool panicked"),
        other => debug!(step = %step, error = %other, "tool failed"),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
