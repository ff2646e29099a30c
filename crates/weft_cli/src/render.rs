//! Terminal rendering of live progress and final reports.

use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use weft_core::{RunStatus, StepStatus};
use weft_progress::{AuditSummary, ProgressEvent, ProgressKind};
use weft_runtime::{ExecutionReport, StepReport};

const BAR_TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}";

/// Progress bar fed from a run's event stream
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Bar over `total` steps
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Apply one event
    pub fn observe(&self, event: &ProgressEvent) {
        if let Some(line) = event_line(event) {
            self.bar.println(line);
        }
        match &event.kind {
            ProgressKind::StepProgress { percent } => {
                self.bar.set_message(format!("{} {}%", step_label(event), percent));
            }
            kind if kind.is_step_terminal() => self.bar.inc(1),
            kind if kind.is_plan_terminal() => self.bar.finish_and_clear(),
            _ => {}
        }
    }

    /// Remove the bar if the stream ended early
    pub fn abandon(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

fn step_label(event: &ProgressEvent) -> &str {
    event.step_id.as_ref().map_or("-", |id| id.as_str())
}

/// One human-readable line per step lifecycle event
///
/// Progress ticks and plan-level events produce no line.
pub fn event_line(event: &ProgressEvent) -> Option<String> {
    let step = step_label(event);
    let line = match &event.kind {
        ProgressKind::StepStarted { tool } => {
            format!("{} {} ({})", style("start ").cyan(), step, tool)
        }
        ProgressKind::StepCompleted {
            duration_ms,
            produced_keys,
        } => {
            let mut line = format!("{} {} in {}ms", style("done  ").green(), step, duration_ms);
            if !produced_keys.is_empty() {
                line.push_str(&format!(" -> {}", produced_keys.join(", ")));
            }
            line
        }
        ProgressKind::StepFailed { error } => {
            format!("{} {}: {}", style("fail  ").red().bold(), step, error)
        }
        ProgressKind::StepSkipped { reason } => {
            format!("{} {}: {}", style("skip  ").yellow(), step, reason)
        }
        ProgressKind::StepCancelled => format!("{} {}", style("cancel").dim(), step),
        _ => return None,
    };
    Some(line)
}

fn status_cell(status: StepStatus) -> StyledObject<String> {
    let cell = style(format!("{:<9}", status.as_str()));
    match status {
        StepStatus::Completed => cell.green(),
        StepStatus::Failed => cell.red(),
        StepStatus::Skipped => cell.yellow(),
        StepStatus::Cancelled => cell.dim(),
        StepStatus::Pending | StepStatus::Ready | StepStatus::Running => cell,
    }
}

fn run_status_label(status: RunStatus) -> StyledObject<&'static str> {
    let label = style(status.as_str()).bold();
    match status {
        RunStatus::Completed => label.green(),
        RunStatus::Failed => label.red(),
        _ => label.yellow(),
    }
}

fn detail(step: &StepReport) -> String {
    if let Some(error) = &step.result.error {
        error.to_string()
    } else if let Some(reason) = &step.result.skip_reason {
        reason.to_string()
    } else if !step.result.produced_keys.is_empty() {
        format!("-> {}", step.result.produced_keys.join(", "))
    } else {
        String::new()
    }
}

/// Report as an aligned table with a summary line
pub fn report_table(report: &ExecutionReport) -> String {
    let width = report
        .steps
        .iter()
        .map(|s| s.step_id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("STEP".len());

    let mut lines = vec![format!(
        "{:<width$}  {:<9}  {:>8}  DETAIL",
        "STEP",
        "STATUS",
        "TIME",
        width = width
    )];
    for step in &report.steps {
        lines.push(format!(
            "{:<width$}  {}  {:>6}ms  {}",
            step.step_id.as_str(),
            status_cell(step.status()),
            step.result.duration_ms,
            detail(step),
            width = width
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "{} {} in {}ms: {} completed, {} failed, {} skipped, {} cancelled (peak parallelism {})",
        report.plan_id,
        run_status_label(report.status),
        report.total_duration_ms,
        report.count(StepStatus::Completed),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Cancelled),
        report.metrics.peak_parallelism,
    ));
    lines.join("\n")
}

/// Summary line for an audited event log
pub fn audit_line(summary: &AuditSummary) -> String {
    format!(
        "{} {} events: {} completed, {} failed, {} skipped, {} cancelled, {} progress ticks",
        style("ok").green().bold(),
        summary.events,
        summary.completed,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        summary.progress_ticks,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::{PlanId, RunId, StepId, Timestamp};
    use weft_progress::{SkipReason, StepError, StepErrorKind};
    use weft_runtime::{RunMetrics, StepResult};

    fn event(step: Option<&str>, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            seq: 0,
            plan_id: PlanId::new("p"),
            run_id: RunId::from_bytes([0; 16]),
            step_id: step.map(StepId::new),
            timestamp: Timestamp::now(),
            kind,
        }
    }

    #[test]
    fn test_event_lines() {
        console::set_colors_enabled(false);

        let started = event(Some("fetch"), ProgressKind::StepStarted {
            tool: "echo".to_string(),
        });
        assert_eq!(event_line(&started).unwrap(), "start  fetch (echo)");

        let done = event(Some("fetch"), ProgressKind::StepCompleted {
            duration_ms: 12,
            produced_keys: vec!["doc".to_string()],
        });
        assert_eq!(event_line(&done).unwrap(), "done   fetch in 12ms -> doc");

        let failed = event(Some("fetch"), ProgressKind::StepFailed {
            error: StepError::new(StepErrorKind::ToolTimeout, "took too long"),
        });
        assert!(event_line(&failed).unwrap().starts_with("fail   fetch: "));

        let tick = event(Some("fetch"), ProgressKind::StepProgress { percent: 50 });
        assert!(event_line(&tick).is_none());
        assert!(event_line(&event(None, ProgressKind::PlanCompleted)).is_none());
    }

    #[test]
    fn test_report_table() {
        console::set_colors_enabled(false);

        let report = ExecutionReport {
            plan_id: PlanId::new("demo"),
            run_id: RunId::from_bytes([0; 16]),
            status: RunStatus::Failed,
            steps: vec![
                StepReport {
                    step_id: StepId::new("fetch"),
                    tool: "echo".to_string(),
                    result: StepResult::completed(json!(1), 7, vec!["doc".to_string()]),
                },
                StepReport {
                    step_id: StepId::new("summarize"),
                    tool: "concat".to_string(),
                    result: StepResult::skipped(SkipReason::DependencyFailed {
                        dependency: StepId::new("fetch"),
                    }),
                },
            ],
            total_duration_ms: 9,
            metrics: RunMetrics::new(),
        };

        let table = report_table(&report);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("STEP       STATUS"));
        assert!(lines[1].starts_with("fetch      completed"));
        assert!(lines[1].ends_with("-> doc"));
        assert!(lines[2].starts_with("summarize  skipped"));
        assert!(lines[4].starts_with("demo failed in 9ms: 1 completed, 0 failed, 1 skipped"));
    }

    #[test]
    fn test_audit_line() {
        console::set_colors_enabled(false);
        let summary = AuditSummary {
            events: 6,
            completed: 2,
            ..AuditSummary::default()
        };
        assert!(audit_line(&summary).starts_with("ok 6 events: 2 completed"));
    }
}
