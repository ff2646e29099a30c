//! Progress reporting from inside a tool.

use tokio::sync::mpsc;
use weft_core::StepId;

/// A progress update sent by a running tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTick {
    /// Step that reported
    pub step_id: StepId,
    /// Completion estimate, 0..=100
    pub percent: u8,
}

/// Handle a tool uses to report progress
///
/// Reporting never blocks and never fails: ticks go to the run's
/// coordinator over a bounded channel, and a tick that finds the channel
/// full or closed is dropped. The coordinator turns ticks into progress
/// events while the step is still running and discards them otherwise.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    step_id: StepId,
    sender: Option<mpsc::Sender<ProgressTick>>,
}

impl ProgressReporter {
    /// Create a reporter that forwards ticks to `sender`
    #[must_use]
    pub fn new(step_id: StepId, sender: mpsc::Sender<ProgressTick>) -> Self {
        Self {
            step_id,
            sender: Some(sender),
        }
    }

    /// A reporter that discards every tick
    #[must_use]
    pub fn noop() -> Self {
        Self {
            step_id: StepId::new(""),
            sender: None,
        }
    }

    /// Step this reporter belongs to
    #[must_use]
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// Report a completion percentage, clamped to 100
    pub fn report(&self, percent: u8) {
        if let Some(sender) = &self.sender {
            // Full or closed: the tick is dropped
            let _ = sender.try_send(ProgressTick {
                step_id: self.step_id.clone(),
                percent: percent.min(100),
            });
        }
    }

    /// Report `done` out of `total` units of work
    pub fn report_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            self.report(100);
            return;
        }
        let percent = done.min(total).saturating_mul(100) / total;
        self.report(u8::try_from(percent).unwrap_or(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_clamps() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ProgressReporter::new(StepId::new("a"), tx);

        reporter.report(40);
        reporter.report(250);

        assert_eq!(rx.try_recv().unwrap().percent, 40);
        let tick = rx.try_recv().unwrap();
        assert_eq!(tick.percent, 100);
        assert_eq!(tick.step_id, StepId::new("a"));
    }

    #[test]
    fn test_report_fraction() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ProgressReporter::new(StepId::new("a"), tx);

        reporter.report_fraction(1, 3);
        reporter.report_fraction(5, 3);
        reporter.report_fraction(0, 0);

        assert_eq!(rx.try_recv().unwrap().percent, 33);
        assert_eq!(rx.try_recv().unwrap().percent, 100);
        assert_eq!(rx.try_recv().unwrap().percent, 100);
    }

    #[test]
    fn test_report_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        ProgressReporter::new(StepId::new("a"), tx).report(10);
        ProgressReporter::noop().report(10);
    }

    #[test]
    fn test_full_channel_drops_ticks() {
        let (tx, mut rx) = mpsc::channel(2);
        let reporter = ProgressReporter::new(StepId::new("a"), tx);

        for percent in 0..50 {
            reporter.report(percent);
        }

        assert_eq!(rx.try_recv().unwrap().percent, 0);
        assert_eq!(rx.try_recv().unwrap().percent, 1);
        assert!(rx.try_recv().is_err());

        reporter.report(90);
        assert_eq!(rx.try_recv().unwrap().percent, 90);
    }
}
