//! Multi-subscriber progress channel.
//!
//! Live fan-out runs over a `tokio::sync::broadcast` channel. Every
//! published event is also kept in a history so a subscriber that joins
//! mid-run still sees the whole stream from `seq` 0. The history snapshot
//! and the live receiver are taken under the same lock as `publish`, so a
//! subscriber never sees a duplicate or a gap at the seam.

use crate::event::{ProgressEvent, ProgressKind};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use weft_core::{PlanId, RunId, StepId, Timestamp};

/// Default live buffer per subscriber
pub const DEFAULT_BUFFER: usize = 1024;

struct ChannelState {
    /// Every event published so far
    history: Vec<ProgressEvent>,
    /// Live sender, dropped on close
    sender: Option<broadcast::Sender<ProgressEvent>>,
}

struct ChannelInner {
    plan_id: PlanId,
    run_id: RunId,
    state: Mutex<ChannelState>,
}

/// Ordered event stream for one run
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct ProgressChannel {
    inner: Arc<ChannelInner>,
}

impl ProgressChannel {
    /// Create a channel whose subscribers buffer up to `buffer` live events
    #[must_use]
    pub fn new(plan_id: PlanId, run_id: RunId, buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(ChannelInner {
                plan_id,
                run_id,
                state: Mutex::new(ChannelState {
                    history: Vec::new(),
                    sender: Some(sender),
                }),
            }),
        }
    }

    /// Plan the channel reports on
    #[must_use]
    pub fn plan_id(&self) -> &PlanId {
        &self.inner.plan_id
    }

    /// Run the channel reports on
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// Publish an event, returning its sequence number
    ///
    /// Never blocks on subscribers and succeeds with zero subscribers.
    /// Returns `None` once the channel is closed.
    pub fn publish(&self, step_id: Option<StepId>, kind: ProgressKind) -> Option<u64> {
        let mut state = self.inner.state.lock();
        let Some(sender) = state.sender.as_ref() else {
            tracing::warn!(event = kind.name(), "progress event published after close");
            return None;
        };

        let seq = state.history.len() as u64;
        let event = ProgressEvent {
            seq,
            plan_id: self.inner.plan_id.clone(),
            run_id: self.inner.run_id,
            step_id,
            timestamp: Timestamp::now(),
            kind,
        };

        // No live receivers is fine; the history still records the event.
        let _ = sender.send(event.clone());
        state.history.push(event);
        Some(seq)
    }

    /// Subscribe from the start of the stream
    #[must_use]
    pub fn subscribe(&self) -> ProgressSubscription {
        let state = self.inner.state.lock();
        ProgressSubscription {
            backlog: state.history.iter().cloned().collect(),
            receiver: state.sender.as_ref().map(broadcast::Sender::subscribe),
            lost: 0,
        }
    }

    /// End the stream; subscribers drain what is buffered, then see the end
    pub fn close(&self) {
        self.inner.state.lock().sender = None;
    }

    /// Whether the channel has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().sender.is_none()
    }

    /// Copy of every event published so far
    #[must_use]
    pub fn history(&self) -> Vec<ProgressEvent> {
        self.inner.state.lock().history.clone()
    }

    /// Number of events published so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().history.len()
    }

    /// Whether nothing has been published yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .sender
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl std::fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressChannel")
            .field("plan_id", &self.inner.plan_id)
            .field("run_id", &self.inner.run_id)
            .field("events", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One subscriber's view of a progress channel
pub struct ProgressSubscription {
    /// History captured at subscribe time
    backlog: VecDeque<ProgressEvent>,
    /// Live receiver, absent if subscribed after close or once drained
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    /// Events dropped because this subscriber fell behind
    lost: u64,
}

impl ProgressSubscription {
    /// Next event, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.lost += skipped;
                    tracing::warn!(skipped, "progress subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Next event if one is available without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.lost += skipped;
                    tracing::warn!(skipped, "progress subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Events this subscriber lost by lagging
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Collect every remaining event until the stream ends
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    /// Adapt into a `futures::Stream`
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
