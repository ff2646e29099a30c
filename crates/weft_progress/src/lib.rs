//! weft progress stream
//!
//! The [`ProgressEvent`] model, the multi-subscriber [`ProgressChannel`]
//! a run publishes into, and a [`LifecycleAuditor`] that checks a recorded
//! stream obeys the per-step and per-plan ordering rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod channel;
pub mod event;

pub use audit::{AuditSummary, LifecycleAuditor, LifecycleError};
pub use channel::{ProgressChannel, ProgressSubscription, DEFAULT_BUFFER};
pub use event::{ProgressEvent, ProgressKind, SkipReason, StepError, StepErrorKind};
