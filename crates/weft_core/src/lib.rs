//! weft core types
//!
//! Pure types shared by every weft crate: identifiers, the step and run
//! status model, wall-clock timestamps and the low-level error type.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod status;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{PlanId, RunId, StepId, ToolId};
pub use status::{RunStatus, StepStatus};
pub use time::Timestamp;
