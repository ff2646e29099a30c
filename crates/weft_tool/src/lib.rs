//! weft tool contract
//!
//! The [`Tool`] trait every step is dispatched to, the [`ToolRegistry`]
//! that resolves a step's tool id, the [`ToolAdapter`] that applies
//! timeouts and contains failures, and a handful of builtin tools.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod builtin;
pub mod error;
pub mod registry;
pub mod reporter;
pub mod tool;

pub use adapter::ToolAdapter;
pub use error::ToolError;
pub use registry::{RegistryError, ToolRegistry};
pub use reporter::{ProgressReporter, ProgressTick};
pub use tool::{Tool, ToolCall, ToolOutput};

// Re-exported so tool authors need not depend on these crates directly
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
