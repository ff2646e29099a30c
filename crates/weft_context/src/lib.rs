//! weft context store
//!
//! Keyed storage through which one step's output becomes another step's
//! input. Entries are size-bounded, optionally expire, and remember which
//! step produced them. Tools never see the store itself, only a
//! [`ContextSlice`] holding the keys they declared.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod slice;
pub mod store;

pub use entry::ContextEntry;
pub use slice::ContextSlice;
pub use store::{ContextConfig, ContextError, ContextStats, ContextStore, PutOutcome};
