//! weft plan model
//!
//! Step definitions and the validated [`ExecutionPlan`] DAG: uniqueness,
//! dependency resolution and cycle checks happen once at construction,
//! after which the plan answers readiness and reachability queries by
//! integer index.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod step;
pub mod validate;

pub use dag::{ExecutionPlan, DEFAULT_MAX_PARALLEL};
pub use step::Step;
pub use validate::{validate, ValidationError};
