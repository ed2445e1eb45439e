//! Worker orchestration for variantflow.
//!
//! This crate ties the annotation runner, knowledge retrieval, the rule
//! engine and synthesis into the two task stages, and drives tasks through
//! the durable store from submission to a terminal status.

mod annotate;
pub mod context;
pub mod dispatch;
pub mod progress;
mod report;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::PipelineContext;
pub use dispatch::{Dispatcher, InProcessDispatcher, submit, submit_annotation, submit_report};
pub use progress::{ProgressReporter, SilentProgress, phase};
pub use worker::{WorkerOutcome, execute};
