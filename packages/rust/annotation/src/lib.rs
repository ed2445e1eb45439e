//! Annotation Runner: batches variants through an external variant effect
//! predictor and merges its per-position output back into the variants.
//!
//! The tool speaks a minimal VCF on stdin and one JSON object per line on
//! stdout. See [`tool::VepCommand`] for the bundled implementation.

pub mod input;
pub mod output;
pub mod runner;
pub mod tool;

pub use input::{build_batch_input, position_key, variant_key};
pub use output::{ParsedOutput, ToolHit, parse_tool_output};
pub use runner::{AnnotationRunner, AnnotationStats, CheckpointSink, NoCheckpoints};
pub use tool::{AnnotationTool, VepCommand};
