//! Synthesis Stage: batched inference over pathogenic findings, merged
//! into one narrative assessment.
//!
//! Up to `max_concurrent` batch calls run at once. Model output is parsed with
//! a multi-strategy JSON recovery chain; when inference is unavailable or
//! nothing usable comes back, a deterministic counting-statistics assessment
//! is returned instead.

pub mod client;
pub mod fallback;
pub mod findings;
pub mod json_recovery;
pub mod prompts;
pub mod synthesizer;

pub use client::{ChatCompletionsClient, InferenceClient};
pub use fallback::{fallback_assessment, no_findings_assessment};
pub use findings::{FindingStats, PathogenicFinding, Tally, collect_findings};
pub use json_recovery::{JsonObject, extract_json};
pub use synthesizer::{Assessment, AssessmentOrigin, BatchExtract, MergedExtracts, Synthesizer};
