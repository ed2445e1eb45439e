//! Progress callbacks for worker stages.

use variantflow_shared::{TaskId, TaskProgress};

/// Phase markers written to the task document while it runs.
pub mod phase {
    pub const LOADING_VARIANTS: &str = "loading_variants";
    pub const ANNOTATING: &str = "annotating";
    pub const KNOWLEDGE_RETRIEVAL: &str = "knowledge_retrieval";
    pub const CLASSIFICATION: &str = "classification";
    pub const CLINICAL_ASSESSMENT: &str = "clinical_assessment";
    pub const COMPLETE: &str = "complete";
}

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a task enters a new phase.
    fn phase(&self, task_id: &TaskId, name: &str);
    /// Called at every annotation checkpoint.
    fn checkpoint(&self, task_id: &TaskId, progress: &TaskProgress);
    /// Called once the task reaches a terminal status.
    fn finished(&self, task_id: &TaskId, succeeded: bool);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _task_id: &TaskId, _name: &str) {}
    fn checkpoint(&self, _task_id: &TaskId, _progress: &TaskProgress) {}
    fn finished(&self, _task_id: &TaskId, _succeeded: bool) {}
}
