//! Annotation stage: input variants through the effect predictor.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};
use variantflow_annotation::CheckpointSink;
use variantflow_artifacts::{
    ArtifactKey, annotated_variants_filename, decode_variants, encode_variants,
};
use variantflow_shared::{Result, SessionUpdate, Task, TaskId, TaskProgress, TaskUpdate};
use variantflow_storage::TaskStore;

use crate::progress::{ProgressReporter, phase};
use crate::worker::StageOutput;
use crate::PipelineContext;

/// Writes runner checkpoints to the task document.
struct TaskCheckpoints<'a> {
    store: &'a dyn TaskStore,
    task_id: &'a TaskId,
    progress: &'a dyn ProgressReporter,
}

#[async_trait]
impl CheckpointSink for TaskCheckpoints<'_> {
    async fn checkpoint(&self, progress: TaskProgress) -> Result<()> {
        self.progress.checkpoint(self.task_id, &progress);
        self.store
            .transition(self.task_id, TaskUpdate::progress(progress))
            .await?;
        Ok(())
    }
}

/// Load the input variants, annotate them, and save the enriched list.
#[instrument(skip_all, fields(task_id = %task.id))]
pub(crate) async fn run_annotation_stage(
    ctx: &PipelineContext,
    task: &Task,
    progress: &dyn ProgressReporter,
) -> Result<StageOutput> {
    let input_key = ArtifactKey::for_task(&task.context, &task.input_artifact);
    let variants = decode_variants(&ctx.artifacts.load(&input_key).await?)?;
    info!(variants = variants.len(), artifact = %input_key, "loaded input variants");

    ctx.store
        .transition(&task.id, TaskUpdate::phase(phase::ANNOTATING))
        .await?;
    progress.phase(&task.id, phase::ANNOTATING);

    let sink = TaskCheckpoints {
        store: ctx.store.as_ref(),
        task_id: &task.id,
        progress,
    };
    let (annotated, stats) = ctx.runner.run(variants, &sink).await?;

    let filename = annotated_variants_filename(&task.id);
    let key = ArtifactKey::for_task(&task.context, &filename);
    let version = ctx.artifacts.save(&key, &encode_variants(&annotated)?).await?;

    info!(
        artifact = %key,
        version,
        total = stats.total_variants,
        matched = stats.matched,
        with_gene = stats.with_gene,
        "saved annotated variants"
    );

    Ok(StageOutput {
        artifact: filename.clone(),
        output: json!({
            "annotated_variants_artifact": filename,
            "total_variants": stats.total_variants,
            "batches": stats.batches,
            "matched_records": stats.matched,
            "unmatched_records": stats.unmatched,
            "skipped_lines": stats.skipped_lines,
            "variants_with_gene": stats.with_gene,
        }),
        session: SessionUpdate::completed(&task.id, task.kind)
            .with_variant_count(stats.total_variants),
    })
}
