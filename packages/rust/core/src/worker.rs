//! Worker entry point: run one task id to a terminal status.

use tracing::{error, info, instrument, warn};
use variantflow_shared::{
    Result, SessionUpdate, Task, TaskContext, TaskId, TaskKind, TaskStatus, TaskUpdate,
};

use crate::PipelineContext;
use crate::annotate::run_annotation_stage;
use crate::progress::{ProgressReporter, phase};
use crate::report::run_report_stage;

/// What a stage hands back for the completing transition.
#[derive(Debug, Clone)]
pub(crate) struct StageOutput {
    pub artifact: String,
    pub output: serde_json::Value,
    /// Folded into the session record once the task is completed.
    pub session: SessionUpdate,
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed,
    /// The task was recorded `failed` with this message.
    Failed(String),
    /// The task was already terminal; nothing ran.
    Skipped(TaskStatus),
}

/// Execute the stage for `task_id`.
///
/// A task that is already terminal is left untouched, so redelivery of the
/// same id is a no-op. Stage errors are recorded on the task as `failed`;
/// the returned `Err` is reserved for failures to read or write the task
/// document itself.
#[instrument(skip_all, fields(task_id = %task_id))]
pub async fn execute(
    ctx: &PipelineContext,
    task_id: &TaskId,
    progress: &dyn ProgressReporter,
) -> Result<WorkerOutcome> {
    let task = ctx.store.read(task_id).await?;

    if task.status.is_terminal() {
        info!(status = %task.status, "task already terminal, skipping");
        return Ok(WorkerOutcome::Skipped(task.status));
    }

    if let Err(e) = task.context.validate() {
        return fail(ctx, &task, progress, e.to_string()).await;
    }

    let task = ctx
        .store
        .transition(
            task_id,
            TaskUpdate::status(TaskStatus::Running).with_phase(phase::LOADING_VARIANTS),
        )
        .await?;
    progress.phase(task_id, phase::LOADING_VARIANTS);
    info!(kind = %task.kind, "task running");

    let result = match task.kind {
        TaskKind::Annotation => run_annotation_stage(ctx, &task, progress).await,
        TaskKind::Report => run_report_stage(ctx, &task, progress).await,
    };

    match result {
        Ok(out) => {
            let completed = ctx
                .store
                .transition(
                    task_id,
                    TaskUpdate::status(TaskStatus::Completed)
                        .with_phase(phase::COMPLETE)
                        .with_output_artifact(out.artifact.clone())
                        .with_output(out.output),
                )
                .await;
            if let Err(e) = completed {
                warn!(
                    artifact = %out.artifact,
                    error = %e,
                    "output artifact saved but task could not be completed"
                );
                return Err(e);
            }
            record_session(ctx, &task.context, out.session).await;
            progress.phase(task_id, phase::COMPLETE);
            progress.finished(task_id, true);
            info!("task completed");
            Ok(WorkerOutcome::Completed)
        }
        Err(e) => fail(ctx, &task, progress, e.to_string()).await,
    }
}

async fn fail(
    ctx: &PipelineContext,
    task: &Task,
    progress: &dyn ProgressReporter,
    message: String,
) -> Result<WorkerOutcome> {
    error!(error = %message, "task failed");
    if let Err(e) = ctx
        .store
        .transition(
            &task.id,
            TaskUpdate::status(TaskStatus::Failed).with_error(message.clone()),
        )
        .await
    {
        warn!(error = %e, "could not record task failure");
        return Err(e);
    }
    // A context without a session id has no record to update.
    if task.context.validate().is_ok() {
        let update = SessionUpdate::failed(&task.id, task.kind, message.clone());
        record_session(ctx, &task.context, update).await;
    }
    progress.finished(&task.id, false);
    Ok(WorkerOutcome::Failed(message))
}

/// Session metadata is informational; a failed write never changes the
/// task outcome.
async fn record_session(ctx: &PipelineContext, context: &TaskContext, update: SessionUpdate) {
    if let Err(e) = ctx.store.record_session(context, update).await {
        warn!(session_id = %context.session_id, error = %e, "could not update session metadata");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::test_support::{Harness, RecordingProgress, task_context, variants};
    use variantflow_artifacts::{
        ArtifactKey, OutputArtifact, annotated_variants_filename, annotations_filename,
    };
    use std::path::PathBuf;
    use std::sync::Mutex;
    use variantflow_shared::{AnnotationSource, ReportOutput, Scope, SessionStatus, TaskProgress};
    use variantflow_storage::TaskStore;

    /// Notes, at every phase change, whether the report bundle is on disk.
    struct BundleWatch {
        session_dir: PathBuf,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl ProgressReporter for BundleWatch {
        fn phase(&self, task_id: &TaskId, name: &str) {
            let exists = self.session_dir.join(annotations_filename(task_id)).exists();
            self.seen.lock().unwrap().push((name.to_string(), exists));
        }

        fn checkpoint(&self, _task_id: &TaskId, _progress: &TaskProgress) {}

        fn finished(&self, _task_id: &TaskId, _succeeded: bool) {}
    }

    async fn create(h: &Harness, kind: TaskKind, scope: Scope, input: &str) -> TaskId {
        let id = TaskId::new();
        h.storage
            .create(&id, kind, &task_context(scope), input)
            .await
            .unwrap();
        id
    }

    async fn annotate(h: &Harness, n: u64, scope: Scope) -> String {
        h.put_variants(&task_context(scope), "variants.json", &variants(n))
            .await;
        let id = create(h, TaskKind::Annotation, scope, "variants.json").await;
        let outcome = execute(&h.ctx, &id, &RecordingProgress::default())
            .await
            .unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed);
        h.storage.read(&id).await.unwrap().output_artifact.unwrap()
    }

    #[tokio::test]
    async fn annotation_task_runs_to_completion() {
        let h = Harness::new().await;
        let ctx = task_context(Scope::Restricted);
        h.put_variants(&ctx, "variants.json", &variants(20)).await;
        let id = create(&h, TaskKind::Annotation, Scope::Restricted, "variants.json").await;

        let progress = RecordingProgress::default();
        let outcome = execute(&h.ctx, &id, &progress).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed);

        let task = h.storage.read(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.phase.as_deref(), Some(phase::COMPLETE));
        assert_eq!(
            task.output_artifact.as_deref(),
            Some(annotated_variants_filename(&id).as_str())
        );
        let output = task.output.unwrap();
        assert_eq!(output["total_variants"], 20);
        assert_eq!(output["matched_records"], 20);
        assert_eq!(output["variants_with_gene"], 20);
        assert_eq!(task.progress.unwrap().progress_pct, 100.0);

        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![phase::LOADING_VARIANTS, phase::ANNOTATING, phase::COMPLETE]
        );
        assert_eq!(progress.checkpoints.lock().unwrap().len(), 1);
        assert_eq!(*progress.finished.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn terminal_task_is_not_rerun() {
        let h = Harness::new().await;
        let ctx = task_context(Scope::Restricted);
        h.put_variants(&ctx, "variants.json", &variants(5)).await;
        let id = create(&h, TaskKind::Annotation, Scope::Restricted, "variants.json").await;

        execute(&h.ctx, &id, &SilentProgress).await.unwrap();
        let first = h.storage.read(&id).await.unwrap();
        assert_eq!(*h.tool.calls.lock().unwrap(), 1);

        let again = execute(&h.ctx, &id, &SilentProgress).await.unwrap();
        assert_eq!(again, WorkerOutcome::Skipped(TaskStatus::Completed));
        assert_eq!(*h.tool.calls.lock().unwrap(), 1);
        assert_eq!(h.storage.read(&id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn malformed_input_fails_task() {
        let h = Harness::new().await;
        let ctx = task_context(Scope::Restricted);
        h.put(&ctx, "variants.json", b"{ not a variant list").await;
        let id = create(&h, TaskKind::Annotation, Scope::Restricted, "variants.json").await;

        let progress = RecordingProgress::default();
        let outcome = execute(&h.ctx, &id, &progress).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Failed(_)));

        let task = h.storage.read(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.is_some());
        assert!(task.output_artifact.is_none());
        assert_eq!(*progress.finished.lock().unwrap(), Some(false));
        assert_eq!(*h.tool.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_input_artifact_fails_task() {
        let h = Harness::new().await;
        let id = create(&h, TaskKind::Report, Scope::Restricted, "absent.json").await;

        let outcome = execute(&h.ctx, &id, &SilentProgress).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Failed(_)));
        assert_eq!(
            h.storage.read(&id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let h = Harness::new().await;
        let err = execute(&h.ctx, &TaskId::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, variantflow_shared::VariantFlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn restricted_report_considers_only_panel_variants() {
        let h = Harness::new().await;
        let annotated = annotate(&h, 10_000, Scope::Restricted).await;
        assert_eq!(*h.tool.calls.lock().unwrap(), 20);

        let id = create(&h, TaskKind::Report, Scope::Restricted, &annotated).await;
        let progress = RecordingProgress::default();
        let outcome = execute(&h.ctx, &id, &progress).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed);

        assert_eq!(*h.frequencies.queried.lock().unwrap(), 12);
        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![
                phase::LOADING_VARIANTS,
                phase::KNOWLEDGE_RETRIEVAL,
                phase::CLASSIFICATION,
                phase::CLINICAL_ASSESSMENT,
                phase::COMPLETE,
            ]
        );

        let task = h.storage.read(&id).await.unwrap();
        assert_eq!(
            task.output_artifact.as_deref(),
            Some(annotations_filename(&id).as_str())
        );
        let report: ReportOutput = serde_json::from_value(task.output.unwrap()).unwrap();
        assert_eq!(report.total_variants, 10_000);
        assert_eq!(report.total_variants_considered, 12);
        assert_eq!(report.pathogenic_count, 12);
        assert_eq!(report.total_annotations, 12);
        assert_eq!(report.genes_reported, Some(3));
        assert_eq!(report.panel_version.as_deref(), Some("test-1"));
        assert_eq!(report.annotated_variants_artifact, annotated);
        assert!(!report.summary.is_empty());
        assert!(!report.recommendations.is_empty());

        let bytes = h
            .ctx
            .artifacts
            .load(&ArtifactKey::for_task(
                &task_context(Scope::Restricted),
                annotations_filename(&id),
            ))
            .await
            .unwrap();
        let bundle = OutputArtifact::decode(&bytes).unwrap();
        assert_eq!(bundle.scope, Scope::Restricted);
        assert_eq!(bundle.total_variants_considered, 12);
        assert_eq!(bundle.frequencies.len(), 12);
        assert!(
            bundle
                .annotations
                .values()
                .all(|a| a.source == AnnotationSource::RuleEngine && a.is_pathogenic())
        );
    }

    #[tokio::test]
    async fn unrestricted_report_considers_every_variant() {
        let h = Harness::new().await;
        let annotated = annotate(&h, 2_000, Scope::Unrestricted).await;

        let id = create(&h, TaskKind::Report, Scope::Unrestricted, &annotated).await;
        execute(&h.ctx, &id, &SilentProgress).await.unwrap();

        assert_eq!(*h.frequencies.queried.lock().unwrap(), 2_000);
        let task = h.storage.read(&id).await.unwrap();
        let report: ReportOutput = serde_json::from_value(task.output.unwrap()).unwrap();
        assert_eq!(report.total_variants_considered, 2_000);
        // Only the two stop-gains at 833 and 1666 reach pathogenic.
        assert_eq!(report.pathogenic_count, 2);
        assert_eq!(report.panel_version, None);
        assert_eq!(report.genes_reported, None);
    }

    #[tokio::test]
    async fn report_bundle_is_written_after_assessment() {
        let h = Harness::new().await;
        let annotated = annotate(&h, 2_000, Scope::Restricted).await;
        let id = create(&h, TaskKind::Report, Scope::Restricted, &annotated).await;

        let watch = BundleWatch {
            session_dir: h.dir.join("artifacts/variantflow/user-1/session-1"),
            seen: Mutex::new(Vec::new()),
        };
        assert_eq!(execute(&h.ctx, &id, &watch).await.unwrap(), WorkerOutcome::Completed);

        assert_eq!(
            *watch.seen.lock().unwrap(),
            vec![
                (phase::LOADING_VARIANTS.to_string(), false),
                (phase::KNOWLEDGE_RETRIEVAL.to_string(), false),
                (phase::CLASSIFICATION.to_string(), false),
                (phase::CLINICAL_ASSESSMENT.to_string(), false),
                (phase::COMPLETE.to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn session_metadata_tracks_both_stages() {
        let h = Harness::new().await;
        let annotated = annotate(&h, 2_000, Scope::Restricted).await;

        let meta = h.storage.read_session("session-1").await.unwrap().unwrap();
        assert_eq!(meta.status, SessionStatus::Analyzing);
        assert_eq!(meta.annotation_status, Some(TaskStatus::Completed));
        assert_eq!(meta.variant_count, Some(2_000));
        assert!(meta.report_task.is_none());

        let id = create(&h, TaskKind::Report, Scope::Restricted, &annotated).await;
        execute(&h.ctx, &id, &SilentProgress).await.unwrap();

        let meta = h.storage.read_session("session-1").await.unwrap().unwrap();
        let report: ReportOutput =
            serde_json::from_value(h.storage.read(&id).await.unwrap().output.unwrap()).unwrap();
        assert_eq!(meta.status, SessionStatus::Completed);
        assert_eq!(meta.report_task, Some(id));
        assert_eq!(meta.report_status, Some(TaskStatus::Completed));
        assert_eq!(meta.pathogenic_count, Some(2));
        assert_eq!(meta.annotations_count, Some(report.total_annotations));
        assert_eq!(meta.variant_count, Some(2_000));
        assert!(!meta.summary.unwrap().is_empty());
        assert!(meta.error.is_none());
    }

    #[tokio::test]
    async fn failed_stage_marks_session_in_error() {
        let h = Harness::new().await;
        let id = create(&h, TaskKind::Report, Scope::Restricted, "absent.json").await;
        execute(&h.ctx, &id, &SilentProgress).await.unwrap();

        let meta = h.storage.read_session("session-1").await.unwrap().unwrap();
        assert_eq!(meta.status, SessionStatus::Error);
        assert_eq!(meta.report_task, Some(id));
        assert_eq!(meta.report_status, Some(TaskStatus::Failed));
        assert!(meta.error.is_some());
        assert!(meta.summary.is_none());
    }
}
