//! Task submission and hand-off to workers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use variantflow_shared::{
    Result, TaskContext, TaskId, TaskKind, TaskStatus, TaskUpdate, VariantFlowError,
};
use variantflow_storage::TaskStore;

use crate::PipelineContext;
use crate::progress::SilentProgress;
use crate::worker::{WorkerOutcome, execute};

/// Delivers `{task_id}` to a worker. Returns once the hand-off is accepted,
/// not when the task finishes.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, task_id: &TaskId) -> Result<()>;
}

/// Runs workers as detached tokio tasks in this process.
pub struct InProcessDispatcher {
    ctx: Arc<PipelineContext>,
    running: Mutex<JoinSet<(TaskId, Result<WorkerOutcome>)>>,
}

impl InProcessDispatcher {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            running: Mutex::new(JoinSet::new()),
        }
    }

    /// Workers spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        match self.running.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Wait for every dispatched worker to finish.
    pub async fn drain(&self) -> Vec<(TaskId, Result<WorkerOutcome>)> {
        let mut set = match self.running.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }
        outcomes
    }
}

#[async_trait]
impl Dispatcher for InProcessDispatcher {
    async fn dispatch(&self, task_id: &TaskId) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let id = task_id.clone();

        let mut running = self
            .running
            .lock()
            .map_err(|_| VariantFlowError::Storage("dispatcher state poisoned".into()))?;
        reap_finished(&mut running);
        running.spawn(async move {
            let outcome = execute(&ctx, &id, &SilentProgress).await;
            (id, outcome)
        });
        debug!(task_id = %task_id, "worker spawned");
        Ok(())
    }
}

/// Drop workers that already finished. Their outcome is on the task document.
fn reap_finished(running: &mut JoinSet<(TaskId, Result<WorkerOutcome>)>) {
    while let Some(joined) = running.try_join_next() {
        match joined {
            Ok((id, Ok(outcome))) => debug!(task_id = %id, ?outcome, "reaped worker"),
            Ok((id, Err(e))) => warn!(task_id = %id, error = %e, "worker ended with error"),
            Err(e) => error!(error = %e, "worker task panicked"),
        }
    }
}

/// Create a task and hand it to `dispatcher`.
///
/// An incomplete context is rejected before anything is written. If the
/// hand-off itself fails, the new task is marked `failed`.
#[instrument(skip_all, fields(%kind, input = input_artifact))]
pub async fn submit(
    store: &dyn TaskStore,
    dispatcher: &dyn Dispatcher,
    kind: TaskKind,
    context: TaskContext,
    input_artifact: &str,
) -> Result<TaskId> {
    context.validate()?;

    let task_id = TaskId::new();
    store.create(&task_id, kind, &context, input_artifact).await?;

    if let Err(e) = dispatcher.dispatch(&task_id).await {
        error!(task_id = %task_id, error = %e, "dispatch failed");
        store
            .transition(
                &task_id,
                TaskUpdate::status(TaskStatus::Failed).with_error(format!("dispatch failed: {e}")),
            )
            .await?;
        return Err(e);
    }

    info!(task_id = %task_id, "task submitted");
    Ok(task_id)
}

/// Submit an annotation task over an input variant artifact.
pub async fn submit_annotation(
    store: &dyn TaskStore,
    dispatcher: &dyn Dispatcher,
    context: TaskContext,
    input_artifact: &str,
) -> Result<TaskId> {
    submit(store, dispatcher, TaskKind::Annotation, context, input_artifact).await
}

/// Submit a report task over an annotated variant artifact.
pub async fn submit_report(
    store: &dyn TaskStore,
    dispatcher: &dyn Dispatcher,
    context: TaskContext,
    annotated_variants_artifact: &str,
) -> Result<TaskId> {
    submit(
        store,
        dispatcher,
        TaskKind::Report,
        context,
        annotated_variants_artifact,
    )
    .await
}
