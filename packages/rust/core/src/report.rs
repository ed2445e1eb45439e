//! Report stage: scope filtering, knowledge retrieval, classification,
//! reporting rules and synthesis. The output artifact is written last.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{info, instrument, warn};
use variantflow_artifacts::{ArtifactKey, OutputArtifact, annotations_filename, decode_variants};
use variantflow_rules::{apply_reporting_rules, apply_rule_engine, filter_variants_to_panel};
use variantflow_shared::{
    ReportOutput, Result, Scope, SessionUpdate, Task, TaskUpdate, VariantFlowError,
};
use variantflow_synthesis::collect_findings;

use crate::PipelineContext;
use crate::progress::{ProgressReporter, phase};
use crate::worker::StageOutput;

async fn enter_phase(
    ctx: &PipelineContext,
    task: &Task,
    progress: &dyn ProgressReporter,
    name: &str,
) -> Result<()> {
    ctx.store.transition(&task.id, TaskUpdate::phase(name)).await?;
    progress.phase(&task.id, name);
    Ok(())
}

/// Run everything after annotation and produce the report payload.
#[instrument(skip_all, fields(task_id = %task.id, scope = %task.context.scope))]
pub(crate) async fn run_report_stage(
    ctx: &PipelineContext,
    task: &Task,
    progress: &dyn ProgressReporter,
) -> Result<StageOutput> {
    let scope = task.context.scope;
    let yield_every = ctx.yield_every;

    // --- Load annotated variants ---
    let input_key = ArtifactKey::for_task(&task.context, &task.input_artifact);
    let variants = decode_variants(&ctx.artifacts.load(&input_key).await?)?;
    let total_variants = variants.len();
    info!(variants = total_variants, artifact = %input_key, "loaded annotated variants");

    let mut considered = match scope {
        Scope::Restricted => {
            let stats = ctx.panel.stats();
            info!(
                version = %stats.version,
                total_genes = stats.total_genes,
                recessive_genes = stats.recessive_genes,
                "restricted scope, filtering to panel genes"
            );
            let kept = filter_variants_to_panel(variants, &ctx.panel);
            if kept.is_empty() {
                warn!("no variants in panel genes");
            }
            kept
        }
        Scope::Unrestricted => {
            info!("unrestricted scope, analyzing all variants");
            variants
        }
    };

    // --- Knowledge retrieval ---
    enter_phase(ctx, task, progress, phase::KNOWLEDGE_RETRIEVAL).await?;

    let mut annotations = ctx.clinical.annotate(&considered, yield_every).await;

    let mut gene_updates = 0;
    for (i, variant) in considered.iter_mut().enumerate() {
        if let Some(gene) = annotations
            .get(variant.id())
            .and_then(|a| a.gene_symbol.clone())
        {
            variant.info.gene = Some(gene);
            gene_updates += 1;
        }
        if yield_every > 0 && (i + 1) % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }
    info!(gene_updates, "wrote curated gene symbols back to variants");

    let frequencies = match &ctx.frequency {
        Some(retriever) => retriever.retrieve(&considered).await,
        None => {
            warn!("population frequencies unavailable");
            BTreeMap::new()
        }
    };

    // --- Classification ---
    enter_phase(ctx, task, progress, phase::CLASSIFICATION).await?;
    apply_rule_engine(&considered, &mut annotations, &frequencies, yield_every).await;

    if scope == Scope::Restricted {
        annotations = apply_reporting_rules(annotations, &ctx.panel);
    }

    // --- Clinical assessment ---
    enter_phase(ctx, task, progress, phase::CLINICAL_ASSESSMENT).await?;

    let findings = collect_findings(&annotations, &ctx.panel);
    info!(pathogenic = findings.len(), "collected pathogenic findings");
    let (assessment, origin) = ctx.synthesizer.assess(&findings, scope).await;
    info!(?origin, "assessment ready");

    let artifact_name = annotations_filename(&task.id);
    let bundle = OutputArtifact {
        annotations,
        frequencies,
        scope,
        total_variants_considered: considered.len(),
    };
    let key = ArtifactKey::for_task(&task.context, &artifact_name);
    let version = ctx.artifacts.save(&key, &bundle.encode()?).await?;
    info!(
        artifact = %key,
        version,
        annotations = bundle.annotations.len(),
        frequencies = bundle.frequencies.len(),
        "saved output artifact"
    );

    let (panel_version, genes_reported) = match scope {
        Scope::Restricted => {
            let genes: BTreeSet<&str> = bundle
                .annotations
                .values()
                .filter_map(|a| a.gene_symbol.as_deref())
                .collect();
            (Some(ctx.panel.version().to_string()), Some(genes.len()))
        }
        Scope::Unrestricted => (None, None),
    };

    let report = ReportOutput {
        annotations_artifact: artifact_name.clone(),
        annotated_variants_artifact: task.input_artifact.clone(),
        scope,
        pathogenic_count: findings.len(),
        total_annotations: bundle.annotations.len(),
        total_variants,
        total_variants_considered: bundle.total_variants_considered,
        summary: assessment.summary,
        recommendations: assessment.recommendations,
        key_findings: assessment.key_findings,
        panel_version,
        genes_reported,
        completed_at: Utc::now(),
    };

    info!(
        pathogenic = report.pathogenic_count,
        annotations = report.total_annotations,
        considered = report.total_variants_considered,
        "report complete"
    );

    let session = SessionUpdate::completed(&task.id, task.kind)
        .with_variant_count(report.total_variants)
        .with_pathogenic_count(report.pathogenic_count)
        .with_annotations_count(report.total_annotations)
        .with_summary(report.summary.clone());
    let output = serde_json::to_value(&report)
        .map_err(|e| VariantFlowError::validation(format!("encode report output: {e}")))?;
    Ok(StageOutput {
        artifact: artifact_name,
        output,
        session,
    })
}
