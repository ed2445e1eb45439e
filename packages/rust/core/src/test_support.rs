//! Fakes and fixtures shared by the worker and dispatch tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;
use variantflow_annotation::{AnnotationRunner, AnnotationTool};
use variantflow_artifacts::{ArtifactKey, ArtifactStore, FsArtifactStore, encode_variants};
use variantflow_knowledge::{FrequencyQuery, FrequencyRow, FrequencySource};
use variantflow_rules::{GeneCategory, GenePanel};
use variantflow_shared::{
    DatasetGeneration, Result, Scope, TaskContext, TaskId, TaskProgress, Variant,
};
use variantflow_storage::Storage;

use crate::PipelineContext;
use crate::progress::ProgressReporter;

/// Positions divisible by this land in a panel gene.
pub const PANEL_STRIDE: u64 = 833;

/// Gives panel genes a stop-gain at every `PANEL_STRIDE` position and a
/// missense in `NOISE` everywhere else.
#[derive(Default)]
pub struct PanelTool {
    pub calls: Mutex<usize>,
}

#[async_trait]
impl AnnotationTool for PanelTool {
    async fn run_batch(&self, input: String) -> Result<String> {
        *self.calls.lock().unwrap() += 1;

        let mut out = String::new();
        for row in input.lines().filter(|l| !l.starts_with('#')) {
            let mut cols = row.split('\t');
            let chrom = cols.next().unwrap();
            let pos: u64 = cols.next().unwrap().parse().unwrap();
            let (gene, term, impact) = if pos % PANEL_STRIDE == 0 {
                let gene = ["GENEA", "GENEB", "GENEC"][(pos / PANEL_STRIDE % 3) as usize];
                (gene, "stop_gained", "HIGH")
            } else {
                ("NOISE", "missense_variant", "MODERATE")
            };
            out.push_str(&format!(
                "{{\"input\":\"{chrom}\\t{pos}\",\"transcript_consequences\":[{{\"gene_symbol\":\"{gene}\",\"consequence_terms\":[\"{term}\"],\"impact\":\"{impact}\"}}]}}\n"
            ));
        }
        Ok(out)
    }
}

/// Answers every query with a very rare current-generation row.
#[derive(Default)]
pub struct RareFrequencies {
    pub queried: Mutex<usize>,
}

#[async_trait]
impl FrequencySource for RareFrequencies {
    async fn query(
        &self,
        generation: DatasetGeneration,
        _chrom: &str,
        queries: &[FrequencyQuery],
    ) -> Result<Vec<FrequencyRow>> {
        if generation == DatasetGeneration::Legacy {
            return Ok(Vec::new());
        }
        *self.queried.lock().unwrap() += queries.len();
        Ok(queries
            .iter()
            .map(|q| FrequencyRow {
                pos: q.pos,
                reference: q.reference.clone(),
                alt: q.alt.clone(),
                af: Some(0.00001),
                ac: Some(1),
                an: Some(100_000),
                af_afr: None,
                af_amr: None,
                af_asj: None,
                af_eas: None,
                af_fin: None,
                af_nfe: None,
                af_sas: None,
                af_oth: None,
                hom_count: Some(0),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub phases: Mutex<Vec<String>>,
    pub checkpoints: Mutex<Vec<TaskProgress>>,
    pub finished: Mutex<Option<bool>>,
}

impl ProgressReporter for RecordingProgress {
    fn phase(&self, _task_id: &TaskId, name: &str) {
        self.phases.lock().unwrap().push(name.to_string());
    }

    fn checkpoint(&self, _task_id: &TaskId, progress: &TaskProgress) {
        self.checkpoints.lock().unwrap().push(progress.clone());
    }

    fn finished(&self, _task_id: &TaskId, succeeded: bool) {
        *self.finished.lock().unwrap() = Some(succeeded);
    }
}

/// Three dominant genes, one per category.
pub fn test_panel() -> GenePanel {
    GenePanel::new(
        "test-1",
        [
            ("GENEA", GeneCategory::Cancer),
            ("GENEB", GeneCategory::Cardiovascular),
            ("GENEC", GeneCategory::Metabolic),
        ],
        &[],
        &[],
    )
}

pub fn task_context(scope: Scope) -> TaskContext {
    TaskContext {
        session_id: "session-1".into(),
        user_id: "user-1".into(),
        app_name: "variantflow".into(),
        scope,
    }
}

/// `n` SNVs on chromosome 2 at positions 1..=n.
pub fn variants(n: u64) -> Vec<Variant> {
    (1..=n)
        .map(|pos| Variant::new("chr2", pos, "C", vec!["T".into()]))
        .collect()
}

pub struct Harness {
    pub ctx: PipelineContext,
    pub storage: Arc<Storage>,
    pub tool: Arc<PanelTool>,
    pub frequencies: Arc<RareFrequencies>,
    pub dir: PathBuf,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("vf-core-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let storage = Arc::new(Storage::open(&dir.join("tasks.db")).await.unwrap());
        let artifacts = Arc::new(FsArtifactStore::open(dir.join("artifacts")).unwrap());
        let tool = Arc::new(PanelTool::default());
        let frequencies = Arc::new(RareFrequencies::default());

        let ctx = PipelineContext::new(
            storage.clone(),
            artifacts,
            AnnotationRunner::new(tool.clone(), 500, 5),
        )
        .with_frequency(variantflow_knowledge::FrequencyRetriever::new(
            frequencies.clone(),
            100,
            10_000,
        ))
        .with_panel(test_panel());

        Self {
            ctx,
            storage,
            tool,
            frequencies,
            dir,
        }
    }

    pub async fn put(&self, context: &TaskContext, name: &str, bytes: &[u8]) {
        self.ctx
            .artifacts
            .save(&ArtifactKey::for_task(context, name), bytes)
            .await
            .unwrap();
    }

    pub async fn put_variants(&self, context: &TaskContext, name: &str, variants: &[Variant]) {
        self.put(context, name, &encode_variants(variants).unwrap())
            .await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
