//! Collaborators shared by every stage, built once at process start.

use std::sync::Arc;

use tracing::{info, warn};
use variantflow_annotation::{AnnotationRunner, AnnotationTool, VepCommand};
use variantflow_artifacts::{ArtifactStore, FsArtifactStore};
use variantflow_knowledge::{
    ClinicalSignificanceLookup, FrequencyRetriever, HttpFrequencySource, LocalClinVarIndex,
    RemoteClinVar,
};
use variantflow_rules::GenePanel;
use variantflow_shared::{AppConfig, Result, VariantFlowError, expand_home};
use variantflow_storage::{Storage, TaskStore};
use variantflow_synthesis::{ChatCompletionsClient, InferenceClient, Synthesizer};

/// Everything a worker needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn TaskStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub runner: Arc<AnnotationRunner>,
    pub clinical: ClinicalSignificanceLookup,
    /// `None` when no frequency endpoint is configured.
    pub frequency: Option<Arc<FrequencyRetriever>>,
    pub synthesizer: Synthesizer,
    pub panel: Arc<GenePanel>,
    /// Items processed between cooperative yields.
    pub yield_every: usize,
}

impl PipelineContext {
    /// Minimal context: no knowledge sources, no inference, the SF v3.3 panel.
    pub fn new(
        store: Arc<dyn TaskStore>,
        artifacts: Arc<dyn ArtifactStore>,
        runner: AnnotationRunner,
    ) -> Self {
        Self {
            store,
            artifacts,
            runner: Arc::new(runner),
            clinical: ClinicalSignificanceLookup::default(),
            frequency: None,
            synthesizer: Synthesizer::new(None, 50, 5),
            panel: Arc::new(GenePanel::acmg_sf_v3_3()),
            yield_every: 1000,
        }
    }

    pub fn with_clinical(mut self, clinical: ClinicalSignificanceLookup) -> Self {
        self.clinical = clinical;
        self
    }

    pub fn with_frequency(mut self, frequency: FrequencyRetriever) -> Self {
        self.frequency = Some(Arc::new(frequency));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_panel(mut self, panel: GenePanel) -> Self {
        self.panel = Arc::new(panel);
        self
    }

    /// Build every collaborator from configuration.
    ///
    /// A task database or artifact root that cannot be opened is a
    /// configuration error. Optional sources degrade with a warning: a
    /// missing local clinical snapshot falls back to the remote lookup, an
    /// empty frequency endpoint disables frequencies, and a missing inference
    /// key selects the deterministic assessment.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let db_path = expand_home(&config.storage.task_db)?;
        let store = Storage::open(&db_path)
            .await
            .map_err(|e| VariantFlowError::config(format!("task database {}: {e}", db_path.display())))?;

        let artifact_root = expand_home(&config.storage.artifact_root)?;
        let artifacts = FsArtifactStore::open(&artifact_root).map_err(|e| {
            VariantFlowError::config(format!("artifact root {}: {e}", artifact_root.display()))
        })?;

        let tool: Arc<dyn AnnotationTool> = Arc::new(VepCommand::from_config(&config.annotation));
        let runner = AnnotationRunner::from_config(tool, &config.annotation);

        let clinical = build_clinical_lookup(config).await?;

        let frequency = if config.frequency.endpoint.trim().is_empty() {
            warn!("no frequency endpoint configured, population frequencies disabled");
            None
        } else {
            let source = Arc::new(HttpFrequencySource::new(&config.frequency)?);
            Some(Arc::new(FrequencyRetriever::from_config(
                source,
                &config.frequency,
            )))
        };

        let client: Option<Arc<dyn InferenceClient>> =
            match ChatCompletionsClient::from_config(&config.inference)? {
                Some(c) => Some(Arc::new(c)),
                None => {
                    warn!(
                        env = %config.inference.api_key_env,
                        "inference API key not set, synthesis will use the deterministic assessment"
                    );
                    None
                }
            };
        let synthesizer = Synthesizer::from_config(client, &config.inference);

        Ok(Self {
            store: Arc::new(store),
            artifacts: Arc::new(artifacts),
            runner: Arc::new(runner),
            clinical,
            frequency,
            synthesizer,
            panel: Arc::new(GenePanel::acmg_sf_v3_3()),
            yield_every: config.worker.yield_every,
        })
    }
}

async fn build_clinical_lookup(config: &AppConfig) -> Result<ClinicalSignificanceLookup> {
    let remote = RemoteClinVar::new(&config.clinvar)?;
    let path = expand_home(&config.clinvar.local_index)?;

    let local = if path.exists() {
        match LocalClinVarIndex::load(path.clone()).await {
            Ok(index) => {
                info!(path = %path.display(), entries = index.len(), "loaded local clinical index");
                Some(Arc::new(index))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not load local clinical index, using remote lookup");
                None
            }
        }
    } else {
        warn!(path = %path.display(), "local clinical index not found, using remote lookup");
        None
    };

    Ok(ClinicalSignificanceLookup::new(local, Some(remote)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use variantflow_shared::StorageConfig;

    #[tokio::test]
    async fn from_config_degrades_optional_sources() {
        let dir = std::env::temp_dir().join(format!("vf-ctx-{}", uuid::Uuid::now_v7()));
        let config = AppConfig {
            storage: StorageConfig {
                task_db: dir.join("tasks.db").display().to_string(),
                artifact_root: dir.join("artifacts").display().to_string(),
            },
            clinvar: variantflow_shared::ClinVarConfig {
                local_index: dir.join("missing.vcf.gz").display().to_string(),
                ..Default::default()
            },
            frequency: variantflow_shared::FrequencyConfig {
                endpoint: String::new(),
                ..Default::default()
            },
            inference: variantflow_shared::InferenceConfig {
                api_key_env: "VF_TEST_UNSET_CTX_KEY".into(),
                ..Default::default()
            },
            ..AppConfig::default()
        };

        let ctx = PipelineContext::from_config(&config).await.unwrap();
        assert_eq!(
            ctx.clinical.mode(),
            variantflow_knowledge::LookupMode::Remote
        );
        assert!(ctx.frequency.is_none());
        assert!(!ctx.synthesizer.has_inference());
        assert!(dir.join("artifacts").is_dir());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unusable_artifact_root_is_config_error() {
        let dir = std::env::temp_dir().join(format!("vf-ctx-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = AppConfig {
            storage: StorageConfig {
                task_db: dir.join("tasks.db").display().to_string(),
                artifact_root: blocker.join("artifacts").display().to_string(),
            },
            ..AppConfig::default()
        };
        let err = PipelineContext::from_config(&config).await.err().unwrap();
        assert!(matches!(err, VariantFlowError::Config { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
