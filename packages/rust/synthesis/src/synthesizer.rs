//! Batched, bounded-concurrency narrative synthesis.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use variantflow_shared::{InferenceConfig, Scope};

use crate::client::InferenceClient;
use crate::fallback::{fallback_assessment, no_findings_assessment};
use crate::findings::{FindingStats, PathogenicFinding};
use crate::json_recovery::{JsonObject, extract_json};
use crate::prompts::{batch_prompt, final_prompt};

/// Narrative summary, ordered recommendations, prioritized key findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub summary: String,
    pub recommendations: Vec<String>,
    pub key_findings: Vec<String>,
}

/// Where an assessment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentOrigin {
    Inference,
    Fallback,
    NoFindings,
}

/// Structured extract from one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchExtract {
    pub findings: Vec<Value>,
    pub genes: Vec<String>,
    pub conditions: Vec<String>,
    pub actionable: Vec<Value>,
    pub interactions: Vec<Value>,
}

impl BatchExtract {
    pub fn from_object(obj: &JsonObject) -> Self {
        Self {
            findings: value_list(obj.get("clinical_findings")),
            genes: string_list(obj.get("genes_in_batch")),
            conditions: string_list(obj.get("conditions_in_batch")),
            actionable: value_list(obj.get("actionable_items")),
            interactions: value_list(obj.get("variant_interactions")),
        }
    }
}

/// All batch extracts, concatenated (lists) or unioned (genes, conditions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedExtracts {
    pub findings: Vec<Value>,
    pub genes: BTreeSet<String>,
    pub conditions: BTreeSet<String>,
    pub actionable: Vec<Value>,
    pub interactions: Vec<Value>,
    pub successful_batches: usize,
}

impl MergedExtracts {
    pub fn merge(&mut self, extract: BatchExtract) {
        self.findings.extend(extract.findings);
        self.genes.extend(extract.genes);
        self.conditions.extend(extract.conditions);
        self.actionable.extend(extract.actionable);
        self.interactions.extend(extract.interactions);
        self.successful_batches += 1;
    }
}

fn value_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        other => Some(other.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value_list(value).iter().filter_map(value_text).collect()
}

/// Parse the final summarization response. Empty summaries are rejected.
fn parse_assessment(obj: &JsonObject) -> Option<Assessment> {
    let summary = obj.get("clinical_summary").and_then(value_text)?;
    Some(Assessment {
        summary,
        recommendations: string_list(obj.get("actionable_recommendations")),
        key_findings: string_list(obj.get("critical_key_findings")),
    })
}

/// Runs the synthesis stage over a set of pathogenic findings.
#[derive(Clone)]
pub struct Synthesizer {
    client: Option<Arc<dyn InferenceClient>>,
    batch_size: usize,
    max_concurrent: usize,
}

impl Synthesizer {
    pub fn new(
        client: Option<Arc<dyn InferenceClient>>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(client: Option<Arc<dyn InferenceClient>>, config: &InferenceConfig) -> Self {
        Self::new(client, config.batch_size, config.max_concurrent)
    }

    pub fn has_inference(&self) -> bool {
        self.client.is_some()
    }

    /// Produce an assessment. Never fails: every failure path ends in the
    /// deterministic fallback.
    #[instrument(skip_all, fields(findings = findings.len(), scope = %scope))]
    pub async fn assess(
        &self,
        findings: &[PathogenicFinding],
        scope: Scope,
    ) -> (Assessment, AssessmentOrigin) {
        if findings.is_empty() {
            return (no_findings_assessment(scope), AssessmentOrigin::NoFindings);
        }

        let Some(client) = &self.client else {
            warn!("inference service not configured, using fallback assessment");
            return (
                fallback_assessment(findings, scope),
                AssessmentOrigin::Fallback,
            );
        };

        let merged = self.run_batches(client, findings, scope).await;
        if merged.successful_batches == 0 {
            error!("all synthesis batches failed, using fallback assessment");
            return (
                fallback_assessment(findings, scope),
                AssessmentOrigin::Fallback,
            );
        }

        let stats = FindingStats::new(findings);
        let prompt = final_prompt(scope, findings, &stats, &merged);
        match client.generate(&prompt).await {
            Ok(text) => {
                if let Some(assessment) = extract_json(&text).as_ref().and_then(parse_assessment) {
                    return (assessment, AssessmentOrigin::Inference);
                }
                warn!("final summary response unusable, using fallback assessment");
            }
            Err(e) => error!(error = %e, "final summary request failed"),
        }

        (
            fallback_assessment(findings, scope),
            AssessmentOrigin::Fallback,
        )
    }

    /// Fan batches out under a semaphore and merge whatever succeeds.
    async fn run_batches(
        &self,
        client: &Arc<dyn InferenceClient>,
        findings: &[PathogenicFinding],
        scope: Scope,
    ) -> MergedExtracts {
        let batches: Vec<Vec<PathogenicFinding>> = findings
            .chunks(self.batch_size)
            .map(<[PathogenicFinding]>::to_vec)
            .collect();
        let total_batches = batches.len();
        info!(total_batches, max_concurrent = self.max_concurrent, "processing synthesis batches");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();

        for (i, batch) in batches.into_iter().enumerate() {
            let batch_num = i + 1;
            let client = Arc::clone(client);
            let sem = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                let prompt = batch_prompt(scope, &batch, batch_num, total_batches);
                match client.generate(&prompt).await {
                    Ok(text) if text.trim().is_empty() => {
                        warn!(batch = batch_num, "empty synthesis response");
                        None
                    }
                    Ok(text) => match extract_json(&text) {
                        Some(obj) => Some(BatchExtract::from_object(&obj)),
                        None => {
                            warn!(batch = batch_num, "unparsable synthesis response");
                            None
                        }
                    },
                    Err(e) => {
                        error!(batch = batch_num, error = %e, "synthesis batch failed");
                        None
                    }
                }
            });
        }

        let mut merged = MergedExtracts::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(extract)) => merged.merge(extract),
                Ok(None) => {}
                Err(e) => error!(error = %e, "synthesis batch task panicked"),
            }
        }

        info!(
            successful = merged.successful_batches,
            total_batches, "synthesis batches complete"
        );
        merged
    }
}
