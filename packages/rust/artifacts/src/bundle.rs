//! Artifact payloads and their JSON encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use variantflow_shared::{
    Annotation, FrequencyRecord, Result, Scope, TaskId, Variant, VariantFlowError,
};

/// Variants after the annotation stage.
pub fn annotated_variants_filename(task_id: &TaskId) -> String {
    format!("vep_annotated_{task_id}.json")
}

/// The report stage's output bundle.
pub fn annotations_filename(task_id: &TaskId) -> String {
    format!("annotations_{task_id}.json")
}

/// Immutable hand-off from the report stage to downstream consumers.
///
/// Maps are keyed by variant id and ordered, so identical runs encode to
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub annotations: BTreeMap<String, Annotation>,
    pub frequencies: BTreeMap<String, FrequencyRecord>,
    pub scope: Scope,
    /// Variants that went through retrieval and classification (after scope filtering).
    pub total_variants_considered: usize,
}

impl OutputArtifact {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VariantFlowError::validation(format!("encode output artifact: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VariantFlowError::validation(format!("malformed output artifact: {e}")))
    }
}

pub fn encode_variants(variants: &[Variant]) -> Result<Vec<u8>> {
    serde_json::to_vec(variants)
        .map_err(|e| VariantFlowError::validation(format!("encode variants: {e}")))
}

/// Decode a variant list. Malformed input is structural and fails the task.
pub fn decode_variants(bytes: &[u8]) -> Result<Vec<Variant>> {
    serde_json::from_slice(bytes)
        .map_err(|e| VariantFlowError::validation(format!("malformed variant artifact: {e}")))
}
