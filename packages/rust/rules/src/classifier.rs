//! Additive evidence scoring for variants without a curated significance.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, instrument};
use variantflow_shared::{Annotation, AnnotationSource, FrequencyRecord, Variant};

/// Rarity below which a variant earns moderate pathogenic evidence.
pub const RARE_AF: f64 = 0.0001;
/// Frequency above which a variant is benign on its own.
pub const COMMON_AF: f64 = 0.05;

/// Consequence terms treated as predicted loss of function.
pub const LOSS_OF_FUNCTION: &[&str] = &["stop_gained", "frameshift_variant"];

const PM2_POINTS: u32 = 2;
const PVS1_POINTS: u32 = 8;
const BA1_POINTS: u32 = 10;

const PATHOGENIC_THRESHOLD: u32 = 10;
const LIKELY_PATHOGENIC_THRESHOLD: u32 = 6;
const BENIGN_THRESHOLD: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    Pathogenic,
    LikelyPathogenic,
    UncertainSignificance,
    LikelyBenign,
    Benign,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pathogenic => "Pathogenic",
            Self::LikelyPathogenic => "Likely pathogenic",
            Self::UncertainSignificance => "Uncertain significance",
            Self::LikelyBenign => "Likely benign",
            Self::Benign => "Benign",
        }
    }

    pub fn is_reportable(self) -> bool {
        matches!(self, Self::Pathogenic | Self::LikelyPathogenic)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classification, the evidence codes that fired, and a one-line rationale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub evidence_codes: Vec<String>,
    pub rationale: String,
}

/// Score one variant.
///
/// Frequency-based codes only fire when a frequency record exists.
pub fn classify(variant: &Variant, frequency: Option<&FrequencyRecord>) -> ClassificationResult {
    let mut pathogenic = 0;
    let mut benign = 0;
    let mut codes = Vec::new();

    if frequency.is_some_and(|f| f.af < RARE_AF) {
        pathogenic += PM2_POINTS;
        codes.push("PM2");
    }

    if variant.info.has_consequence(LOSS_OF_FUNCTION) && variant.gene().is_some() {
        pathogenic += PVS1_POINTS;
        codes.push("PVS1");
    }

    let common = frequency.is_some_and(|f| f.af > COMMON_AF);
    if common {
        benign += BA1_POINTS;
        codes.push("BA1");
    }

    let (classification, rationale) = if common {
        (Classification::Benign, "Variant is common in the general population.")
    } else if pathogenic >= PATHOGENIC_THRESHOLD {
        (
            Classification::Pathogenic,
            "Strong pathogenic evidence found (PVS1 + PM).",
        )
    } else if pathogenic >= LIKELY_PATHOGENIC_THRESHOLD {
        (
            Classification::LikelyPathogenic,
            "Moderate pathogenic evidence found.",
        )
    } else if benign >= BENIGN_THRESHOLD {
        (Classification::Benign, "Strong benign evidence found.")
    } else {
        (
            Classification::UncertainSignificance,
            "Insufficient evidence for classification.",
        )
    };

    ClassificationResult {
        classification,
        evidence_codes: codes.into_iter().map(String::from).collect(),
        rationale: rationale.to_string(),
    }
}

/// Counts from one rule-engine pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleEngineStats {
    pub classified: usize,
    pub supplemented: usize,
}

/// Run the classifier over every variant without a canonical annotation and
/// merge predictor fields into existing ones.
///
/// Only reportable (pathogenic or likely pathogenic) classifications become
/// new annotations. An existing record's significance is never touched; the
/// variant's AI score and class are copied in only where the record has none.
#[instrument(skip_all, fields(variants = variants.len(), existing = annotations.len()))]
pub async fn apply_rule_engine(
    variants: &[Variant],
    annotations: &mut BTreeMap<String, Annotation>,
    frequencies: &BTreeMap<String, FrequencyRecord>,
    yield_every: usize,
) -> RuleEngineStats {
    let mut stats = RuleEngineStats::default();

    for (i, variant) in variants.iter().enumerate() {
        let frequency = frequencies.get(variant.id());

        if let Some(existing) = annotations.get_mut(variant.id()) {
            if supplement(existing, variant, frequency) {
                stats.supplemented += 1;
            }
        } else {
            let result = classify(variant, frequency);
            if result.classification.is_reportable() {
                debug!(
                    variant = variant.id(),
                    classification = %result.classification,
                    codes = ?result.evidence_codes,
                    "rule engine classification"
                );
                annotations.insert(
                    variant.id().to_string(),
                    rule_engine_annotation(variant, frequency, result),
                );
                stats.classified += 1;
            }
        }

        if yield_every > 0 && (i + 1) % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    info!(
        classified = stats.classified,
        supplemented = stats.supplemented,
        "rule engine pass complete"
    );
    stats
}

fn rule_engine_annotation(
    variant: &Variant,
    frequency: Option<&FrequencyRecord>,
    result: ClassificationResult,
) -> Annotation {
    let mut ann = Annotation::new(variant.id(), AnnotationSource::RuleEngine);
    ann.clinical_significance = Some(result.classification.label().to_string());
    ann.evidence_codes = result.evidence_codes;
    ann.rationale = Some(result.rationale);
    ann.gene_symbol = variant.gene().map(str::to_string);
    ann.transcript_id = variant.info.transcript_id.clone();
    ann.consequences = variant.info.consequences.clone();
    ann.impact = variant.info.impact;
    ann.ai_score = variant.info.ai_score;
    ann.ai_class = variant.info.ai_class.clone();
    ann.allele_frequency = frequency.map(|f| f.af);
    ann.homozygote_count = frequency.map(|f| f.hom_count);
    ann
}

/// Fill empty predictor and frequency fields on an existing record.
fn supplement(ann: &mut Annotation, variant: &Variant, frequency: Option<&FrequencyRecord>) -> bool {
    let mut changed = false;
    let info = &variant.info;

    if ann.ai_score.is_none() && info.ai_score.is_some() {
        ann.ai_score = info.ai_score;
        ann.ai_class = info.ai_class.clone();
        changed = true;
    }
    if ann.impact.is_none() && info.impact.is_some() {
        ann.impact = info.impact;
        changed = true;
    }
    if ann.consequences.is_empty() && !info.consequences.is_empty() {
        ann.consequences = info.consequences.clone();
        changed = true;
    }
    if ann.transcript_id.is_none() && info.transcript_id.is_some() {
        ann.transcript_id = info.transcript_id.clone();
        changed = true;
    }
    if let (None, Some(f)) = (ann.allele_frequency, frequency) {
        ann.allele_frequency = Some(f.af);
        ann.homozygote_count = Some(f.hom_count);
        changed = true;
    }
    changed
}
