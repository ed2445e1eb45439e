//! Parsing the tool's JSON-lines output into per-position hits.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use variantflow_shared::{Impact, VariantInfo};

use crate::input::position_key;

/// Everything one output line says about one position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolHit {
    /// `chrom:pos` join key.
    pub key: String,
    /// First non-null gene symbol across transcripts.
    pub gene: Option<String>,
    /// Transcript the gene symbol came from.
    pub transcript_id: Option<String>,
    pub consequences: BTreeSet<String>,
    /// Most severe tier across transcripts.
    pub impact: Option<Impact>,
    /// Highest AI pathogenicity score across transcripts.
    pub ai_score: Option<f64>,
    /// Class reported alongside [`ToolHit::ai_score`].
    pub ai_class: Option<String>,
}

impl ToolHit {
    /// Merge into a variant's info. Fields the hit does not carry are left alone.
    pub fn apply_to(&self, info: &mut VariantInfo) {
        if let Some(gene) = &self.gene {
            info.gene = Some(gene.clone());
        }
        if let Some(transcript) = &self.transcript_id {
            info.transcript_id = Some(transcript.clone());
        }
        if !self.consequences.is_empty() {
            info.consequences = self.consequences.iter().cloned().collect();
        }
        if self.impact.is_some() {
            info.impact = self.impact;
        }
        if self.ai_score.is_some() {
            info.ai_score = self.ai_score;
            info.ai_class = self.ai_class.clone();
        }
    }
}

/// Outcome of parsing one batch of output.
#[derive(Debug, Default)]
pub struct ParsedOutput {
    pub hits: Vec<ToolHit>,
    /// Lines that were not valid JSON or lacked a usable location.
    pub skipped_lines: usize,
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    #[serde(default)]
    input: String,
    #[serde(default)]
    transcript_consequences: Vec<TranscriptConsequence>,
}

#[derive(Debug, Deserialize)]
struct TranscriptConsequence {
    #[serde(default)]
    gene_symbol: Option<String>,
    #[serde(default)]
    transcript_id: Option<String>,
    #[serde(default)]
    consequence_terms: Vec<String>,
    #[serde(default)]
    impact: Option<String>,
    /// Nested plugin block: `{"am_pathogenicity": .., "am_class": ..}`.
    #[serde(default)]
    alphamissense: Option<Value>,
    /// Flat plugin fields, used when the nested block is absent.
    #[serde(default)]
    am_pathogenicity: Option<Value>,
    #[serde(default)]
    am_class: Option<Value>,
}

impl TranscriptConsequence {
    fn ai_prediction(&self) -> Option<(f64, Option<String>)> {
        if let Some(nested) = self.alphamissense.as_ref().filter(|v| v.is_object()) {
            if let Some(score) = nested.get("am_pathogenicity").and_then(lenient_f64) {
                let class = nested.get("am_class").and_then(lenient_string);
                return Some((score, class));
            }
        }
        let score = self.am_pathogenicity.as_ref().and_then(lenient_f64)?;
        let class = self.am_class.as_ref().and_then(lenient_string);
        Some((score, class))
    }
}

/// Plugins emit scores as numbers or numeric strings.
fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Parse every line of one batch's stdout. Malformed lines are logged and
/// skipped; they never fail the batch.
pub fn parse_tool_output(stdout: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: OutputLine = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    line = %line.chars().take(100).collect::<String>(),
                    error = %e,
                    "skipping malformed annotation output line"
                );
                parsed.skipped_lines += 1;
                continue;
            }
        };

        let mut loc = record.input.split('\t');
        let (Some(chrom), Some(pos)) = (loc.next(), loc.next()) else {
            debug!("annotation output line has no location");
            parsed.skipped_lines += 1;
            continue;
        };

        parsed.hits.push(collect_hit(
            position_key(chrom, pos),
            &record.transcript_consequences,
        ));
    }

    parsed
}

fn collect_hit(key: String, consequences: &[TranscriptConsequence]) -> ToolHit {
    let mut hit = ToolHit {
        key,
        ..ToolHit::default()
    };

    for tc in consequences {
        if hit.gene.is_none() {
            if let Some(gene) = tc.gene_symbol.as_ref().filter(|g| !g.is_empty()) {
                hit.gene = Some(gene.clone());
                hit.transcript_id = tc.transcript_id.clone();
            }
        }

        hit.consequences
            .extend(tc.consequence_terms.iter().cloned());

        if let Some(raw) = &tc.impact {
            match raw.parse::<Impact>() {
                Ok(impact) => hit.impact = hit.impact.max(Some(impact)),
                Err(_) => debug!(impact = %raw, "ignoring unknown impact tier"),
            }
        }

        if let Some((score, class)) = tc.ai_prediction() {
            if hit.ai_score.is_none_or(|best| score > best) {
                hit.ai_score = Some(score);
                hit.ai_class = class;
            }
        }
    }

    hit
}
