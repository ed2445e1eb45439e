//! Core domain types for the variantflow pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Opaque task identifier. Freshly generated ids are UUID v7 (time-sortable),
/// but any string handed to us by a dispatcher is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// SNV iff the reference and every alternate allele are a single base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantType {
    #[serde(rename = "SNV")]
    Snv,
    #[serde(rename = "INDEL")]
    Indel,
}

impl std::fmt::Display for VariantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snv => f.write_str("SNV"),
            Self::Indel => f.write_str("INDEL"),
        }
    }
}

/// Predicted impact tier. Declaration order is severity order, so the most
/// severe of several tiers is simply their `max`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    Modifier,
    Low,
    Moderate,
    High,
}

impl std::str::FromStr for Impact {
    type Err = crate::VariantFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MODIFIER" => Ok(Self::Modifier),
            "LOW" => Ok(Self::Low),
            "MODERATE" => Ok(Self::Moderate),
            "HIGH" => Ok(Self::High),
            other => Err(crate::VariantFlowError::parse(format!(
                "unknown impact tier: {other}"
            ))),
        }
    }
}

/// Typed per-variant annotations filled in by the pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    /// HGNC gene symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene: Option<String>,
    /// Sequence Ontology consequence terms, sorted and de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consequences: Vec<String>,
    /// Most severe impact tier seen across transcripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
    /// AI missense pathogenicity score in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    /// AI class label (e.g. `likely_pathogenic`, `ambiguous`, `likely_benign`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_class: Option<String>,
    /// Free-form extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl VariantInfo {
    /// Whether any consequence term matches one of `terms`.
    pub fn has_consequence(&self, terms: &[&str]) -> bool {
        self.consequences
            .iter()
            .any(|c| terms.iter().any(|t| c == t))
    }
}

/// A genomic variant.
///
/// Coordinates are fixed at construction; the derived `id` and `variant_type`
/// are computed once and never change. Only [`Variant::info`] is mutable, and
/// stages take the whole `Vec<Variant>` by value and hand back the enriched
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "VariantFields")]
pub struct Variant {
    chrom: String,
    pos: u64,
    #[serde(rename = "ref")]
    reference: String,
    alts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qual: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genotype: Option<String>,
    #[serde(default)]
    pub info: VariantInfo,
    id: String,
    variant_type: VariantType,
}

/// Wire shape of a variant. Derived fields in the input are ignored and
/// recomputed.
#[derive(Deserialize)]
struct VariantFields {
    chrom: String,
    pos: u64,
    #[serde(rename = "ref")]
    reference: String,
    alts: Vec<String>,
    #[serde(default)]
    qual: Option<f64>,
    #[serde(default)]
    filter: Vec<String>,
    #[serde(default)]
    genotype: Option<String>,
    #[serde(default)]
    info: VariantInfo,
}

impl From<VariantFields> for Variant {
    fn from(f: VariantFields) -> Self {
        let mut v = Variant::new(f.chrom, f.pos, f.reference, f.alts);
        v.qual = f.qual;
        v.filter = f.filter;
        v.genotype = f.genotype;
        v.info = f.info;
        v
    }
}

impl Variant {
    pub fn new(
        chrom: impl Into<String>,
        pos: u64,
        reference: impl Into<String>,
        alts: Vec<String>,
    ) -> Self {
        let chrom = chrom.into();
        let reference = reference.into();
        let id = format!("{chrom}:{pos}:{reference}>{}", alts.join(","));
        let variant_type = if reference.len() == 1 && alts.iter().all(|a| a.len() == 1) {
            VariantType::Snv
        } else {
            VariantType::Indel
        };
        Self {
            chrom,
            pos,
            reference,
            alts,
            qual: None,
            filter: Vec::new(),
            genotype: None,
            info: VariantInfo::default(),
            id,
            variant_type,
        }
    }

    /// `chrom:pos:ref>alt1,alt2`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn variant_type(&self) -> VariantType {
        self.variant_type
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    /// Chromosome name without a leading `chr`.
    pub fn bare_chrom(&self) -> &str {
        self.chrom.strip_prefix("chr").unwrap_or(&self.chrom)
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn alts(&self) -> &[String] {
        &self.alts
    }

    /// First alternate allele, used for single-allele lookups.
    pub fn primary_alt(&self) -> Option<&str> {
        self.alts.first().map(String::as_str)
    }

    pub fn gene(&self) -> Option<&str> {
        self.info.gene.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// Where an annotation came from. Earlier variants take precedence when
/// merging: a curated record is never overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationSource {
    /// Local curated index snapshot.
    CuratedDatabase,
    /// Remote curated lookup (degraded mode).
    CuratedRemote,
    RuleEngine,
}

/// The canonical per-variant record in the merged annotation map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub variant_id: String,
    pub source: AnnotationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_significance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allele_frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homozygote_count: Option<u64>,
    /// Rule-engine evidence codes (e.g. `PVS1`, `PM2`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub annotated_at: DateTime<Utc>,
}

impl Annotation {
    /// An empty record for `variant_id` from `source`.
    pub fn new(variant_id: impl Into<String>, source: AnnotationSource) -> Self {
        Self {
            variant_id: variant_id.into(),
            source,
            clinical_significance: None,
            review_status: None,
            conditions: Vec::new(),
            gene_symbol: None,
            transcript_id: None,
            consequences: Vec::new(),
            impact: None,
            ai_score: None,
            ai_class: None,
            allele_frequency: None,
            homozygote_count: None,
            evidence_codes: Vec::new(),
            rationale: None,
            annotated_at: Utc::now(),
        }
    }

    pub fn is_pathogenic(&self) -> bool {
        self.clinical_significance
            .as_deref()
            .is_some_and(is_pathogenic_significance)
    }
}

/// Pathogenic or likely pathogenic, in any of the spellings the sources use
/// (`Pathogenic/Likely_pathogenic`, `Likely pathogenic`, ...). Uncertain and
/// conflicting calls never count.
pub fn is_pathogenic_significance(significance: &str) -> bool {
    let s = significance.to_lowercase();
    s.contains("pathogenic") && !s.contains("uncertain") && !s.contains("conflicting")
}

// ---------------------------------------------------------------------------
// Population frequency
// ---------------------------------------------------------------------------

/// Which population-frequency dataset supplied a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetGeneration {
    #[serde(rename = "gnomAD_v3")]
    Current,
    #[serde(rename = "gnomAD_v2")]
    Legacy,
}

impl std::fmt::Display for DatasetGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => f.write_str("gnomAD_v3"),
            Self::Legacy => f.write_str("gnomAD_v2"),
        }
    }
}

/// Per-subpopulation allele frequencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationFrequencies {
    pub afr: f64,
    pub amr: f64,
    pub asj: f64,
    pub eas: f64,
    pub fin: f64,
    pub nfe: f64,
    /// Absent from the legacy generation; 0 there.
    pub sas: f64,
    pub oth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRecord {
    /// Global allele frequency.
    pub af: f64,
    /// Allele count.
    pub ac: u64,
    /// Allele number.
    pub an: u64,
    pub populations: PopulationFrequencies,
    pub hom_count: u64,
    pub source: DatasetGeneration,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Gene-set restriction mode for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Fixed medically actionable gene panel only.
    #[default]
    Restricted,
    /// All genes.
    Unrestricted,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restricted => f.write_str("restricted"),
            Self::Unrestricted => f.write_str("unrestricted"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = crate::VariantFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "restricted" | "clinical" => Ok(Self::Restricted),
            "unrestricted" | "research" => Ok(Self::Unrestricted),
            other => Err(crate::VariantFlowError::validation(format!(
                "unknown scope: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed moves: pending -> running -> {completed, failed}, plus
    /// pending -> failed for tasks that die before starting. Re-asserting the
    /// current non-terminal status is allowed (partial updates).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Completed | Self::Failed, _) => false,
            (Self::Pending, Self::Pending | Self::Running | Self::Failed) => true,
            (Self::Running, Self::Running | Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::VariantFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::VariantFlowError::validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Which worker stage a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the annotation tool over the imported variants.
    Annotation,
    /// Knowledge retrieval, classification and synthesis over annotated variants.
    Report,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Annotation => "annotation",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = crate::VariantFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "annotation" => Ok(Self::Annotation),
            "report" => Ok(Self::Report),
            other => Err(crate::VariantFlowError::validation(format!(
                "unknown task kind: {other}"
            ))),
        }
    }
}

/// Identifies who a task belongs to and how to scope it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub session_id: String,
    pub user_id: String,
    pub app_name: String,
    #[serde(default)]
    pub scope: Scope,
}

impl TaskContext {
    /// Every identifier must be non-empty for a worker to locate artifacts.
    pub fn validate(&self) -> crate::Result<()> {
        let missing: Vec<&str> = [
            ("session_id", &self.session_id),
            ("user_id", &self.user_id),
            ("app_name", &self.app_name),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::VariantFlowError::validation(format!(
                "incomplete task context: missing {}",
                missing.join(", ")
            )))
        }
    }
}

/// Batch progress counters written at checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current_batch: usize,
    pub total_batches: usize,
    pub progress_pct: f64,
    #[serde(default)]
    pub variants_processed: usize,
    #[serde(default)]
    pub total_variants: usize,
}

impl TaskProgress {
    pub fn at_batch(
        current_batch: usize,
        total_batches: usize,
        variants_processed: usize,
        total_variants: usize,
    ) -> Self {
        let progress_pct = if total_batches == 0 {
            100.0
        } else {
            (current_batch as f64 / total_batches as f64 * 1000.0).round() / 10.0
        };
        Self {
            current_batch,
            total_batches,
            progress_pct,
            variants_processed,
            total_variants,
        }
    }
}

/// Output payload of a completed report task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub annotations_artifact: String,
    pub annotated_variants_artifact: String,
    pub scope: Scope,
    pub pathogenic_count: usize,
    pub total_annotations: usize,
    pub total_variants: usize,
    pub total_variants_considered: usize,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub key_findings: Vec<String>,
    /// Panel version, restricted scope only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_version: Option<String>,
    /// Distinct genes with reportable findings, restricted scope only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genes_reported: Option<usize>,
    pub completed_at: DateTime<Utc>,
}

/// A durable task document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Observability-only sub-state while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub context: TaskContext,
    pub input_artifact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial task update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub phase: Option<String>,
    pub output_artifact: Option<String>,
    pub progress: Option<TaskProgress>,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::default()
        }
    }

    pub fn progress(progress: TaskProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_output_artifact(mut self, name: impl Into<String>) -> Self {
        self.output_artifact = Some(name.into());
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Session metadata
// ---------------------------------------------------------------------------

/// Longest summary kept on a session record, in characters.
pub const SESSION_SUMMARY_MAX_CHARS: usize = 500;

/// Where a session stands across its annotation and report tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Annotation finished; waiting on a report.
    Analyzing,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::VariantFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analyzing" => Ok(Self::Analyzing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(crate::VariantFlowError::parse(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

/// Display and query summary of one session, refreshed whenever one of its
/// tasks finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub user_id: String,
    pub app_name: String,
    pub scope: Scope,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathogenic_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations_count: Option<usize>,
    /// At most [`SESSION_SUMMARY_MAX_CHARS`] characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Message of the most recent failure; cleared by the next success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMetadata {
    /// First record for `context`, before any update is folded in.
    pub fn new(context: &TaskContext, status: SessionStatus) -> Self {
        let now = Utc::now();
        Self {
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            app_name: context.app_name.clone(),
            scope: context.scope,
            status,
            annotation_task: None,
            annotation_status: None,
            report_task: None,
            report_status: None,
            variant_count: None,
            pathogenic_count: None,
            annotations_count: None,
            summary: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a finished task into the record. Counts the update leaves
    /// unset keep their previous values.
    pub fn apply(&mut self, scope: Scope, update: SessionUpdate) {
        self.status = update.session_status();
        self.scope = scope;
        match update.kind {
            TaskKind::Annotation => {
                self.annotation_task = Some(update.task_id);
                self.annotation_status = Some(update.task_status);
            }
            TaskKind::Report => {
                self.report_task = Some(update.task_id);
                self.report_status = Some(update.task_status);
            }
        }
        if let Some(n) = update.variant_count {
            self.variant_count = Some(n);
        }
        if let Some(n) = update.pathogenic_count {
            self.pathogenic_count = Some(n);
        }
        if let Some(n) = update.annotations_count {
            self.annotations_count = Some(n);
        }
        if let Some(summary) = update.summary {
            self.summary = Some(summary.chars().take(SESSION_SUMMARY_MAX_CHARS).collect());
        }
        self.error = update.error;
        self.updated_at = Utc::now();
    }
}

/// What one finished task contributes to its session record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// `completed` or `failed`.
    pub task_status: TaskStatus,
    pub variant_count: Option<usize>,
    pub pathogenic_count: Option<usize>,
    pub annotations_count: Option<usize>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn completed(task_id: &TaskId, kind: TaskKind) -> Self {
        Self::finished(task_id, kind, TaskStatus::Completed)
    }

    pub fn failed(task_id: &TaskId, kind: TaskKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::finished(task_id, kind, TaskStatus::Failed)
        }
    }

    fn finished(task_id: &TaskId, kind: TaskKind, task_status: TaskStatus) -> Self {
        Self {
            task_id: task_id.clone(),
            kind,
            task_status,
            variant_count: None,
            pathogenic_count: None,
            annotations_count: None,
            summary: None,
            error: None,
        }
    }

    pub fn with_variant_count(mut self, n: usize) -> Self {
        self.variant_count = Some(n);
        self
    }

    pub fn with_pathogenic_count(mut self, n: usize) -> Self {
        self.pathogenic_count = Some(n);
        self
    }

    pub fn with_annotations_count(mut self, n: usize) -> Self {
        self.annotations_count = Some(n);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Any failure puts the session in `error`. A finished annotation leaves
    /// it `analyzing` until the report lands.
    pub fn session_status(&self) -> SessionStatus {
        match (self.task_status, self.kind) {
            (TaskStatus::Failed, _) => SessionStatus::Error,
            (_, TaskKind::Annotation) => SessionStatus::Analyzing,
            (_, TaskKind::Report) => SessionStatus::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alts(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn variant_id_and_type() {
        let snv = Variant::new("chr17", 43044295, "G", alts(&["A"]));
        assert_eq!(snv.id(), "chr17:43044295:G>A");
        assert_eq!(snv.variant_type(), VariantType::Snv);

        let multi = Variant::new("1", 100, "A", alts(&["C", "T"]));
        assert_eq!(multi.id(), "1:100:A>C,T");
        assert_eq!(multi.variant_type(), VariantType::Snv);

        let del = Variant::new("1", 100, "AT", alts(&["A"]));
        assert_eq!(del.variant_type(), VariantType::Indel);

        let ins = Variant::new("1", 100, "A", alts(&["C", "AT"]));
        assert_eq!(ins.variant_type(), VariantType::Indel);
    }

    #[test]
    fn variant_deserialize_recomputes_derived_fields() {
        let json = r#"{"chrom":"2","pos":5,"ref":"C","alts":["G"],"id":"bogus","variant_type":"INDEL"}"#;
        let v: Variant = serde_json::from_str(json).expect("deserialize");
        assert_eq!(v.id(), "2:5:C>G");
        assert_eq!(v.variant_type(), VariantType::Snv);

        let out = serde_json::to_value(&v).expect("serialize");
        assert_eq!(out["id"], "2:5:C>G");
        assert_eq!(out["variant_type"], "SNV");
        assert_eq!(out["ref"], "C");
    }

    #[test]
    fn bare_chrom_strips_prefix() {
        assert_eq!(Variant::new("chrX", 1, "A", alts(&["G"])).bare_chrom(), "X");
        assert_eq!(Variant::new("7", 1, "A", alts(&["G"])).bare_chrom(), "7");
    }

    #[test]
    fn impact_ordering() {
        let worst = [Impact::Low, Impact::High, Impact::Modifier]
            .into_iter()
            .max();
        assert_eq!(worst, Some(Impact::High));
        assert_eq!("moderate".parse::<Impact>().unwrap(), Impact::Moderate);
        assert!("SEVERE".parse::<Impact>().is_err());
    }

    #[test]
    fn pathogenic_significance_matching() {
        assert!(is_pathogenic_significance("Pathogenic/Likely_pathogenic"));
        assert!(is_pathogenic_significance("Likely pathogenic"));
        assert!(!is_pathogenic_significance("Uncertain_significance"));
        assert!(!is_pathogenic_significance("Benign/Likely_benign"));
        assert!(!is_pathogenic_significance(
            "Conflicting classifications of pathogenicity"
        ));
    }

    #[test]
    fn status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Completed));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn progress_percentage() {
        let p = TaskProgress::at_batch(1, 3, 5000, 12000);
        assert_eq!(p.progress_pct, 33.3);
        assert_eq!(TaskProgress::at_batch(0, 0, 0, 0).progress_pct, 100.0);
    }

    #[test]
    fn context_validation() {
        let ctx = TaskContext {
            session_id: "s".into(),
            user_id: "".into(),
            app_name: "app".into(),
            scope: Scope::Restricted,
        };
        let err = ctx.validate().unwrap_err();
        assert!(err.to_string().contains("user_id"));
    }

    #[test]
    fn scope_aliases() {
        assert_eq!("clinical".parse::<Scope>().unwrap(), Scope::Restricted);
        assert_eq!("research".parse::<Scope>().unwrap(), Scope::Unrestricted);
        assert!("everything".parse::<Scope>().is_err());
    }

    #[test]
    fn annotation_source_tags() {
        let json = serde_json::to_string(&AnnotationSource::CuratedDatabase).unwrap();
        assert_eq!(json, "\"curated_database\"");
        assert!(serde_json::from_str::<AnnotationSource>("\"rule_engine\"").is_ok());
        assert!(serde_json::from_str::<AnnotationSource>("\"ai_predictor\"").is_err());
    }

    fn session_context() -> TaskContext {
        TaskContext {
            session_id: "s1".into(),
            user_id: "u1".into(),
            app_name: "app".into(),
            scope: Scope::Restricted,
        }
    }

    #[test]
    fn session_follows_stage_outcomes() {
        let mut meta = SessionMetadata::new(&session_context(), SessionStatus::Analyzing);
        let annotation = TaskId::from("a1");
        meta.apply(
            Scope::Restricted,
            SessionUpdate::completed(&annotation, TaskKind::Annotation).with_variant_count(120),
        );
        assert_eq!(meta.status, SessionStatus::Analyzing);
        assert_eq!(meta.annotation_task.as_ref(), Some(&annotation));
        assert_eq!(meta.annotation_status, Some(TaskStatus::Completed));

        let report = TaskId::from("r1");
        meta.apply(
            Scope::Restricted,
            SessionUpdate::failed(&report, TaskKind::Report, "frequency lookup failed"),
        );
        assert_eq!(meta.status, SessionStatus::Error);
        assert_eq!(meta.report_status, Some(TaskStatus::Failed));
        assert_eq!(meta.error.as_deref(), Some("frequency lookup failed"));

        let retry = TaskId::from("r2");
        meta.apply(
            Scope::Unrestricted,
            SessionUpdate::completed(&retry, TaskKind::Report)
                .with_pathogenic_count(3)
                .with_annotations_count(40),
        );
        assert_eq!(meta.status, SessionStatus::Completed);
        assert_eq!(meta.scope, Scope::Unrestricted);
        assert_eq!(meta.report_task.as_ref(), Some(&retry));
        assert_eq!(meta.variant_count, Some(120));
        assert_eq!(meta.pathogenic_count, Some(3));
        assert!(meta.error.is_none());
    }

    #[test]
    fn session_summary_is_truncated() {
        let mut meta = SessionMetadata::new(&session_context(), SessionStatus::Analyzing);
        meta.apply(
            Scope::Restricted,
            SessionUpdate::completed(&TaskId::from("r1"), TaskKind::Report)
                .with_summary("é".repeat(SESSION_SUMMARY_MAX_CHARS + 20)),
        );
        let summary = meta.summary.unwrap();
        assert_eq!(summary.chars().count(), SESSION_SUMMARY_MAX_CHARS);
        assert_eq!("completed".parse::<SessionStatus>().unwrap(), SessionStatus::Completed);
    }

    #[test]
    fn frequency_generation_tags() {
        let json = serde_json::to_string(&DatasetGeneration::Legacy).unwrap();
        assert_eq!(json, "\"gnomAD_v2\"");
    }
}
