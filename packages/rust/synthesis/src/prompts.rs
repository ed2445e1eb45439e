//! Scope-dependent prompt text.

use serde_json::Value;
use variantflow_shared::Scope;

use crate::findings::{FindingStats, PathogenicFinding};
use crate::synthesizer::MergedExtracts;

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

fn first<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    items.iter().take(n).cloned().collect()
}

fn gene_map(entries: &[(String, usize)]) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(g, n)| (g.clone(), Value::from(*n)))
            .collect(),
    )
}

/// Per-batch structured extraction prompt.
pub fn batch_prompt(
    scope: Scope,
    batch: &[PathogenicFinding],
    batch_num: usize,
    total_batches: usize,
) -> String {
    let context = match scope {
        Scope::Restricted => {
            "You are analyzing ACMG secondary findings (SF v3.3) - medically actionable incidental findings."
        }
        Scope::Unrestricted => {
            "You are performing comprehensive genomic analysis for research purposes."
        }
    };

    format!(
        r#"{context}

**Pathogenic Variants in batch {batch_num} of {total_batches}:**
{variants}

Provide your response as a JSON object with these keys:
- "clinical_findings": List of important clinical findings from this batch
- "genes_in_batch": List of unique genes in this batch
- "conditions_in_batch": List of conditions associated with variants in this batch
- "actionable_items": List of actionable recommendations from this batch
- "variant_interactions": Any notable interactions or patterns within this batch"#,
        variants = pretty(batch),
    )
}

/// Final summarization prompt over the merged batch extracts.
pub fn final_prompt(
    scope: Scope,
    findings: &[PathogenicFinding],
    stats: &FindingStats,
    merged: &MergedExtracts,
) -> String {
    match scope {
        Scope::Restricted => restricted_prompt(findings, stats, merged),
        Scope::Unrestricted => unrestricted_prompt(findings, stats, merged),
    }
}

fn restricted_prompt(
    findings: &[PathogenicFinding],
    stats: &FindingStats,
    merged: &MergedExtracts,
) -> String {
    let multiple = stats.genes_with_multiple();
    let action_genes: Vec<&str> = multiple.iter().map(|(g, _)| g.as_str()).collect();

    format!(
        r#"You are a clinical geneticist reporting ACMG Secondary Findings (SF v3.3).
These are medically actionable incidental findings from clinical sequencing.

**ACMG SECONDARY FINDINGS ANALYSIS:**
- Total pathogenic/likely pathogenic variants in ACMG genes: {total}
- Unique ACMG genes with findings: {genes}
- Genes with multiple variants (possible compound heterozygosity): {multiple}

**KEY PATTERNS:**
- Most common conditions: {conditions}
- Genes requiring immediate action: {action_genes}

**BATCH ANALYSIS RESULTS:**
- Clinical findings: {finding_count} total findings
- Sample findings: {sample}
- Actionable items identified: {actionable}

**YOUR TASK:**
Generate a clinical report focusing on:
1. IMMEDIATE medical actions needed for these secondary findings
2. Cascade testing recommendations for family members
3. Surveillance/screening protocols based on ACMG guidelines
4. Clear prioritization by clinical urgency

Remember: These are SECONDARY findings - discovered incidentally but require action.

Return as JSON with three keys:
- "clinical_summary": Brief summary emphasizing actionable findings
- "actionable_recommendations": Specific, prioritized clinical actions
- "critical_key_findings": Most urgent findings requiring immediate attention"#,
        total = findings.len(),
        genes = stats.genes.len(),
        multiple = pretty(&gene_map(&multiple)),
        conditions = pretty(&stats.conditions.most_common(5)),
        action_genes = pretty(&action_genes),
        finding_count = merged.findings.len(),
        sample = pretty(&first(&merged.findings, 10)),
        actionable = pretty(&first(&merged.actionable, 10)),
    )
}

fn unrestricted_prompt(
    findings: &[PathogenicFinding],
    stats: &FindingStats,
    merged: &MergedExtracts,
) -> String {
    let high_burden: Vec<String> = stats.genes.above(2).into_iter().map(|(g, _)| g).collect();

    format!(
        r#"You are performing comprehensive genomic analysis for research purposes.

**COMPREHENSIVE GENOME ANALYSIS:**
- Total pathogenic/likely pathogenic variants: {total}
- Total unique genes affected: {genes}
- Total unique conditions: {conditions}

**CRITICAL PATTERN ANALYSIS:**
- Genes with multiple pathogenic variants: {multiple}
- Most frequent conditions (top 10): {top_conditions}
- High-burden genes (>2 variants): {high_burden}

**POPULATION FREQUENCY INSIGHTS:**
Consider population-specific disease risks, carrier frequencies, and founder mutations.

**BATCH ANALYSIS SYNTHESIS:**
- Total findings: {finding_count}
- Unique genes: {merged_genes}
- Variant interactions: {interactions}
- Research insights: {insights}

**YOUR TASK:**
Provide a comprehensive research assessment including:
1. Overall genetic burden and disease risk profile
2. Gene pathway analysis and potential interactions
3. Research implications and areas for further investigation
4. Population health considerations
5. Novel or unexpected findings

Note: This is for RESEARCH - be comprehensive but indicate this is not for clinical use.

Return as JSON with three keys:
- "clinical_summary": Comprehensive overview of genomic findings
- "actionable_recommendations": Research priorities and suggested investigations
- "critical_key_findings": Most significant research discoveries"#,
        total = findings.len(),
        genes = stats.genes.len(),
        conditions = stats.conditions.len(),
        multiple = pretty(&gene_map(&stats.genes_with_multiple())),
        top_conditions = pretty(&stats.conditions.most_common(10)),
        high_burden = pretty(&high_burden),
        finding_count = merged.findings.len(),
        merged_genes = merged.genes.len(),
        interactions = pretty(&first(&merged.interactions, 10)),
        insights = pretty(&first(&merged.actionable, 20)),
    )
}
