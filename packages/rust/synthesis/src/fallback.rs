//! Deterministic assessments that need no inference service.

use std::collections::HashSet;

use variantflow_shared::Scope;

use crate::findings::{FindingStats, PathogenicFinding, join_first};
use crate::synthesizer::Assessment;

/// Canned assessment for a run with no pathogenic findings.
pub fn no_findings_assessment(scope: Scope) -> Assessment {
    let (summary, recommendations) = match scope {
        Scope::Restricted => (
            "No pathogenic or likely pathogenic variants were identified in ACMG secondary findings genes.",
            vec![
                "No secondary findings requiring immediate action.",
                "Continue clinical management based on primary indication for testing.",
            ],
        ),
        Scope::Unrestricted => (
            "No pathogenic or likely pathogenic variants were identified in this comprehensive genomic analysis.",
            vec!["Continue clinical management based on phenotype."],
        ),
    };
    Assessment {
        summary: summary.to_string(),
        recommendations: recommendations.into_iter().map(String::from).collect(),
        key_findings: vec!["No pathogenic variants detected.".to_string()],
    }
}

/// Counting-statistics assessment used when inference is unavailable or
/// yields nothing usable.
pub fn fallback_assessment(findings: &[PathogenicFinding], scope: Scope) -> Assessment {
    let stats = FindingStats::new(findings);
    let multiple: Vec<String> = stats
        .genes_with_multiple()
        .into_iter()
        .map(|(g, _)| g)
        .collect();
    let total = findings.len();
    let gene_count = stats.genes.len();

    match scope {
        Scope::Restricted => {
            let mut summary = format!(
                "ACMG Secondary Findings Analysis: Identified {total} pathogenic/likely pathogenic variants in {gene_count} ACMG-reportable genes. "
            );
            if !multiple.is_empty() {
                summary.push_str(&format!(
                    "Genes with multiple variants requiring special attention: {}. ",
                    join_first(&multiple, 5)
                ));
            }
            summary.push_str(
                "These findings require clinical follow-up as they represent medically actionable incidental findings.",
            );

            Assessment {
                summary,
                recommendations: [
                    "1. Immediate genetic counseling for all ACMG secondary findings",
                    "2. Initiate surveillance protocols for cancer predisposition genes if present",
                    "3. Cardiology referral for cardiovascular gene variants",
                    "4. Cascade testing for first-degree relatives",
                    "5. Document findings in medical record for longitudinal care",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                key_findings: vec![
                    format!("Total ACMG secondary findings: {total} variants"),
                    format!(
                        "Genes requiring action: {}",
                        join_first(stats.genes.keys(), 10)
                    ),
                    "Medical follow-up required per ACMG SF v3.3 guidelines".to_string(),
                ],
            }
        }
        Scope::Unrestricted => {
            let mut summary = format!(
                "Comprehensive Genomic Analysis: Identified {total} pathogenic/likely pathogenic variants across {gene_count} genes. "
            );
            if !multiple.is_empty() {
                summary.push_str(&format!(
                    "Genes with multiple variants: {}. ",
                    join_first(&multiple, 10)
                ));
            }
            summary.push_str(
                "This research-level analysis requires expert interpretation and is not for clinical use.",
            );

            let categories: HashSet<&str> = findings.iter().map(|f| f.category.as_str()).collect();
            let first = if multiple.is_empty() {
                "1. Priority investigation for genes with multiple variants: none".to_string()
            } else {
                format!(
                    "1. Priority investigation for genes with multiple variants: {}",
                    join_first(&multiple, 5)
                )
            };

            Assessment {
                summary,
                recommendations: vec![
                    first,
                    "2. Consider pathway analysis for affected gene networks".to_string(),
                    "3. Evaluate variant burden against population databases".to_string(),
                    "4. Research consultation for novel findings".to_string(),
                    "5. Further functional studies may be warranted".to_string(),
                ],
                key_findings: vec![
                    format!("{} genes have multiple pathogenic variants", multiple.len()),
                    format!("Total genetic burden: {total} pathogenic variants"),
                    format!("Affected genes span {} categories", categories.len()),
                ],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, gene: &str, category: &str) -> PathogenicFinding {
        PathogenicFinding {
            variant_id: id.into(),
            gene: Some(gene.into()),
            significance: "Pathogenic".into(),
            condition: None,
            category: category.into(),
        }
    }

    fn three_in_two_genes() -> Vec<PathogenicFinding> {
        vec![
            finding("v1", "BRCA2", "Cancer predisposition"),
            finding("v2", "TTN", "Cardiovascular disease"),
            finding("v3", "BRCA2", "Cancer predisposition"),
        ]
    }

    #[test]
    fn restricted_fallback_reflects_counts() {
        let a = fallback_assessment(&three_in_two_genes(), Scope::Restricted);
        assert_eq!(
            a.summary,
            "ACMG Secondary Findings Analysis: Identified 3 pathogenic/likely pathogenic variants \
             in 2 ACMG-reportable genes. Genes with multiple variants requiring special attention: \
             BRCA2. These findings require clinical follow-up as they represent medically \
             actionable incidental findings."
        );
        assert_eq!(a.recommendations.len(), 5);
        assert_eq!(
            a.key_findings,
            vec![
                "Total ACMG secondary findings: 3 variants",
                "Genes requiring action: BRCA2, TTN",
                "Medical follow-up required per ACMG SF v3.3 guidelines",
            ]
        );
    }

    #[test]
    fn unrestricted_fallback_reflects_counts() {
        let a = fallback_assessment(&three_in_two_genes(), Scope::Unrestricted);
        assert!(a.summary.contains("across 2 genes"));
        assert!(a.summary.contains("Genes with multiple variants: BRCA2."));
        assert_eq!(
            a.recommendations[0],
            "1. Priority investigation for genes with multiple variants: BRCA2"
        );
        assert_eq!(
            a.key_findings,
            vec![
                "1 genes have multiple pathogenic variants",
                "Total genetic burden: 3 pathogenic variants",
                "Affected genes span 2 categories",
            ]
        );
    }

    #[test]
    fn fallback_is_deterministic_and_non_empty() {
        let f = three_in_two_genes();
        for scope in [Scope::Restricted, Scope::Unrestricted] {
            let a = fallback_assessment(&f, scope);
            assert_eq!(a, fallback_assessment(&f, scope));
            assert!(!a.summary.is_empty());
            assert!(!a.recommendations.is_empty());
            assert!(!a.key_findings.is_empty());
        }
    }

    #[test]
    fn single_gene_omits_multiple_clause() {
        let a = fallback_assessment(&[finding("v1", "APC", "Cancer predisposition")], Scope::Restricted);
        assert!(!a.summary.contains("multiple"));
    }

    #[test]
    fn unrestricted_without_repeated_genes_has_no_empty_clause() {
        let f = [
            finding("v1", "APC", "Cancer predisposition"),
            finding("v2", "TTN", "Cardiovascular disease"),
        ];
        let a = fallback_assessment(&f, Scope::Unrestricted);
        assert_eq!(
            a.recommendations[0],
            "1. Priority investigation for genes with multiple variants: none"
        );
        assert!(a.recommendations.iter().all(|r| !r.trim_end().ends_with(':')));
        assert!(a.key_findings.iter().all(|k| !k.trim_end().ends_with(':')));
    }

    #[test]
    fn canned_no_findings() {
        let r = no_findings_assessment(Scope::Restricted);
        assert_eq!(r.recommendations.len(), 2);
        assert_eq!(r.key_findings, vec!["No pathogenic variants detected."]);
        let u = no_findings_assessment(Scope::Unrestricted);
        assert_eq!(
            u.recommendations,
            vec!["Continue clinical management based on phenotype."]
        );
    }
}
