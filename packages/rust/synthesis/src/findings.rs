//! Pathogenic findings handed to synthesis, plus the counting statistics
//! shared by prompts and the fallback.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use variantflow_rules::GenePanel;
use variantflow_shared::Annotation;

/// Category used when a gene has none on the panel.
pub const UNCATEGORIZED: &str = "Other";

/// One pathogenic or likely pathogenic variant as seen by synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathogenicFinding {
    pub variant_id: String,
    pub gene: Option<String>,
    pub significance: String,
    /// Conditions joined with `"; "`.
    pub condition: Option<String>,
    pub category: String,
}

/// Collect the pathogenic findings in an annotation map.
pub fn collect_findings(
    annotations: &BTreeMap<String, Annotation>,
    panel: &GenePanel,
) -> Vec<PathogenicFinding> {
    annotations
        .values()
        .filter(|ann| ann.is_pathogenic())
        .map(|ann| {
            let category = ann
                .gene_symbol
                .as_deref()
                .and_then(|g| panel.category(g))
                .map_or(UNCATEGORIZED, |c| c.label());
            PathogenicFinding {
                variant_id: ann.variant_id.clone(),
                gene: ann.gene_symbol.clone(),
                significance: ann.clinical_significance.clone().unwrap_or_default(),
                condition: (!ann.conditions.is_empty()).then(|| ann.conditions.join("; ")),
                category: category.to_string(),
            }
        })
        .collect()
}

/// Occurrence counts in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    entries: Vec<(String, usize)>,
}

impl Tally {
    pub fn count<'a>(items: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut entries: Vec<(String, usize)> = Vec::new();
        for item in items {
            match index.get(item) {
                Some(&i) => entries[i].1 += 1,
                None => {
                    index.insert(item, entries.len());
                    entries.push((item.to_string(), 1));
                }
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries seen more than `min` times, in first-appearance order.
    pub fn above(&self, min: usize) -> Vec<(String, usize)> {
        self.entries
            .iter()
            .filter(|(_, n)| *n > min)
            .cloned()
            .collect()
    }

    /// The `n` most frequent entries; ties keep first-appearance order.
    pub fn most_common(&self, n: usize) -> Vec<(String, usize)> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(n);
        sorted
    }
}

/// Gene and condition statistics over a set of findings.
#[derive(Debug, Clone)]
pub struct FindingStats {
    pub genes: Tally,
    pub conditions: Tally,
}

impl FindingStats {
    pub fn new(findings: &[PathogenicFinding]) -> Self {
        Self {
            genes: Tally::count(findings.iter().filter_map(|f| f.gene.as_deref())),
            conditions: Tally::count(findings.iter().filter_map(|f| f.condition.as_deref())),
        }
    }

    pub fn genes_with_multiple(&self) -> Vec<(String, usize)> {
        self.genes.above(1)
    }
}

/// First `n` items joined with `", "`.
pub(crate) fn join_first<S: AsRef<str>>(items: impl IntoIterator<Item = S>, n: usize) -> String {
    items
        .into_iter()
        .take(n)
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use variantflow_shared::AnnotationSource;

    fn finding(id: &str, gene: &str, condition: Option<&str>) -> PathogenicFinding {
        PathogenicFinding {
            variant_id: id.into(),
            gene: Some(gene.into()),
            significance: "Pathogenic".into(),
            condition: condition.map(str::to_string),
            category: "Cancer predisposition".into(),
        }
    }

    #[test]
    fn tally_keeps_first_appearance_order() {
        let t = Tally::count(["TTN", "BRCA1", "TTN", "APC", "BRCA1", "TTN"]);
        assert_eq!(t.keys().collect::<Vec<_>>(), vec!["TTN", "BRCA1", "APC"]);
        assert_eq!(t.above(1), vec![("TTN".into(), 3), ("BRCA1".into(), 2)]);
        assert_eq!(t.most_common(2), vec![("TTN".into(), 3), ("BRCA1".into(), 2)]);
    }

    #[test]
    fn most_common_ties_are_stable() {
        let t = Tally::count(["b", "a", "c", "a", "b"]);
        assert_eq!(t.most_common(3), vec![("b".into(), 2), ("a".into(), 2), ("c".into(), 1)]);
    }

    #[test]
    fn collects_pathogenic_only() {
        let mut p = Annotation::new("v1", AnnotationSource::CuratedDatabase);
        p.clinical_significance = Some("Pathogenic/Likely_pathogenic".into());
        p.gene_symbol = Some("BRCA2".into());
        p.conditions = vec!["Breast cancer".into(), "Fanconi anemia".into()];

        let mut b = Annotation::new("v2", AnnotationSource::CuratedDatabase);
        b.clinical_significance = Some("Benign".into());

        let mut novel = Annotation::new("v3", AnnotationSource::RuleEngine);
        novel.clinical_significance = Some("Likely pathogenic".into());
        novel.gene_symbol = Some("CFTR".into());

        let map = BTreeMap::from([
            ("v1".to_string(), p),
            ("v2".to_string(), b),
            ("v3".to_string(), novel),
        ]);
        let findings = collect_findings(&map, &GenePanel::acmg_sf_v3_3());

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].category, "Cancer predisposition");
        assert_eq!(
            findings[0].condition.as_deref(),
            Some("Breast cancer; Fanconi anemia")
        );
        assert_eq!(findings[1].category, "Other");
        assert_eq!(findings[1].condition, None);
    }

    #[test]
    fn stats() {
        let f = vec![
            finding("1", "A", Some("x")),
            finding("2", "B", Some("x")),
            finding("3", "A", None),
        ];
        let s = FindingStats::new(&f);
        assert_eq!(s.genes.len(), 2);
        assert_eq!(s.genes_with_multiple(), vec![("A".into(), 2)]);
        assert_eq!(s.conditions.most_common(5), vec![("x".into(), 2)]);
        assert_eq!(join_first(s.genes.keys(), 1), "A");
    }
}
