//! Restricted-scope reporting rules.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};
use variantflow_shared::{Annotation, Variant};

use crate::panel::GenePanel;

/// Keep only variants whose gene is on the panel.
#[instrument(skip_all, fields(variants = variants.len(), panel = panel.version()))]
pub fn filter_variants_to_panel(variants: Vec<Variant>, panel: &GenePanel) -> Vec<Variant> {
    let total = variants.len();
    let mut genes_found = BTreeSet::new();

    let kept: Vec<Variant> = variants
        .into_iter()
        .filter(|v| match v.gene() {
            Some(gene) if panel.contains(gene) => {
                genes_found.insert(gene.to_uppercase());
                true
            }
            _ => false,
        })
        .collect();

    info!(
        total,
        kept = kept.len(),
        unique_genes = genes_found.len(),
        genes = ?genes_found,
        "filtered variants to panel genes"
    );
    kept
}

/// Group annotations by gene symbol. Records without a gene are left out.
pub fn group_by_gene(
    annotations: BTreeMap<String, Annotation>,
) -> BTreeMap<String, Vec<Annotation>> {
    let mut by_gene: BTreeMap<String, Vec<Annotation>> = BTreeMap::new();
    for ann in annotations.into_values() {
        if let Some(gene) = ann.gene_symbol.clone() {
            by_gene.entry(gene).or_default().push(ann);
        }
    }
    by_gene
}

/// Apply the panel's gene-scope rules and return the reportable records.
///
/// Per gene: drop non-panel and excluded genes, drop anything short of
/// pathogenic or likely pathogenic, and drop a recessive gene entirely when
/// fewer than two pathogenic records survive.
#[instrument(skip_all, fields(annotations = annotations.len()))]
pub fn apply_reporting_rules(
    annotations: BTreeMap<String, Annotation>,
    panel: &GenePanel,
) -> BTreeMap<String, Annotation> {
    let total = annotations.len();
    let mut reportable = BTreeMap::new();

    for (gene, anns) in group_by_gene(annotations) {
        if !panel.contains(&gene) {
            continue;
        }
        if panel.is_excluded(&gene) {
            debug!(gene, "gene excluded from reporting");
            continue;
        }

        let pathogenic: Vec<Annotation> = anns.into_iter().filter(Annotation::is_pathogenic).collect();
        if pathogenic.is_empty() {
            continue;
        }

        if panel.requires_two_variants(&gene) && pathogenic.len() < 2 {
            debug!(
                gene,
                found = pathogenic.len(),
                "recessive gene below two pathogenic variants"
            );
            continue;
        }

        for ann in pathogenic {
            reportable.insert(ann.variant_id.clone(), ann);
        }
    }

    info!(
        total,
        reportable = reportable.len(),
        "applied reporting rules"
    );
    reportable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::GeneCategory;
    use variantflow_shared::AnnotationSource;

    fn ann(id: &str, gene: &str, significance: &str) -> (String, Annotation) {
        let mut a = Annotation::new(id, AnnotationSource::CuratedDatabase);
        a.gene_symbol = Some(gene.to_string());
        a.clinical_significance = Some(significance.to_string());
        (id.to_string(), a)
    }

    fn genea_panel() -> GenePanel {
        GenePanel::new(
            "test",
            [("GENEA", GeneCategory::Other)],
            &["GENEA"],
            &[],
        )
    }

    #[test]
    fn allowlist_with_recessive_pair() {
        let input = BTreeMap::from([
            ann("a1", "GENEA", "Pathogenic"),
            ann("a2", "GENEA", "Likely_pathogenic"),
            ann("b1", "GENEB", "Pathogenic"),
        ]);
        let out = apply_reporting_rules(input, &genea_panel());
        let ids: Vec<_> = out.keys().cloned().collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[test]
    fn single_recessive_hit_drops_gene() {
        let input = BTreeMap::from([
            ann("a1", "GENEA", "Pathogenic"),
            ann("a2", "GENEA", "Uncertain_significance"),
        ]);
        assert!(apply_reporting_rules(input, &genea_panel()).is_empty());
    }

    #[test]
    fn vus_and_conflicting_never_reported() {
        let panel = GenePanel::acmg_sf_v3_3();
        let input = BTreeMap::from([
            ann("v1", "BRCA1", "Uncertain significance"),
            ann("v2", "BRCA1", "Conflicting_interpretations_of_pathogenicity"),
            ann("v3", "BRCA2", "Benign"),
            ann("v4", "TP53", "Likely pathogenic"),
        ]);
        let out = apply_reporting_rules(input, &panel);
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["v4"]);
    }

    #[test]
    fn hfe_always_excluded() {
        let panel = GenePanel::acmg_sf_v3_3();
        let input = BTreeMap::from([
            ann("h1", "HFE", "Pathogenic"),
            ann("h2", "HFE", "Pathogenic"),
        ]);
        assert!(apply_reporting_rules(input, &panel).is_empty());
    }

    #[test]
    fn records_without_gene_are_dropped() {
        let mut orphan = Annotation::new("x", AnnotationSource::RuleEngine);
        orphan.clinical_significance = Some("Pathogenic".into());
        let input = BTreeMap::from([("x".to_string(), orphan)]);
        assert!(apply_reporting_rules(input, &GenePanel::acmg_sf_v3_3()).is_empty());
    }

    #[test]
    fn filter_keeps_panel_genes_only() {
        let panel = GenePanel::new(
            "test",
            [("GENEA", GeneCategory::Cancer), ("GENEC", GeneCategory::Metabolic)],
            &[],
            &[],
        );
        let mk = |pos: u64, gene: Option<&str>| {
            let mut v = Variant::new("1", pos, "A", vec!["C".into()]);
            v.info.gene = gene.map(str::to_string);
            v
        };
        let kept = filter_variants_to_panel(
            vec![mk(1, Some("genea")), mk(2, Some("GENEB")), mk(3, None), mk(4, Some("GENEC"))],
            &panel,
        );
        let positions: Vec<u64> = kept.iter().map(Variant::pos).collect();
        assert_eq!(positions, vec![1, 4]);
    }
}
