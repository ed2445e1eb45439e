//! Pathogenicity Rule Engine: evidence-scoring classification and
//! gene-scope reporting rules.

pub mod classifier;
pub mod panel;
pub mod reporting;

pub use classifier::{
    Classification, ClassificationResult, RuleEngineStats, apply_rule_engine, classify,
};
pub use panel::{GeneCategory, GenePanel, GeneRule, PanelStats};
pub use reporting::{apply_reporting_rules, filter_variants_to_panel, group_by_gene};
