//! Gene panel metadata for restricted-scope reporting.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Clinical category of a panel gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneCategory {
    Cancer,
    Cardiovascular,
    Metabolic,
    Other,
}

impl GeneCategory {
    pub const ALL: [GeneCategory; 4] = [
        Self::Cancer,
        Self::Cardiovascular,
        Self::Metabolic,
        Self::Other,
    ];

    /// Human-readable label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::Cancer => "Cancer predisposition",
            Self::Cardiovascular => "Cardiovascular disease",
            Self::Metabolic => "Inborn errors of metabolism",
            Self::Other => "Other conditions",
        }
    }
}

const SF_V3_3_VERSION: &str = "SF v3.3";

const SF_V3_3_CANCER: &[&str] = &[
    "APC", "RET", "BRCA1", "BRCA2", "PALB2", "SDHD", "SDHAF2", "SDHC", "SDHB", "MAX", "TMEM127",
    "BMPR1A", "SMAD4", "TP53", "MLH1", "MSH2", "MSH6", "PMS2", "MEN1", "MUTYH", "NF2", "STK11",
    "PTEN", "RB1", "TSC1", "TSC2", "VHL", "WT1",
];

const SF_V3_3_CARDIOVASCULAR: &[&str] = &[
    "FBN1", "TGFBR1", "TGFBR2", "SMAD3", "ACTA2", "MYH11", "PKP2", "DSP", "DSC2", "TMEM43", "DSG2",
    "RYR2", "CASQ2", "TRDN", "BAG3", "DES", "RBM20", "TNNC1", "TNNT2", "LMNA", "FLNC", "TTN",
    "CALM1", "CALM2", "CALM3", "COL3A1", "LDLR", "APOB", "PCSK9", "MYH7", "MYBPC3", "TNNI3",
    "TPM1", "MYL3", "ACTC1", "PRKAG2", "MYL2", "PLN", "KCNQ1", "KCNH2", "SCN5A",
];

const SF_V3_3_METABOLIC: &[&str] = &["BTD", "CYP27A1", "GLA", "OTC", "GAA"];

const SF_V3_3_OTHER: &[&str] = &[
    "ABCD1", "HFE", "ACVRL1", "ENG", "RYR1", "CACNA1S", "HNF1A", "RPE65", "ATP7B", "TTR",
];

/// Genes reportable only with two independent pathogenic variants.
const SF_V3_3_RECESSIVE: &[&str] = &["MUTYH", "BTD", "CYP27A1", "GAA", "RPE65", "ATP7B"];

/// Genes whose only reportable finding is one specific homozygous variant.
/// The zygosity check is not implemented, so these are never reported.
const SF_V3_3_EXCLUDED: &[&str] = &["HFE"];

/// Per-gene panel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneRule {
    pub category: GeneCategory,
    pub recessive: bool,
}

/// Counts logged when a restricted-scope report starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelStats {
    pub version: String,
    pub total_genes: usize,
    pub by_category: BTreeMap<GeneCategory, usize>,
    pub recessive_genes: usize,
    pub special_handling: usize,
}

/// An allowlist of genes with category and inheritance metadata.
///
/// Gene symbols are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct GenePanel {
    version: String,
    genes: BTreeMap<String, GeneRule>,
    excluded: BTreeSet<String>,
}

impl GenePanel {
    /// Build a panel from `(symbol, category)` pairs.
    pub fn new<'a>(
        version: impl Into<String>,
        genes: impl IntoIterator<Item = (&'a str, GeneCategory)>,
        recessive: &[&str],
        excluded: &[&str],
    ) -> Self {
        let recessive: BTreeSet<String> = recessive.iter().map(|g| g.to_uppercase()).collect();
        let genes = genes
            .into_iter()
            .map(|(symbol, category)| {
                let symbol = symbol.to_uppercase();
                let rule = GeneRule {
                    category,
                    recessive: recessive.contains(&symbol),
                };
                (symbol, rule)
            })
            .collect();
        Self {
            version: version.into(),
            genes,
            excluded: excluded.iter().map(|g| g.to_uppercase()).collect(),
        }
    }

    /// ACMG secondary findings list, v3.3: 84 genes.
    pub fn acmg_sf_v3_3() -> Self {
        let genes = [
            (SF_V3_3_CANCER, GeneCategory::Cancer),
            (SF_V3_3_CARDIOVASCULAR, GeneCategory::Cardiovascular),
            (SF_V3_3_METABOLIC, GeneCategory::Metabolic),
            (SF_V3_3_OTHER, GeneCategory::Other),
        ]
        .into_iter()
        .flat_map(|(symbols, category)| symbols.iter().map(move |s| (*s, category)));

        Self::new(SF_V3_3_VERSION, genes, SF_V3_3_RECESSIVE, SF_V3_3_EXCLUDED)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn rule(&self, gene: &str) -> Option<GeneRule> {
        self.genes.get(&gene.to_uppercase()).copied()
    }

    pub fn contains(&self, gene: &str) -> bool {
        self.rule(gene).is_some()
    }

    pub fn category(&self, gene: &str) -> Option<GeneCategory> {
        self.rule(gene).map(|r| r.category)
    }

    pub fn requires_two_variants(&self, gene: &str) -> bool {
        self.rule(gene).is_some_and(|r| r.recessive)
    }

    pub fn is_excluded(&self, gene: &str) -> bool {
        self.excluded.contains(&gene.to_uppercase())
    }

    pub fn stats(&self) -> PanelStats {
        let mut by_category = BTreeMap::new();
        for rule in self.genes.values() {
            *by_category.entry(rule.category).or_insert(0) += 1;
        }
        let recessive_genes = self.genes.values().filter(|r| r.recessive).count();
        PanelStats {
            version: self.version.clone(),
            total_genes: self.genes.len(),
            by_category,
            recessive_genes,
            special_handling: recessive_genes + self.excluded.len(),
        }
    }
}
