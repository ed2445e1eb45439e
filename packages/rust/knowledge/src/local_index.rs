//! In-memory clinical significance index built from a local ClinVar VCF
//! snapshot (plain or bgzipped).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::{debug, info, instrument};
use variantflow_shared::{Annotation, AnnotationSource, Result, Variant, VariantFlowError};

/// What the snapshot says about one `chrom:pos:ref>alt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinVarEntry {
    pub clinical_significance: String,
    pub gene_symbol: Option<String>,
    pub review_status: Option<String>,
    pub conditions: Vec<String>,
}

/// Preloaded snapshot keyed by `chrom:pos:ref>alt` (chromosome without `chr`).
#[derive(Debug, Default)]
pub struct LocalClinVarIndex {
    entries: HashMap<String, ClinVarEntry>,
}

impl LocalClinVarIndex {
    /// Load a snapshot on the blocking pool.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::load_blocking(&path))
            .await
            .map_err(|e| VariantFlowError::Storage(format!("index load task failed: {e}")))?
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_blocking(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| VariantFlowError::io(path, e))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        info!("loading local clinical significance index");
        let index = Self::from_reader(BufReader::new(reader))
            .map_err(|e| match e {
                VariantFlowError::Parse { message } => {
                    VariantFlowError::parse(format!("{}: {message}", path.display()))
                }
                other => other,
            })?;
        info!(entries = index.len(), "local clinical significance index loaded");
        Ok(index)
    }

    /// Parse VCF text. Header lines are skipped, as are records with fewer
    /// than eight columns.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = HashMap::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                VariantFlowError::parse(format!("read error at line {}: {e}", line_no + 1))
            })?;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            if fields.len() < 8 {
                debug!(line = line_no + 1, "skipping short index record");
                continue;
            }
            let (chrom, pos, reference, alts, info) =
                (fields[0], fields[1], fields[3], fields[4], fields[7]);

            let entry = parse_info(info);
            let chrom = chrom.strip_prefix("chr").unwrap_or(chrom);
            for alt in alts.split(',') {
                entries.insert(format!("{chrom}:{pos}:{reference}>{alt}"), entry.clone());
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look a variant up by its first alternate allele.
    pub fn lookup(&self, variant: &Variant) -> Option<&ClinVarEntry> {
        let alt = variant.primary_alt()?;
        let key = format!(
            "{}:{}:{}>{alt}",
            variant.bare_chrom(),
            variant.pos(),
            variant.reference()
        );
        self.entries.get(&key)
    }

    /// Curated annotation for `variant`, if the snapshot has one.
    pub fn annotate(&self, variant: &Variant) -> Option<Annotation> {
        self.lookup(variant).map(|entry| {
            let mut ann = Annotation::new(variant.id(), AnnotationSource::CuratedDatabase);
            ann.clinical_significance = Some(entry.clinical_significance.clone());
            ann.gene_symbol = entry.gene_symbol.clone();
            ann.review_status = entry.review_status.clone();
            ann.conditions = entry.conditions.clone();
            ann
        })
    }
}

fn parse_info(info: &str) -> ClinVarEntry {
    let mut clnsig = "";
    let mut gene = None;
    let mut review = None;
    let mut conditions = Vec::new();

    for field in info.split(';') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key {
            "CLNSIG" => clnsig = value,
            // GENEINFO=BRCA1:672|NBR2:10230
            "GENEINFO" => {
                gene = value
                    .split(':')
                    .next()
                    .filter(|g| !g.is_empty())
                    .map(str::to_string);
            }
            "CLNREVSTAT" => review = Some(value.replace('_', " ")),
            "CLNDN" => {
                conditions = value
                    .split('|')
                    .filter(|c| !matches!(*c, "not_provided" | "not_specified" | ""))
                    .map(|c| c.replace('_', " "))
                    .collect();
            }
            _ => {}
        }
    }

    ClinVarEntry {
        clinical_significance: simplify_significance(clnsig).to_string(),
        gene_symbol: gene,
        review_status: review,
        conditions,
    }
}

/// Collapse a raw `CLNSIG` into one of five buckets. Conflicting calls are
/// matched before the pathogenic test and never count as pathogenic.
pub fn simplify_significance(clnsig: &str) -> &'static str {
    let lower = clnsig.to_lowercase();
    if lower.contains("conflicting") {
        "Conflicting_interpretations"
    } else if lower.contains("pathogenic") {
        "Pathogenic/Likely_pathogenic"
    } else if lower.contains("benign") {
        "Benign/Likely_benign"
    } else if lower.contains("uncertain") {
        "Uncertain_significance"
    } else {
        "Not provided"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VCF: &str = "##fileformat=VCFv4.1\n\
##source=ClinVar\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
17\t43094464\t55501\tG\tA,T\t.\t.\tALLELEID=1;CLNDN=Hereditary_breast_ovarian_cancer_syndrome|not_provided;CLNREVSTAT=reviewed_by_expert_panel;CLNSIG=Pathogenic;GENEINFO=BRCA1:672\n\
2\t47403300\t9999\tC\tT\t.\t.\tCLNSIG=Likely_benign;GENEINFO=MSH2:4436\n\
3\t100\t1\tA\tG\t.\t.\tCLNSIG=Uncertain_significance\n\
4\t200\t2\tA\tC\t.\t.\tCLNSIG=drug_response\n\
short\tline\n";

    fn alts(a: &str) -> Vec<String> {
        vec![a.to_string()]
    }

    #[test]
    fn parses_records() {
        let index = LocalClinVarIndex::from_reader(VCF.as_bytes()).unwrap();
        assert_eq!(index.len(), 5);

        let brca = Variant::new("chr17", 43094464, "G", alts("T"));
        let entry = index.lookup(&brca).expect("indexed");
        assert_eq!(entry.clinical_significance, "Pathogenic/Likely_pathogenic");
        assert_eq!(entry.gene_symbol.as_deref(), Some("BRCA1"));
        assert_eq!(entry.review_status.as_deref(), Some("reviewed by expert panel"));
        assert_eq!(entry.conditions, vec!["Hereditary breast ovarian cancer syndrome"]);

        let msh2 = Variant::new("2", 47403300, "C", alts("T"));
        assert_eq!(
            index.lookup(&msh2).unwrap().clinical_significance,
            "Benign/Likely_benign"
        );

        let vus = Variant::new("3", 100, "A", alts("G"));
        let entry = index.lookup(&vus).unwrap();
        assert_eq!(entry.clinical_significance, "Uncertain_significance");
        assert!(entry.gene_symbol.is_none());

        let other = Variant::new("4", 200, "A", alts("C"));
        assert_eq!(index.lookup(&other).unwrap().clinical_significance, "Not provided");
    }

    #[test]
    fn lookup_uses_first_alt_only() {
        let index = LocalClinVarIndex::from_reader(VCF.as_bytes()).unwrap();
        let v = Variant::new("17", 43094464, "G", vec!["C".into(), "A".into()]);
        assert!(index.lookup(&v).is_none());
    }

    #[test]
    fn annotate_builds_curated_record() {
        let index = LocalClinVarIndex::from_reader(VCF.as_bytes()).unwrap();
        let v = Variant::new("17", 43094464, "G", alts("A"));
        let ann = index.annotate(&v).unwrap();
        assert_eq!(ann.variant_id, "17:43094464:G>A");
        assert_eq!(ann.source, AnnotationSource::CuratedDatabase);
        assert!(ann.is_pathogenic());
    }

    #[tokio::test]
    async fn loads_bgzipped_snapshot() {
        let path = std::env::temp_dir().join(format!("vf-clinvar-{}.vcf.gz", uuid::Uuid::now_v7()));
        // Two gzip members, like bgzip output.
        let (head, tail) = VCF.split_at(VCF.find("2\t47403300").unwrap());
        let mut bytes = Vec::new();
        for part in [head, tail] {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(part.as_bytes()).unwrap();
            bytes.extend(enc.finish().unwrap());
        }
        std::fs::write(&path, bytes).unwrap();

        let index = LocalClinVarIndex::load(&path).await.expect("load");
        assert_eq!(index.len(), 5);
    }

    #[tokio::test]
    async fn missing_snapshot_is_io_error() {
        let err = LocalClinVarIndex::load("/nonexistent/clinvar.vcf.gz")
            .await
            .unwrap_err();
        assert!(matches!(err, VariantFlowError::Io { .. }));
    }

    #[test]
    fn significance_buckets() {
        assert_eq!(
            simplify_significance("Pathogenic/Likely_pathogenic"),
            "Pathogenic/Likely_pathogenic"
        );
        assert_eq!(simplify_significance("Benign"), "Benign/Likely_benign");
        assert_eq!(simplify_significance(""), "Not provided");
        assert_eq!(
            simplify_significance("Conflicting_classifications_of_pathogenicity"),
            "Conflicting_interpretations"
        );
    }

    #[test]
    fn conflicting_record_is_not_pathogenic() {
        let line = "17\t43094464\t.\tG\tA\t.\t.\tCLNSIG=Conflicting_interpretations_of_pathogenicity;GENEINFO=BRCA1:672";
        let index = LocalClinVarIndex::from_reader(line.as_bytes()).unwrap();

        let ann = index
            .annotate(&Variant::new("chr17", 43094464, "G", alts("A")))
            .unwrap();
        assert_eq!(
            ann.clinical_significance.as_deref(),
            Some("Conflicting_interpretations")
        );
        assert_eq!(ann.gene_symbol.as_deref(), Some("BRCA1"));
        assert!(!ann.is_pathogenic());
    }
}
