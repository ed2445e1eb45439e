//! Rate-limited remote clinical significance lookup (NCBI E-utilities).
//!
//! This is the degraded-mode path used when no local snapshot is loaded:
//! calls are strictly sequential with a fixed delay before each variant, and
//! only the first `max_variants` variants of a task are looked up.

use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use variantflow_shared::{
    Annotation, AnnotationSource, ClinVarConfig, Result, Variant, VariantFlowError,
};

/// Fields pulled out of a VCV record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcvDetails {
    pub clinical_significance: Option<String>,
    pub review_status: Option<String>,
    pub conditions: Vec<String>,
    pub gene_symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    esearchresult: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// HTTP client for esearch/efetch.
#[derive(Debug, Clone)]
pub struct RemoteClinVar {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    request_delay: Duration,
    max_variants: usize,
}

impl RemoteClinVar {
    pub fn new(config: &ClinVarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("variantflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VariantFlowError::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            request_delay: Duration::from_millis(config.request_delay_ms),
            max_variants: config.max_remote_variants,
        })
    }

    pub fn max_variants(&self) -> usize {
        self.max_variants
    }

    /// Look up the first `max_variants` variants one at a time. Failures are
    /// logged per variant and never abort the loop.
    #[instrument(skip_all, fields(requested = variants.len(), cap = self.max_variants))]
    pub async fn annotate_all(&self, variants: &[Variant]) -> Vec<Annotation> {
        if variants.len() > self.max_variants {
            warn!(
                skipped = variants.len() - self.max_variants,
                "remote lookup capped, remaining variants left unannotated"
            );
        }

        let mut annotations = Vec::new();
        for variant in variants.iter().take(self.max_variants) {
            match self.annotate(variant).await {
                Ok(Some(ann)) => annotations.push(ann),
                Ok(None) => {}
                Err(e) => warn!(variant = variant.id(), error = %e, "remote lookup failed"),
            }
        }

        info!(found = annotations.len(), "remote clinical lookup finished");
        annotations
    }

    /// One variant: search by position, then fetch the first record found.
    pub async fn annotate(&self, variant: &Variant) -> Result<Option<Annotation>> {
        if variant.alts().is_empty() {
            return Ok(None);
        }

        tokio::time::sleep(self.request_delay).await;

        let term = format!("{}[CHR] AND {}[POS]", variant.bare_chrom(), variant.pos());
        let Some(id) = self.search(&term).await? else {
            debug!(variant = variant.id(), "no remote record");
            return Ok(None);
        };

        let xml = self.fetch(&id).await?;
        let details = parse_vcv_xml(&xml)?;

        let mut ann = Annotation::new(variant.id(), AnnotationSource::CuratedRemote);
        ann.clinical_significance = details.clinical_significance;
        ann.review_status = details.review_status;
        ann.conditions = details.conditions;
        ann.gene_symbol = details.gene_symbol;
        Ok(Some(ann))
    }

    async fn search(&self, term: &str) -> Result<Option<String>> {
        let mut params = vec![("db", "clinvar"), ("term", term), ("retmode", "json")];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        let resp = self
            .client
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| VariantFlowError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| VariantFlowError::Network(e.to_string()))?;

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| VariantFlowError::parse(format!("esearch response: {e}")))?;
        Ok(body.esearchresult.idlist.into_iter().next())
    }

    async fn fetch(&self, id: &str) -> Result<String> {
        let mut params = vec![
            ("db", "clinvar"),
            ("id", id),
            ("rettype", "vcv"),
            ("retmode", "xml"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        self.client
            .get(format!("{}/efetch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| VariantFlowError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| VariantFlowError::Network(e.to_string()))?
            .text()
            .await
            .map_err(|e| VariantFlowError::Network(e.to_string()))
    }
}

/// Parent elements that hold the germline classification, old and new schema.
const CLASSIFICATION_PARENTS: &[&str] = &["ClinicalSignificance", "GermlineClassification"];

/// Extract significance, review status, condition names and gene symbol.
///
/// The first matching element wins for single-valued fields; every
/// `TraitSet/Trait/Name/ElementValue` contributes a condition.
pub fn parse_vcv_xml(xml: &str) -> Result<VcvDetails> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut details = VcvDetails::default();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Gene" && details.gene_symbol.is_none() {
                    details.gene_symbol = symbol_attribute(&e);
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"Gene" && details.gene_symbol.is_none() {
                    details.gene_symbol = symbol_attribute(&e);
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| VariantFlowError::parse(format!("VCV XML text: {e}")))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                apply_text(&mut details, &path, text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(VariantFlowError::parse(format!(
                    "VCV XML at byte {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    Ok(details)
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn apply_text(details: &mut VcvDetails, path: &[String], text: String) {
    let under_classification = |leaf: &str| {
        CLASSIFICATION_PARENTS
            .iter()
            .any(|parent| ends_with(path, &[*parent, leaf]))
    };

    if under_classification("Description") {
        details.clinical_significance.get_or_insert(text);
    } else if under_classification("ReviewStatus") {
        details.review_status.get_or_insert(text);
    } else if ends_with(path, &["TraitSet", "Trait", "Name", "ElementValue"]) {
        details.conditions.push(text);
    } else if ends_with(path, &["Gene", "Symbol"]) {
        details.gene_symbol.get_or_insert(text);
    }
}

fn symbol_attribute(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.try_get_attribute("Symbol")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
        .filter(|v| !v.is_empty())
}
