//! Population allele frequencies across two dataset generations.
//!
//! Variants are grouped by canonical chromosome and queried in batches
//! against the current generation; anything not found there is re-queried
//! against the legacy generation, which has no South Asian bucket.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use variantflow_shared::{
    DatasetGeneration, FrequencyConfig, FrequencyRecord, PopulationFrequencies, Result, Variant,
    VariantFlowError,
};

/// Chromosomes with frequency data: 1-22, X, Y.
pub fn is_canonical_chromosome(chrom: &str) -> bool {
    match chrom {
        "X" | "Y" => true,
        _ => chrom.parse::<u8>().is_ok_and(|n| (1..=22).contains(&n)) && !chrom.starts_with('0'),
    }
}

/// One allele to look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrequencyQuery {
    pub pos: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub alt: String,
}

/// One result row. Missing numbers count as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRow {
    pub pos: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub alt: String,
    #[serde(default)]
    pub af: Option<f64>,
    #[serde(default)]
    pub ac: Option<u64>,
    #[serde(default)]
    pub an: Option<u64>,
    #[serde(default)]
    pub af_afr: Option<f64>,
    #[serde(default)]
    pub af_amr: Option<f64>,
    #[serde(default)]
    pub af_asj: Option<f64>,
    #[serde(default)]
    pub af_eas: Option<f64>,
    #[serde(default)]
    pub af_fin: Option<f64>,
    #[serde(default)]
    pub af_nfe: Option<f64>,
    #[serde(default)]
    pub af_sas: Option<f64>,
    #[serde(default)]
    pub af_oth: Option<f64>,
    #[serde(default)]
    pub hom_count: Option<u64>,
}

impl FrequencyRow {
    fn key(&self) -> (u64, &str, &str) {
        (self.pos, &self.reference, &self.alt)
    }

    /// Convert to a record tagged with the generation that supplied it.
    pub fn into_record(self, generation: DatasetGeneration) -> FrequencyRecord {
        let sas = match generation {
            DatasetGeneration::Current => self.af_sas.unwrap_or(0.0),
            DatasetGeneration::Legacy => 0.0,
        };
        FrequencyRecord {
            af: self.af.unwrap_or(0.0),
            ac: self.ac.unwrap_or(0),
            an: self.an.unwrap_or(0),
            populations: PopulationFrequencies {
                afr: self.af_afr.unwrap_or(0.0),
                amr: self.af_amr.unwrap_or(0.0),
                asj: self.af_asj.unwrap_or(0.0),
                eas: self.af_eas.unwrap_or(0.0),
                fin: self.af_fin.unwrap_or(0.0),
                nfe: self.af_nfe.unwrap_or(0.0),
                sas,
                oth: self.af_oth.unwrap_or(0.0),
            },
            hom_count: self.hom_count.unwrap_or(0),
            source: generation,
        }
    }
}

/// A population-frequency backend.
#[async_trait]
pub trait FrequencySource: Send + Sync {
    /// Rows for whichever of `queries` the dataset knows on `chrom`.
    async fn query(
        &self,
        generation: DatasetGeneration,
        chrom: &str,
        queries: &[FrequencyQuery],
    ) -> Result<Vec<FrequencyRow>>;
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    dataset: &'a str,
    chrom: &'a str,
    variants: &'a [FrequencyQuery],
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<FrequencyRow>,
}

/// JSON-over-HTTP frequency service.
///
/// `POST {endpoint}` with `{dataset, chrom, variants: [{pos, ref, alt}]}`,
/// answered by `{rows: [...]}`.
#[derive(Debug, Clone)]
pub struct HttpFrequencySource {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    current_dataset: String,
    legacy_dataset: String,
}

impl HttpFrequencySource {
    pub fn new(config: &FrequencyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VariantFlowError::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            current_dataset: config.current_dataset.clone(),
            legacy_dataset: config.legacy_dataset.clone(),
        })
    }

    fn dataset(&self, generation: DatasetGeneration) -> &str {
        match generation {
            DatasetGeneration::Current => &self.current_dataset,
            DatasetGeneration::Legacy => &self.legacy_dataset,
        }
    }
}

#[async_trait]
impl FrequencySource for HttpFrequencySource {
    async fn query(
        &self,
        generation: DatasetGeneration,
        chrom: &str,
        queries: &[FrequencyQuery],
    ) -> Result<Vec<FrequencyRow>> {
        let body = QueryRequest {
            dataset: self.dataset(generation),
            chrom,
            variants: queries,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| VariantFlowError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| VariantFlowError::Network(e.to_string()))?;

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| VariantFlowError::parse(format!("frequency response: {e}")))?;
        Ok(parsed.rows)
    }
}

/// Batched, two-generation frequency retrieval.
pub struct FrequencyRetriever {
    source: Arc<dyn FrequencySource>,
    batch_size: usize,
    max_variants: usize,
}

impl FrequencyRetriever {
    pub fn new(source: Arc<dyn FrequencySource>, batch_size: usize, max_variants: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            max_variants,
        }
    }

    pub fn from_config(source: Arc<dyn FrequencySource>, config: &FrequencyConfig) -> Self {
        Self::new(source, config.batch_size, config.max_variants)
    }

    /// Frequency records keyed by variant id.
    ///
    /// A failed batch is logged and skipped; the rest still run.
    #[instrument(skip_all, fields(variants = variants.len()))]
    pub async fn retrieve(&self, variants: &[Variant]) -> BTreeMap<String, FrequencyRecord> {
        let variants = if variants.len() > self.max_variants {
            warn!(
                max = self.max_variants,
                "limiting frequency lookup to the first variants"
            );
            &variants[..self.max_variants]
        } else {
            variants
        };

        // Group by chromosome, keeping first-seen order.
        let mut order: Vec<&str> = Vec::new();
        let mut by_chrom: HashMap<&str, Vec<&Variant>> = HashMap::new();
        for v in variants {
            let chrom = v.bare_chrom();
            if !is_canonical_chromosome(chrom) || v.primary_alt().is_none() {
                continue;
            }
            by_chrom
                .entry(chrom)
                .or_insert_with(|| {
                    order.push(chrom);
                    Vec::new()
                })
                .push(v);
        }

        let total_batches: usize = by_chrom
            .values()
            .map(|vs| vs.len().div_ceil(self.batch_size))
            .sum();
        let mut results = BTreeMap::new();
        let mut current_batch = 0;

        for chrom in order {
            let chrom_variants = &by_chrom[chrom];
            for batch in chrom_variants.chunks(self.batch_size) {
                current_batch += 1;
                debug!(batch = current_batch, total_batches, chrom, "frequency batch");

                match self.query_batch(chrom, batch).await {
                    Ok(found) => results.extend(found),
                    Err(e) => error!(chrom, batch = current_batch, error = %e, "frequency batch failed"),
                }

                tokio::task::yield_now().await;
            }
        }

        info!(found = results.len(), total_batches, "frequency retrieval complete");
        results
    }

    async fn query_batch(
        &self,
        chrom: &str,
        batch: &[&Variant],
    ) -> Result<BTreeMap<String, FrequencyRecord>> {
        let mut ids_by_key: HashMap<FrequencyQuery, Vec<&str>> = HashMap::new();
        let mut queries = Vec::with_capacity(batch.len());
        for v in batch {
            let Some(alt) = v.primary_alt() else { continue };
            let q = FrequencyQuery {
                pos: v.pos(),
                reference: v.reference().to_string(),
                alt: alt.to_string(),
            };
            let ids = ids_by_key.entry(q.clone()).or_default();
            if ids.is_empty() {
                queries.push(q);
            }
            ids.push(v.id());
        }

        let mut results = BTreeMap::new();
        let mut found: HashSet<FrequencyQuery> = HashSet::new();

        let rows = self
            .source
            .query(DatasetGeneration::Current, chrom, &queries)
            .await?;
        self.collect(rows, DatasetGeneration::Current, &ids_by_key, &mut found, &mut results);

        let missing: Vec<FrequencyQuery> = queries
            .into_iter()
            .filter(|q| !found.contains(q))
            .collect();

        if !missing.is_empty() {
            debug!(chrom, missing = missing.len(), "querying legacy generation");
            match self
                .source
                .query(DatasetGeneration::Legacy, chrom, &missing)
                .await
            {
                Ok(rows) => {
                    self.collect(rows, DatasetGeneration::Legacy, &ids_by_key, &mut found, &mut results)
                }
                Err(e) => warn!(chrom, error = %e, "legacy frequency query failed"),
            }
        }

        Ok(results)
    }

    fn collect(
        &self,
        rows: Vec<FrequencyRow>,
        generation: DatasetGeneration,
        ids_by_key: &HashMap<FrequencyQuery, Vec<&str>>,
        found: &mut HashSet<FrequencyQuery>,
        results: &mut BTreeMap<String, FrequencyRecord>,
    ) {
        for row in rows {
            let (pos, reference, alt) = row.key();
            let key = FrequencyQuery {
                pos,
                reference: reference.to_string(),
                alt: alt.to_string(),
            };
            let Some(ids) = ids_by_key.get(&key) else {
                continue;
            };
            if found.contains(&key) {
                continue;
            }
            let record = row.into_record(generation);
            for id in ids {
                results.insert((*id).to_string(), record.clone());
            }
            found.insert(key);
        }
    }
}
