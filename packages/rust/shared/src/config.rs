//! Application configuration for variantflow.
//!
//! User config lives at `~/.variantflow/variantflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VariantFlowError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "variantflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".variantflow";

/// Environment variable overriding `[annotation] fork_count`.
pub const FORK_COUNT_ENV: &str = "VEP_FORK_COUNT";

// ---------------------------------------------------------------------------
// Config structs (matching variantflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub annotation: AnnotationConfig,

    #[serde(default)]
    pub clinvar: ClinVarConfig,

    #[serde(default)]
    pub frequency: FrequencyConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL task database path.
    #[serde(default = "default_task_db")]
    pub task_db: String,

    /// Root directory of the filesystem artifact store.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            task_db: default_task_db(),
            artifact_root: default_artifact_root(),
        }
    }
}

fn default_task_db() -> String {
    "~/.variantflow/tasks.db".into()
}
fn default_artifact_root() -> String {
    "~/.variantflow/artifacts".into()
}

/// `[annotation]` section: the external variant effect predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Path to the annotation tool executable.
    #[serde(default = "default_tool_path")]
    pub tool_path: String,

    /// Offline cache directory passed to the tool.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_assembly")]
    pub assembly: String,

    /// Worker processes the tool forks per batch.
    #[serde(default = "default_fork_count")]
    pub fork_count: u32,

    /// Variants per tool invocation.
    #[serde(default = "default_annotation_batch")]
    pub batch_size: usize,

    /// Batches between progress checkpoints.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            cache_dir: default_cache_dir(),
            assembly: default_assembly(),
            fork_count: default_fork_count(),
            batch_size: default_annotation_batch(),
            checkpoint_every: default_checkpoint_every(),
        }
    }
}

impl AnnotationConfig {
    /// Fork count with the `VEP_FORK_COUNT` override applied.
    pub fn effective_fork_count(&self) -> u32 {
        std::env::var(FORK_COUNT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.fork_count)
    }
}

fn default_tool_path() -> String {
    "/opt/ensembl-vep/vep".into()
}
fn default_cache_dir() -> String {
    "/mnt/cache".into()
}
fn default_assembly() -> String {
    "GRCh38".into()
}
fn default_fork_count() -> u32 {
    4
}
fn default_annotation_batch() -> usize {
    5000
}
fn default_checkpoint_every() -> usize {
    1
}

/// `[clinvar]` section: clinical significance sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinVarConfig {
    /// Local bgzipped VCF snapshot loaded into memory at start.
    #[serde(default = "default_local_index")]
    pub local_index: String,

    /// E-utilities base URL for the remote fallback.
    #[serde(default = "default_clinvar_api")]
    pub api_url: String,

    /// Name of the env var holding an optional NCBI API key.
    #[serde(default = "default_ncbi_key_env")]
    pub api_key_env: String,

    /// Fixed delay between sequential remote calls.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Remote lookups per task before giving up on the rest.
    #[serde(default = "default_max_remote")]
    pub max_remote_variants: usize,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClinVarConfig {
    fn default() -> Self {
        Self {
            local_index: default_local_index(),
            api_url: default_clinvar_api(),
            api_key_env: default_ncbi_key_env(),
            request_delay_ms: default_request_delay(),
            max_remote_variants: default_max_remote(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_local_index() -> String {
    "data/clinvar.vcf.gz".into()
}
fn default_clinvar_api() -> String {
    "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into()
}
fn default_ncbi_key_env() -> String {
    "NCBI_API_KEY".into()
}
fn default_request_delay() -> u64 {
    400
}
fn default_max_remote() -> usize {
    100
}
fn default_timeout() -> u64 {
    30
}

/// `[frequency]` section: population allele frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyConfig {
    /// Batch frequency query endpoint.
    #[serde(default = "default_frequency_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_frequency_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_current_dataset")]
    pub current_dataset: String,

    #[serde(default = "default_legacy_dataset")]
    pub legacy_dataset: String,

    /// Variants per query.
    #[serde(default = "default_frequency_batch")]
    pub batch_size: usize,

    /// Variants per task beyond which frequencies are not looked up.
    #[serde(default = "default_frequency_max")]
    pub max_variants: usize,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_frequency_endpoint(),
            api_key_env: default_frequency_key_env(),
            current_dataset: default_current_dataset(),
            legacy_dataset: default_legacy_dataset(),
            batch_size: default_frequency_batch(),
            max_variants: default_frequency_max(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_frequency_endpoint() -> String {
    "http://localhost:8600/v1/frequencies".into()
}
fn default_frequency_key_env() -> String {
    "VARIANTFLOW_FREQUENCY_KEY".into()
}
fn default_current_dataset() -> String {
    "gnomad_v3_genomes".into()
}
fn default_legacy_dataset() -> String {
    "gnomad_v2_1_1_genomes".into()
}
fn default_frequency_batch() -> usize {
    100
}
fn default_frequency_max() -> usize {
    10_000
}

/// `[inference]` section: OpenRouter-compatible chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Pathogenic variants per synthesis batch.
    #[serde(default = "default_synthesis_batch")]
    pub batch_size: usize,

    /// Synthesis batches in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            batch_size: default_synthesis_batch(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

impl InferenceConfig {
    /// The API key, if its env var is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_output_tokens() -> u32 {
    65535
}
fn default_synthesis_batch() -> usize {
    50
}
fn default_max_concurrent() -> usize {
    5
}
fn default_inference_timeout() -> u64 {
    300
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Items processed between cooperative yields in long loops.
    #[serde(default = "default_yield_every")]
    pub yield_every: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            yield_every: default_yield_every(),
        }
    }
}

fn default_yield_every() -> usize {
    1000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.variantflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VariantFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.variantflow/variantflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| VariantFlowError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| VariantFlowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VariantFlowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| VariantFlowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config back to TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| VariantFlowError::config(e.to_string()))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| VariantFlowError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
