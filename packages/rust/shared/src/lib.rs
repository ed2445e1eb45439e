//! Shared types, error model, and configuration for variantflow.
//!
//! This crate is the foundation depended on by all other variantflow crates.
//! It provides:
//! - [`VariantFlowError`], the unified error type
//! - Domain types ([`Variant`], [`Annotation`], [`FrequencyRecord`], [`Task`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnnotationConfig, AppConfig, ClinVarConfig, FORK_COUNT_ENV, FrequencyConfig,
    InferenceConfig, StorageConfig, WorkerConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, render_config,
};
pub use error::{Result, VariantFlowError};
pub use types::{
    Annotation, AnnotationSource, DatasetGeneration, FrequencyRecord, Impact,
    PopulationFrequencies, ReportOutput, SESSION_SUMMARY_MAX_CHARS, Scope, SessionMetadata,
    SessionStatus, SessionUpdate, Task, TaskContext, TaskId, TaskKind, TaskProgress, TaskStatus,
    TaskUpdate, Variant, VariantInfo, VariantType, is_pathogenic_significance,
};
