//! Knowledge Retrieval: curated clinical significance and population
//! allele frequencies.
//!
//! Both sources degrade instead of failing: a missing local index falls back
//! to a capped remote lookup, and a failed frequency batch is skipped.

pub mod clinical;
pub mod frequency;
pub mod local_index;
pub mod remote;

pub use clinical::{ClinicalSignificanceLookup, LookupMode};
pub use frequency::{
    FrequencyQuery, FrequencyRetriever, FrequencyRow, FrequencySource, HttpFrequencySource,
    is_canonical_chromosome,
};
pub use local_index::{ClinVarEntry, LocalClinVarIndex, simplify_significance};
pub use remote::{RemoteClinVar, VcvDetails, parse_vcv_xml};
