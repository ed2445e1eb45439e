//! Artifact storage for pipeline hand-offs.
//!
//! Stages never share memory: each one loads its input artifact, works on an
//! owned copy, and saves its result under a deterministic per-task filename.

pub mod bundle;
pub mod store;

pub use bundle::{
    OutputArtifact, annotated_variants_filename, annotations_filename, decode_variants,
    encode_variants,
};
pub use store::{ArtifactKey, ArtifactStore, FsArtifactStore};
