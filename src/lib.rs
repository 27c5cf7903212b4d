//! Qualx Preprocessing Library
//!
//! Exposes the preprocessing pipeline for the `qualx` binary and for tests.

pub mod preprocess;

// Re-export the load entry points at crate root
pub use preprocess::{
    compute_alignment, load_datasets, AlignmentTable, PreprocessError, ProfileAggregator,
    ProfileTable, QualxConfig,
};
