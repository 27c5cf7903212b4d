//! Spark Event Log Preprocessing
//!
//! Turns directories of Spark event logs, grouped into named datasets, into a
//! per-query feature table and a CPU/GPU query alignment for qualification
//! model training.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ProfileAggregator                          │
//! │  (load entry point, owns cancel flag, parallel per dataset)     │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                      │                        │
//!          ▼                      ▼                        ▼
//! ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐
//! │ DatasetRegistry │    │ CacheSnapshot   │      │ QualxConfig     │
//! │ (descriptors)   │    │ (columnar JSON) │      │ (ArcSwap)       │
//! └────────┬────────┘    └─────────────────┘      └─────────────────┘
//!          │ run sources
//!          ▼
//! ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐
//! │ EventLogReader  │───▶│FeatureExtractor │─────▶│ ProfileTable    │
//! │ (zstd, rolling) │    │ (plan hash)     │      │ (sorted rows)   │
//! └─────────────────┘    └─────────────────┘      └────────┬────────┘
//!                                                          │
//!                                                          ▼
//!                                                 ┌─────────────────┐
//!                                                 │ compute_alignment│
//!                                                 │ (hash pairing)  │
//!                                                 └─────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Rows**: ordered by `(dataset, role, sqlID, appId)` regardless of
//!   descriptor order or parallelism
//! - **Hash**: versioned digest of the normalized plan, never of timing data
//! - **Cache**: byte-identical to a fresh computation over the same inputs
//! - **Alignment**: pure function of the profile table

pub mod align;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod event_log;
pub mod features;
pub mod plan;
pub mod profile;
pub mod schema;
pub mod synthetic;
#[cfg(test)]
mod profile_tests;

// Re-exports for convenience
pub use align::{
    alignment_summary, compute_alignment, compute_dataset_alignment, AlignmentRecord,
    AlignmentSummary, AlignmentTable,
};
pub use cache::{clear_cache, dataset_signature, CacheSnapshot, SnapshotSummary};
pub use config::{global_config, reload_global_config, ConfigHandle, QualxConfig};
pub use dataset::{
    discover_datasets, DatasetDescriptor, DatasetMap, DatasetRegistry, RunRole, RunSource,
};
pub use error::{ErrorKind, PreprocessError, Result};
pub use event_log::{
    discover_applications, read_application, ApplicationLog, CancelFlag, EventLogReader,
    EventLogRecord, ReaderStats,
};
pub use features::{FeatureExtractor, FeatureRow};
pub use plan::{normalize_plan, NormalizedPlan, SparkPlanInfo};
pub use profile::{load_datasets, CacheOutcome, LoadReport, ProfileAggregator, ProfileTable};
pub use schema::{expected_columns, expected_raw_features, FEATURE_SCHEMA_VERSION, MISSING_FEATURE};
