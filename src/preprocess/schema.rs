//! Versioned Raw Feature Schema
//!
//! The profile table's column set is a contract: every row carries exactly
//! `expected_raw_features() ∪ {label, "hash"}`. The set is versioned so a
//! cached snapshot written by an older schema is rejected instead of being
//! silently reused.
//!
//! # Version History
//!
//! - v1: identity columns, task metric aggregates, executor resources,
//!   operator counts, GPU operator fraction

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Bump whenever a column is added, removed, renamed or changes meaning.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Value stored for a feature that cannot be computed for a query.
pub const MISSING_FEATURE: f64 = -1.0;

/// Content fingerprint column.
pub const HASH_COLUMN: &str = "hash";

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Text,
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

/// Columns identifying a row. `runType` is `CPU` or `GPU`.
pub const IDENTITY_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { name: "appId", kind: ColumnKind::Text },
    ColumnSpec { name: "appName", kind: ColumnKind::Text },
    ColumnSpec { name: "dataset", kind: ColumnKind::Text },
    ColumnSpec { name: "description", kind: ColumnKind::Text },
    ColumnSpec { name: "runType", kind: ColumnKind::Text },
    ColumnSpec { name: "scaleFactor", kind: ColumnKind::Int },
    ColumnSpec { name: "sqlID", kind: ColumnKind::Int },
];

/// Numeric feature columns, in storage order.
///
/// Times are milliseconds, sizes bytes, memory MiB.
pub const NUMERIC_FEATURES: &[&str] = &[
    "Duration",
    "diskBytesSpilled_sum",
    "duration_max",
    "duration_mean",
    "duration_min",
    "duration_sum",
    "executorCPUTime_sum",
    "executorCores",
    "executorDeserializeTime_sum",
    "executorMemory",
    "executorRunTime_sum",
    "failedJobs",
    "failedTasks",
    "gpuOpFraction",
    "input_bytesRead_sum",
    "input_recordsRead_sum",
    "jvmGCTime_sum",
    "memoryBytesSpilled_sum",
    "numExecutors",
    "numJobs",
    "numStages",
    "numTasks",
    "output_bytesWritten_sum",
    "output_recordsWritten_sum",
    "peakExecutionMemory_max",
    "resultSerializationTime_sum",
    "resultSize_max",
    "sqlOp_BroadcastExchange",
    "sqlOp_BroadcastHashJoin",
    "sqlOp_Exchange",
    "sqlOp_Expand",
    "sqlOp_Filter",
    "sqlOp_Generate",
    "sqlOp_HashAggregate",
    "sqlOp_Limit",
    "sqlOp_NestedLoopJoin",
    "sqlOp_Other",
    "sqlOp_Project",
    "sqlOp_ReusedExchange",
    "sqlOp_Scan",
    "sqlOp_ShuffledJoin",
    "sqlOp_Sort",
    "sqlOp_Subquery",
    "sqlOp_TakeOrderedAndProject",
    "sqlOp_Union",
    "sqlOp_Window",
    "sqlOp_Write",
    "sr_fetchWaitTime_sum",
    "sr_localBlocksFetched_sum",
    "sr_localBytesRead_sum",
    "sr_remoteBlocksFetched_sum",
    "sr_remoteBytesReadToDisk_sum",
    "sr_remoteBytesRead_sum",
    "sr_totalBytesRead_sum",
    "sr_totalRecordsRead_sum",
    "sw_bytesWritten_sum",
    "sw_recordsWritten_sum",
    "sw_writeTime_sum",
];

lazy_static! {
    static ref FEATURE_INDEX: HashMap<&'static str, usize> = NUMERIC_FEATURES
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();
}

/// Current raw feature set (identity and numeric columns, excluding `hash`).
pub fn expected_raw_features() -> BTreeSet<&'static str> {
    IDENTITY_COLUMNS
        .iter()
        .map(|c| c.name)
        .chain(NUMERIC_FEATURES.iter().copied())
        .collect()
}

/// Exact column set of a profile table built with `label`.
pub fn expected_columns(label: &str) -> BTreeSet<String> {
    let mut columns: BTreeSet<String> =
        expected_raw_features().into_iter().map(str::to_string).collect();
    columns.insert(label.to_string());
    columns.insert(HASH_COLUMN.to_string());
    columns
}

/// Column names in table order: identity, `hash`, numeric features.
pub fn ordered_columns() -> Vec<&'static str> {
    IDENTITY_COLUMNS
        .iter()
        .map(|c| c.name)
        .chain(std::iter::once(HASH_COLUMN))
        .chain(NUMERIC_FEATURES.iter().copied())
        .collect()
}

/// Position of a numeric feature in `FeatureRow::features`.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_INDEX.get(name).copied()
}

pub fn column_kind(name: &str) -> Option<ColumnKind> {
    if name == HASH_COLUMN {
        return Some(ColumnKind::Text);
    }
    if let Some(spec) = IDENTITY_COLUMNS.iter().find(|c| c.name == name) {
        return Some(spec.kind);
    }
    feature_index(name).map(|_| ColumnKind::Float)
}

/// A single cell of the profile table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}
