//! Alignment Matcher
//!
//! Pairs each baseline (CPU) query with the accelerated (GPU) query of the
//! same dataset that shares its plan hash.
//!
//! ```text
//! dataset rows
//!    ├─ baseline     ─┐
//!    └─ accelerated  ─┤ group by hash
//!                     ↓
//!   hash h: cpu [(sql 3, app a), (sql 9, app a)]
//!           gpu [(sql 4, app b), (sql 11, app b)]
//!                     ↓ pair positionally in (sqlID, appId) order
//!   (a/3 ↔ b/4), (a/9 ↔ b/11)
//! ```
//!
//! Each side of an emitted pair is used at most once. Rows without a partner
//! are left out; datasets that lack either role contribute nothing. Native
//! ids are never compared across roles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::preprocess::dataset::RunRole;
use crate::preprocess::features::FeatureRow;
use crate::preprocess::profile::ProfileTable;

/// One CPU/GPU pair of the same logical query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub dataset: String,
    pub hash: String,
    #[serde(rename = "appId_cpu")]
    pub app_id_cpu: String,
    #[serde(rename = "appId_gpu")]
    pub app_id_gpu: String,
    #[serde(rename = "sqlID_cpu")]
    pub sql_id_cpu: i64,
    #[serde(rename = "sqlID_gpu")]
    pub sql_id_gpu: i64,
}

/// Alignment across datasets, in dataset order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentTable {
    pub records: Vec<AlignmentRecord>,
}

impl AlignmentTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_dataset<'a>(
        &'a self,
        dataset: &'a str,
    ) -> impl Iterator<Item = &'a AlignmentRecord> + 'a {
        self.records.iter().filter(move |r| r.dataset == dataset)
    }

    /// No query identity appears twice on either side.
    pub fn is_injective(&self) -> bool {
        let mut cpu = HashSet::new();
        let mut gpu = HashSet::new();
        self.records.iter().all(|r| {
            cpu.insert((&r.dataset, &r.app_id_cpu, r.sql_id_cpu))
                && gpu.insert((&r.dataset, &r.app_id_gpu, r.sql_id_gpu))
        })
    }
}

/// Per-dataset match counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignmentSummary {
    pub dataset: String,
    pub baseline_rows: usize,
    pub accelerated_rows: usize,
    pub matched: usize,
}

impl AlignmentSummary {
    pub fn unmatched_baseline(&self) -> usize {
        self.baseline_rows - self.matched
    }

    pub fn unmatched_accelerated(&self) -> usize {
        self.accelerated_rows - self.matched
    }
}

/// Align one dataset. Empty when the dataset lacks either role.
pub fn compute_dataset_alignment(profile: &ProfileTable, dataset: &str) -> Vec<AlignmentRecord> {
    let mut groups: BTreeMap<&str, (Vec<&FeatureRow>, Vec<&FeatureRow>)> = BTreeMap::new();
    for row in profile.rows_for(dataset) {
        let entry = groups.entry(row.hash.as_str()).or_default();
        match row.role {
            RunRole::Baseline => entry.0.push(row),
            RunRole::Accelerated => entry.1.push(row),
        }
    }

    let mut records = Vec::new();
    for (hash, (mut cpu, mut gpu)) in groups {
        cpu.sort_by(|a, b| (a.sql_id, &a.app_id).cmp(&(b.sql_id, &b.app_id)));
        gpu.sort_by(|a, b| (a.sql_id, &a.app_id).cmp(&(b.sql_id, &b.app_id)));
        for (c, g) in cpu.iter().zip(gpu.iter()) {
            records.push(AlignmentRecord {
                dataset: dataset.to_string(),
                hash: hash.to_string(),
                app_id_cpu: c.app_id.clone(),
                app_id_gpu: g.app_id.clone(),
                sql_id_cpu: c.sql_id,
                sql_id_gpu: g.sql_id,
            });
        }
    }

    records.sort_by(|a, b| {
        (a.sql_id_cpu, &a.app_id_cpu).cmp(&(b.sql_id_cpu, &b.app_id_cpu))
    });
    records
}

/// Align every dataset of `profile`.
pub fn compute_alignment(profile: &ProfileTable) -> AlignmentTable {
    let records = profile
        .datasets()
        .into_iter()
        .flat_map(|dataset| compute_dataset_alignment(profile, dataset))
        .collect();
    AlignmentTable { records }
}

pub fn alignment_summary(
    profile: &ProfileTable,
    alignment: &AlignmentTable,
) -> Vec<AlignmentSummary> {
    profile
        .datasets()
        .into_iter()
        .map(|dataset| AlignmentSummary {
            dataset: dataset.to_string(),
            baseline_rows: profile.count(dataset, RunRole::Baseline),
            accelerated_rows: profile.count(dataset, RunRole::Accelerated),
            matched: alignment.for_dataset(dataset).count(),
        })
        .collect()
}
