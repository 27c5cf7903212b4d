//! Profile Aggregator
//!
//! Runs the reader and extractor over every run of every registered dataset
//! and merges the rows into one deterministic `ProfileTable`.
//!
//! ```text
//! DatasetRegistry::discover(dir)
//!    ↓  DatasetMap
//! dataset_signature() ──► CacheSnapshot::load() ── hit ──► ProfileTable
//!    ↓ miss
//! per dataset (rayon when parallel):
//!    per run: discover_applications → EventLogReader → FeatureExtractor
//!    ↓  all-or-nothing collect
//! sort rows (dataset, role, sqlID, appId)
//!    ↓
//! CacheSnapshot::store() (atomic) ──► ProfileTable
//! ```
//!
//! # Guarantees
//!
//! - One row per completed SQL execution per run, across all datasets.
//! - Row order is independent of descriptor order and of parallelism.
//! - Any reader or extraction error aborts the whole load; nothing is cached.
//! - Cancellation aborts with `Cancelled` and publishes nothing.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::preprocess::cache::{dataset_signature, encode_columns, CacheSnapshot};
use crate::preprocess::config::{global_config, ConfigHandle, QualxConfig};
use crate::preprocess::dataset::{DatasetDescriptor, DatasetMap, DatasetRegistry, RunRole};
use crate::preprocess::error::{PreprocessError, Result};
use crate::preprocess::event_log::{discover_applications, CancelFlag, EventLogReader, ReaderStats};
use crate::preprocess::features::{FeatureExtractor, FeatureRow};
use crate::preprocess::schema::{
    feature_index, ordered_columns, CellValue, FEATURE_SCHEMA_VERSION, MISSING_FEATURE,
    NUMERIC_FEATURES,
};

// =============================================================================
// PROFILE TABLE
// =============================================================================

/// Merged per-query feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    label_column: String,
    schema_version: u32,
    rows: Vec<FeatureRow>,
}

impl ProfileTable {
    /// Build a table, putting rows in canonical order.
    pub fn from_rows(label_column: impl Into<String>, mut rows: Vec<FeatureRow>) -> Self {
        rows.sort_by(FeatureRow::sort_cmp);
        Self::from_sorted_rows(label_column, rows)
    }

    pub(crate) fn from_sorted_rows(label_column: impl Into<String>, rows: Vec<FeatureRow>) -> Self {
        Self {
            label_column: label_column.into(),
            schema_version: FEATURE_SCHEMA_VERSION,
            rows,
        }
    }

    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in table order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = ordered_columns().into_iter().map(str::to_string).collect();
        if !columns.iter().any(|c| c == &self.label_column) {
            columns.push(self.label_column.clone());
        }
        columns
    }

    pub fn column(&self, name: &str) -> Option<Vec<CellValue>> {
        self.rows.iter().map(|row| row.cell(name)).collect()
    }

    /// Dataset names present in the table, sorted.
    pub fn datasets(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.dataset.as_str()).collect()
    }

    pub fn rows_for<'a>(&'a self, dataset: &'a str) -> impl Iterator<Item = &'a FeatureRow> + 'a {
        self.rows.iter().filter(move |r| r.dataset == dataset)
    }

    pub fn count(&self, dataset: &str, role: RunRole) -> usize {
        self.rows_for(dataset).filter(|r| r.role == role).count()
    }

    /// The label names a numeric feature, and every row has the full feature
    /// vector, a hash, and a label equal to that feature.
    pub fn check_conformance(&self) -> Result<()> {
        let Some(label_index) = feature_index(&self.label_column) else {
            return Err(PreprocessError::configuration(format!(
                "label column '{}' is not a numeric feature",
                self.label_column
            )));
        };
        for row in &self.rows {
            let label_matches = row
                .features
                .get(label_index)
                .is_some_and(|v| v.to_bits() == row.label.to_bits());
            if row.features.len() != NUMERIC_FEATURES.len()
                || row.hash.is_empty()
                || !label_matches
            {
                return Err(PreprocessError::extraction(
                    &row.dataset,
                    PathBuf::from(&row.app_id),
                    format!("row for sqlID {} does not match the feature schema", row.sql_id),
                ));
            }
        }
        Ok(())
    }

    /// Columnar JSON export, byte-stable for equal tables.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Export<'a> {
            schema_version: u32,
            label_column: &'a str,
            row_count: usize,
            columns: Vec<String>,
            data: Vec<Vec<CellValue>>,
        }
        let (columns, data) = encode_columns(self);
        Ok(serde_json::to_vec(&Export {
            schema_version: self.schema_version,
            label_column: &self.label_column,
            row_count: self.rows.len(),
            columns,
            data,
        })?)
    }
}

// =============================================================================
// LOAD REPORT
// =============================================================================

/// Where the returned table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// No cache location configured.
    Disabled,
    /// Served from a matching snapshot.
    Hit,
    /// Recomputed and stored.
    Stored,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub role: RunRole,
    pub source: PathBuf,
    pub applications: usize,
    pub rows: usize,
    pub stats: ReaderStats,
    /// Applications whose detected engine disagrees with the declared role.
    pub role_mismatches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub name: String,
    pub runs: Vec<RunReport>,
}

impl DatasetReport {
    pub fn rows(&self) -> usize {
        self.runs.iter().map(|r| r.rows).sum()
    }
}

/// Summary of one `load` call.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub cache: CacheOutcome,
    pub cache_path: Option<PathBuf>,
    pub rows: usize,
    /// Empty on a cache hit.
    pub datasets: Vec<DatasetReport>,
    pub elapsed_ms: u64,
}

impl LoadReport {
    pub fn reader_stats(&self) -> ReaderStats {
        let mut total = ReaderStats::default();
        for run in self.datasets.iter().flat_map(|d| &d.runs) {
            total.merge(&run.stats);
        }
        total
    }
}

// =============================================================================
// AGGREGATOR
// =============================================================================

pub struct ProfileAggregator {
    config: Arc<QualxConfig>,
    cancel: CancelFlag,
}

impl ProfileAggregator {
    pub fn new(config: Arc<QualxConfig>) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Aggregator over the handle's current snapshot.
    ///
    /// Fails when the handle's configuration never resolved.
    pub fn from_handle(handle: &ConfigHandle) -> Result<Self> {
        Ok(Self::new(handle.checked()?))
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &QualxConfig {
        &self.config
    }

    /// Discover descriptors under `dir` and return them with the profile table.
    pub fn load(&self, dir: &Path) -> Result<(DatasetMap, ProfileTable)> {
        let (datasets, table, _) = self.load_with_report(dir)?;
        Ok((datasets, table))
    }

    pub fn load_with_report(&self, dir: &Path) -> Result<(DatasetMap, ProfileTable, LoadReport)> {
        let started = Instant::now();
        self.config.validate()?;
        let datasets = DatasetRegistry::new(&self.config).discover(dir)?;
        let label = self.config.label.as_str();

        let cache = self.config.cache_path().map(CacheSnapshot::new);
        let signature = match &cache {
            Some(_) => Some(dataset_signature(&datasets, label)?),
            None => None,
        };

        if let (Some(cache), Some(signature)) = (&cache, &signature) {
            if let Some(table) = cache.load(label, signature)? {
                let report = LoadReport {
                    cache: CacheOutcome::Hit,
                    cache_path: Some(cache.path().to_path_buf()),
                    rows: table.len(),
                    datasets: Vec::new(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                return Ok((datasets, table, report));
            }
        }

        let descriptors: Vec<&DatasetDescriptor> = datasets.values().collect();
        let (table, dataset_reports) = self.build(&descriptors)?;

        // Last chance to honor a cancel that arrived after the final read.
        if self.cancel.is_cancelled() {
            return Err(PreprocessError::Cancelled);
        }

        let outcome = match (&cache, &signature) {
            (Some(cache), Some(signature)) => {
                cache.store(&table, signature)?;
                CacheOutcome::Stored
            }
            _ => CacheOutcome::Disabled,
        };

        let report = LoadReport {
            cache: outcome,
            cache_path: cache.as_ref().map(|c| c.path().to_path_buf()),
            rows: table.len(),
            datasets: dataset_reports,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            datasets = datasets.len(),
            rows = table.len(),
            cache = ?report.cache,
            elapsed_ms = report.elapsed_ms,
            "Profile loaded"
        );
        Ok((datasets, table, report))
    }

    /// Extract and merge `descriptors` without touching the cache.
    ///
    /// The result does not depend on the order of `descriptors`.
    pub fn build(
        &self,
        descriptors: &[&DatasetDescriptor],
    ) -> Result<(ProfileTable, Vec<DatasetReport>)> {
        let per_dataset: Vec<(Vec<FeatureRow>, DatasetReport)> = if self.config.parallel {
            descriptors
                .par_iter()
                .map(|d| self.extract_dataset(d))
                .collect::<Result<Vec<_>>>()?
        } else {
            descriptors
                .iter()
                .map(|d| self.extract_dataset(d))
                .collect::<Result<Vec<_>>>()?
        };

        let mut rows = Vec::new();
        let mut reports = Vec::with_capacity(per_dataset.len());
        for (dataset_rows, report) in per_dataset {
            rows.extend(dataset_rows);
            reports.push(report);
        }
        reports.sort_by(|a, b| a.name.cmp(&b.name));

        let table = ProfileTable::from_rows(self.config.label.clone(), rows);
        table.check_conformance()?;
        Ok((table, reports))
    }

    fn extract_dataset(
        &self,
        dataset: &DatasetDescriptor,
    ) -> Result<(Vec<FeatureRow>, DatasetReport)> {
        let mut rows = Vec::new();
        let mut runs = Vec::with_capacity(dataset.runs.len());

        for run in &dataset.runs {
            if self.cancel.is_cancelled() {
                return Err(PreprocessError::Cancelled);
            }
            let apps = discover_applications(&run.path).map_err(|e| {
                PreprocessError::extraction(&dataset.name, &run.path, e.to_string())
            })?;
            if apps.is_empty() {
                warn!(
                    dataset = %dataset.name,
                    source = %run.path.display(),
                    "No event logs in run source"
                );
            }

            let extractor = FeatureExtractor::new(dataset, run.role);
            let mut report = RunReport {
                role: run.role,
                source: run.path.clone(),
                applications: apps.len(),
                rows: 0,
                stats: ReaderStats::default(),
                role_mismatches: 0,
            };

            for app in &apps {
                let mut reader =
                    EventLogReader::open(&dataset.name, app).with_cancel_flag(self.cancel.clone());
                for record in reader.by_ref() {
                    let record = record?;
                    if self.cancel.is_cancelled() {
                        return Err(PreprocessError::Cancelled);
                    }
                    let mut row = extractor.extract(&record);
                    row.label = row.feature(&self.config.label).unwrap_or(MISSING_FEATURE);
                    rows.push(row);
                    report.rows += 1;
                }

                let detected = reader.app().accelerated;
                if detected != (run.role == RunRole::Accelerated) && reader.stats().records > 0 {
                    report.role_mismatches += 1;
                    warn!(
                        dataset = %dataset.name,
                        app = %app.path.display(),
                        declared = %run.role,
                        accelerated = detected,
                        "Detected engine disagrees with declared run role"
                    );
                }
                report.stats.merge(&reader.stats());
            }

            debug!(
                dataset = %dataset.name,
                role = %run.role,
                applications = report.applications,
                rows = report.rows,
                "Run extracted"
            );
            runs.push(report);
        }

        Ok((
            rows,
            DatasetReport {
                name: dataset.name.clone(),
                runs,
            },
        ))
    }
}

/// Load `dir` with the process-wide configuration.
pub fn load_datasets(dir: &Path) -> Result<(DatasetMap, ProfileTable)> {
    ProfileAggregator::from_handle(global_config())?.load(dir)
}
