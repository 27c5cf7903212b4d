//! Cached Profile Snapshot
//!
//! The merged profile table is persisted as a columnar JSON document so a
//! later load can skip event log decoding entirely.
//!
//! ```text
//! {
//!   "format": "qualx-profile",
//!   "schema_version": 1,
//!   "signature": "<sha256 of descriptors + source listings + label>",
//!   "label_column": "Duration",
//!   "row_count": 194,
//!   "columns": ["appId", ..., "hash", "Duration", ...],
//!   "data": [[<appId values>], ..., [<hash values>], ...]
//! }
//! ```
//!
//! # Trust Model
//!
//! - A snapshot whose signature matches is returned without re-deriving features.
//! - A snapshot whose format, schema version or column set disagrees with the
//!   current schema is a hard error telling the operator to delete it. It is
//!   never reconciled or overwritten silently.
//! - A snapshot with a different signature (descriptors or logs changed) is a
//!   miss: the table is recomputed and a fresh snapshot replaces it.
//! - Writes go to a uniquely named temp file in the same directory and are
//!   renamed into place, so readers never observe a partial snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::preprocess::config::QualxConfig;
use crate::preprocess::dataset::{DatasetMap, RunRole};
use crate::preprocess::error::{PreprocessError, Result};
use crate::preprocess::event_log::discover_applications;
use crate::preprocess::features::FeatureRow;
use crate::preprocess::plan::PLAN_HASH_VERSION;
use crate::preprocess::profile::ProfileTable;
use crate::preprocess::schema::{
    column_kind, expected_columns, feature_index, CellValue, ColumnKind, FEATURE_SCHEMA_VERSION,
    HASH_COLUMN, NUMERIC_FEATURES,
};

pub const SNAPSHOT_FORMAT: &str = "qualx-profile";

const SIGNATURE_VERSION: &str = "QUALX_SIG_V1";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format: String,
    schema_version: u32,
    signature: String,
    label_column: String,
    row_count: usize,
    columns: Vec<String>,
    data: Vec<Vec<CellValue>>,
}

/// Header facts about a snapshot on disk.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub path: PathBuf,
    pub format: String,
    pub schema_version: u32,
    pub signature: String,
    pub label_column: String,
    pub row_count: usize,
    pub column_count: usize,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Column set and version match the current schema.
    pub schema_current: bool,
}

// =============================================================================
// SIGNATURE
// =============================================================================

/// Content signature of a descriptor set.
///
/// Covers descriptor fields, every event log file (path and byte length),
/// the label, and the schema and plan-hash versions.
pub fn dataset_signature(datasets: &DatasetMap, label: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(SIGNATURE_VERSION.as_bytes());
    hasher.update(FEATURE_SCHEMA_VERSION.to_le_bytes());
    hasher.update(PLAN_HASH_VERSION.as_bytes());
    hash_field(&mut hasher, label);

    for (name, descriptor) in datasets {
        hash_field(&mut hasher, name);
        hash_field(&mut hasher, &descriptor.platform);
        hasher.update(descriptor.scale_factor.to_le_bytes());
        for run in &descriptor.runs {
            hash_field(&mut hasher, &run.role.to_string());
            hash_field(&mut hasher, &run.path.to_string_lossy());
            for app in discover_applications(&run.path)? {
                for file in &app.files {
                    let len = fs::metadata(file)
                        .map_err(|e| PreprocessError::io(file, e))?
                        .len();
                    hash_field(&mut hasher, &file.to_string_lossy());
                    hasher.update(len.to_le_bytes());
                }
            }
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

// =============================================================================
// COLUMNAR ENCODING
// =============================================================================

/// Column names and per-column values of `table`, in table column order.
pub fn encode_columns(table: &ProfileTable) -> (Vec<String>, Vec<Vec<CellValue>>) {
    let columns = table.columns();
    let data = columns
        .iter()
        .map(|column| {
            table
                .rows()
                .iter()
                .map(|row| row.cell(column).unwrap_or(CellValue::Text(String::new())))
                .collect()
        })
        .collect();
    (columns, data)
}

fn decode_rows(
    path: &Path,
    columns: &[String],
    data: &[Vec<CellValue>],
    row_count: usize,
    label_column: &str,
) -> Result<Vec<FeatureRow>> {
    let mismatch = |detail: String| PreprocessError::SchemaMismatch {
        path: path.to_path_buf(),
        missing: Vec::new(),
        extra: Vec::new(),
        detail,
    };

    if data.len() != columns.len() {
        return Err(mismatch(format!(
            "{} column names but {} data columns",
            columns.len(),
            data.len()
        )));
    }
    if let Some((i, _)) = data.iter().enumerate().find(|(_, col)| col.len() != row_count) {
        return Err(mismatch(format!(
            "column '{}' has {} values, expected {}",
            columns[i],
            data[i].len(),
            row_count
        )));
    }

    let mut rows: Vec<FeatureRow> = (0..row_count)
        .map(|_| FeatureRow {
            dataset: String::new(),
            role: RunRole::Baseline,
            app_id: String::new(),
            app_name: String::new(),
            sql_id: 0,
            description: String::new(),
            scale_factor: 0,
            hash: String::new(),
            label: 0.0,
            features: vec![0.0; NUMERIC_FEATURES.len()],
        })
        .collect();

    for (column, values) in columns.iter().zip(data) {
        let kind = column_kind(column)
            .ok_or_else(|| mismatch(format!("unknown column '{}'", column)))?;
        for (row, value) in rows.iter_mut().zip(values) {
            let bad = || {
                mismatch(format!(
                    "column '{}' holds {:?}, expected {:?}",
                    column, value, kind
                ))
            };
            match kind {
                ColumnKind::Text => {
                    let text = value.as_str().ok_or_else(bad)?.to_string();
                    match column.as_str() {
                        "appId" => row.app_id = text,
                        "appName" => row.app_name = text,
                        "dataset" => row.dataset = text,
                        "description" => row.description = text,
                        HASH_COLUMN => row.hash = text,
                        "runType" => {
                            row.role = RunRole::from_run_type(&text).ok_or_else(bad)?;
                        }
                        _ => return Err(bad()),
                    }
                }
                ColumnKind::Int => {
                    let CellValue::Int(v) = value else {
                        return Err(bad());
                    };
                    match column.as_str() {
                        "sqlID" => row.sql_id = *v,
                        "scaleFactor" => row.scale_factor = *v,
                        _ => return Err(bad()),
                    }
                }
                ColumnKind::Float => {
                    let v = value.as_f64().ok_or_else(bad)?;
                    let i = feature_index(column).ok_or_else(bad)?;
                    row.features[i] = v;
                }
            }
        }
    }

    if let Some(label_index) = feature_index(label_column) {
        for row in &mut rows {
            row.label = row.features[label_index];
        }
    }
    Ok(rows)
}

// =============================================================================
// SNAPSHOT STORE
// =============================================================================

/// Snapshot file at a fixed location.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    path: PathBuf,
}

impl CacheSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read_file(&self) -> Result<SnapshotFile> {
        let bytes = fs::read(&self.path).map_err(|e| PreprocessError::io(&self.path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| PreprocessError::SchemaMismatch {
            path: self.path.clone(),
            missing: Vec::new(),
            extra: Vec::new(),
            detail: format!("snapshot is not readable by this version: {}", e),
        })
    }

    /// Verify format, version and exact column set.
    fn check_schema(&self, file: &SnapshotFile) -> Result<()> {
        if file.format != SNAPSHOT_FORMAT || file.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(PreprocessError::SchemaMismatch {
                path: self.path.clone(),
                missing: Vec::new(),
                extra: Vec::new(),
                detail: format!(
                    "snapshot format {} v{}, current format {} v{}",
                    file.format, file.schema_version, SNAPSHOT_FORMAT, FEATURE_SCHEMA_VERSION
                ),
            });
        }

        let actual: BTreeSet<String> = file.columns.iter().cloned().collect();
        let expected = expected_columns(&file.label_column);
        let missing: Vec<String> = expected.difference(&actual).cloned().collect();
        let extra: Vec<String> = actual.difference(&expected).cloned().collect();
        if !missing.is_empty() || !extra.is_empty() || actual.len() != file.columns.len() {
            return Err(PreprocessError::SchemaMismatch {
                path: self.path.clone(),
                missing,
                extra,
                detail: "column set differs from the expected raw features".to_string(),
            });
        }
        Ok(())
    }

    /// Return the cached table if it was built from `signature` with `label`.
    ///
    /// `Ok(None)` when there is no snapshot or it belongs to other inputs.
    pub fn load(&self, label: &str, signature: &str) -> Result<Option<ProfileTable>> {
        if !self.exists() {
            debug!(path = %self.path.display(), "No cached profile");
            return Ok(None);
        }

        let file = self.read_file()?;
        self.check_schema(&file)?;

        if file.signature != signature || file.label_column != label {
            info!(
                path = %self.path.display(),
                cached_label = %file.label_column,
                "Cached profile built from different inputs; recomputing"
            );
            return Ok(None);
        }

        let rows = decode_rows(
            &self.path,
            &file.columns,
            &file.data,
            file.row_count,
            &file.label_column,
        )?;
        let table = ProfileTable::from_sorted_rows(file.label_column, rows);
        table.check_conformance()?;
        info!(path = %self.path.display(), rows = table.len(), "Loaded cached profile");
        Ok(Some(table))
    }

    /// Atomically publish `table` under `signature`.
    pub fn store(&self, table: &ProfileTable, signature: &str) -> Result<()> {
        let (columns, data) = encode_columns(table);
        let file = SnapshotFile {
            format: SNAPSHOT_FORMAT.to_string(),
            schema_version: FEATURE_SCHEMA_VERSION,
            signature: signature.to_string(),
            label_column: table.label_column().to_string(),
            row_count: table.len(),
            columns,
            data,
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &bytes)?;
        info!(path = %self.path.display(), rows = table.len(), "Stored profile snapshot");
        Ok(())
    }

    /// Delete the snapshot. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed profile snapshot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PreprocessError::io(&self.path, e)),
        }
    }

    /// Describe the snapshot without decoding its rows.
    pub fn inspect(&self) -> Result<Option<SnapshotSummary>> {
        if !self.exists() {
            return Ok(None);
        }
        let meta = fs::metadata(&self.path).map_err(|e| PreprocessError::io(&self.path, e))?;
        let file = self.read_file()?;
        let schema_current = self.check_schema(&file).is_ok();
        Ok(Some(SnapshotSummary {
            path: self.path.clone(),
            format: file.format,
            schema_version: file.schema_version,
            signature: file.signature,
            label_column: file.label_column,
            row_count: file.row_count,
            column_count: file.columns.len(),
            size_bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            schema_current,
        }))
    }
}

/// Delete the configured snapshot. `Ok(false)` when caching is disabled or
/// there was nothing to delete.
pub fn clear_cache(config: &QualxConfig) -> Result<bool> {
    match config.cache_path() {
        Some(path) => CacheSnapshot::new(path).clear(),
        None => Ok(false),
    }
}

/// Write `bytes` to `path` through a temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| PreprocessError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> std::io::Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(PreprocessError::io(path, e));
    }
    Ok(())
}
