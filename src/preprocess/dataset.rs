//! Dataset Registry
//!
//! Discovers dataset descriptor files (one JSON document per logical dataset)
//! and resolves every referenced event log source before anything is read.
//!
//! ```json
//! {
//!   "name": "nds_sf1",
//!   "label": "Duration",
//!   "platform": "onprem",
//!   "scale_factor": 1,
//!   "runs": [
//!     {"role": "baseline",    "source": "nds/cpu"},
//!     {"role": "accelerated", "source": "nds/gpu"}
//!   ]
//! }
//! ```
//!
//! A missing source path fails discovery with a configuration error naming the
//! path, so the event log reader never sees a dangling reference.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::preprocess::config::QualxConfig;
use crate::preprocess::error::{PreprocessError, Result};

/// Role a run plays in a CPU/GPU comparison.
///
/// Ordering matters: baseline rows sort before accelerated rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunRole {
    #[serde(alias = "cpu", alias = "CPU")]
    Baseline,
    #[serde(alias = "gpu", alias = "GPU")]
    Accelerated,
}

impl RunRole {
    /// Value of the `runType` column.
    pub fn run_type(&self) -> &'static str {
        match self {
            Self::Baseline => "CPU",
            Self::Accelerated => "GPU",
        }
    }

    pub fn from_run_type(value: &str) -> Option<Self> {
        match value {
            "CPU" => Some(Self::Baseline),
            "GPU" => Some(Self::Accelerated),
            _ => None,
        }
    }

    pub fn all() -> &'static [RunRole] {
        &[Self::Baseline, Self::Accelerated]
    }
}

impl fmt::Display for RunRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// Raw descriptor document as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default = "default_scale_factor")]
    scale_factor: i64,
    runs: Vec<RunEntryFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunEntryFile {
    role: RunRole,
    source: PathBuf,
}

fn default_platform() -> String {
    "onprem".to_string()
}

fn default_scale_factor() -> i64 {
    1
}

/// One event log source of a dataset, with its path resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSource {
    pub role: RunRole,
    pub path: PathBuf,
}

/// A logical dataset: one workload, run under one or both engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    /// Label declared by the descriptor, if any.
    pub label: Option<String>,
    pub platform: String,
    pub scale_factor: i64,
    /// Run entries in descriptor order.
    pub runs: Vec<RunSource>,
    /// File the descriptor was read from.
    pub descriptor_path: PathBuf,
}

impl DatasetDescriptor {
    pub fn has_role(&self, role: RunRole) -> bool {
        self.runs.iter().any(|r| r.role == role)
    }

    /// True when both roles are present, so alignment can produce pairs.
    pub fn is_alignable(&self) -> bool {
        self.has_role(RunRole::Baseline) && self.has_role(RunRole::Accelerated)
    }

    pub fn runs_for(&self, role: RunRole) -> impl Iterator<Item = &RunSource> {
        self.runs.iter().filter(move |r| r.role == role)
    }
}

/// Dataset descriptors keyed by unique name.
pub type DatasetMap = BTreeMap<String, DatasetDescriptor>;

// =============================================================================
// DISCOVERY
// =============================================================================

/// Parses descriptor directories.
pub struct DatasetRegistry<'a> {
    config: &'a QualxConfig,
}

impl<'a> DatasetRegistry<'a> {
    pub fn new(config: &'a QualxConfig) -> Self {
        Self { config }
    }

    /// Read every `*.json` descriptor below `dir` (recursively, sorted).
    pub fn discover(&self, dir: &Path) -> Result<DatasetMap> {
        if !dir.is_dir() {
            return Err(PreprocessError::configuration(format!(
                "dataset directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        collect_json_files(dir, &mut files)?;
        files.sort();

        if files.is_empty() {
            return Err(PreprocessError::configuration(format!(
                "no dataset descriptor files (*.json) under {}",
                dir.display()
            )));
        }

        let mut datasets = DatasetMap::new();
        for file in files {
            let descriptor = self.parse_file(&file)?;
            if let Some(previous) = datasets.get(&descriptor.name) {
                return Err(PreprocessError::configuration(format!(
                    "duplicate dataset name '{}' in {} and {}",
                    descriptor.name,
                    previous.descriptor_path.display(),
                    file.display()
                )));
            }
            debug!(
                dataset = %descriptor.name,
                runs = descriptor.runs.len(),
                alignable = descriptor.is_alignable(),
                "Registered dataset"
            );
            datasets.insert(descriptor.name.clone(), descriptor);
        }

        info!(count = datasets.len(), dir = %dir.display(), "Discovered datasets");
        Ok(datasets)
    }

    /// Parse and validate a single descriptor file.
    pub fn parse_file(&self, path: &Path) -> Result<DatasetDescriptor> {
        let text = std::fs::read_to_string(path).map_err(|e| PreprocessError::io(path, e))?;
        let raw: DescriptorFile = serde_json::from_str(&text).map_err(|e| {
            PreprocessError::configuration(format!(
                "invalid dataset descriptor {}: {}",
                path.display(),
                e
            ))
        })?;

        if raw.name.trim().is_empty() {
            return Err(PreprocessError::configuration(format!(
                "dataset descriptor {} has an empty name",
                path.display()
            )));
        }
        if raw.runs.is_empty() {
            return Err(PreprocessError::configuration(format!(
                "dataset '{}' ({}) lists no runs",
                raw.name,
                path.display()
            )));
        }
        if let Some(label) = &raw.label {
            if label != &self.config.label {
                return Err(PreprocessError::configuration(format!(
                    "dataset '{}' declares label '{}' but the configured label is '{}'",
                    raw.name, label, self.config.label
                )));
            }
        }

        let base = self.source_base(path);
        let mut runs = Vec::with_capacity(raw.runs.len());
        for entry in raw.runs {
            let resolved = if entry.source.is_absolute() {
                entry.source
            } else {
                base.join(&entry.source)
            };
            if !resolved.exists() {
                return Err(PreprocessError::configuration(format!(
                    "dataset '{}': event log source does not exist: {}",
                    raw.name,
                    resolved.display()
                )));
            }
            runs.push(RunSource {
                role: entry.role,
                path: resolved,
            });
        }

        let descriptor = DatasetDescriptor {
            name: raw.name,
            label: raw.label,
            platform: raw.platform,
            scale_factor: raw.scale_factor,
            runs,
            descriptor_path: path.to_path_buf(),
        };
        if !descriptor.is_alignable() {
            warn!(
                dataset = %descriptor.name,
                "Dataset lacks a baseline or accelerated run; its rows will not be aligned"
            );
        }
        Ok(descriptor)
    }

    fn source_base(&self, descriptor_path: &Path) -> PathBuf {
        match &self.config.data_dir {
            Some(dir) => dir.clone(),
            None => descriptor_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PreprocessError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PreprocessError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

/// Discover datasets under `dir` using `config`.
pub fn discover_datasets(dir: &Path, config: &QualxConfig) -> Result<DatasetMap> {
    DatasetRegistry::new(config).discover(dir)
}
