//! Process-wide Preprocessing Configuration
//!
//! Options are resolved once per process and can be explicitly reloaded.
//!
//! # Resolution Order
//!
//! ```text
//! built-in defaults
//!    ↓
//! TOML file at $QUALX_CONFIG (optional)
//!    ↓
//! environment variables (QUALX_LABEL, QUALX_DATA_DIR, QUALX_CACHE_DIR, ...)
//! ```
//!
//! # Reload Semantics
//!
//! `ConfigHandle` publishes an immutable `QualxConfig` snapshot through an
//! `ArcSwap`. A reload builds a complete new snapshot first and swaps it in
//! with a single store, so readers observe either the old or the new config,
//! never a mix. Profile tables already loaded keep the label column they were
//! built with.

use arc_swap::{ArcSwap, ArcSwapOption};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::preprocess::error::{PreprocessError, Result};

/// Label used when nothing else is configured.
pub const DEFAULT_LABEL: &str = "Duration";

/// Label columns the feature extractor knows how to populate.
pub const SUPPORTED_LABELS: &[&str] = &["Duration", "duration_sum"];

/// Default file name of the cached profile snapshot inside the cache dir.
pub const DEFAULT_CACHE_FILE: &str = "preprocessed.json";

pub const ENV_CONFIG_FILE: &str = "QUALX_CONFIG";
pub const ENV_LABEL: &str = "QUALX_LABEL";
pub const ENV_DATA_DIR: &str = "QUALX_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "QUALX_CACHE_DIR";
pub const ENV_CACHE_FILE: &str = "QUALX_CACHE_FILE";
pub const ENV_PARALLEL: &str = "QUALX_PARALLEL";

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualxConfig {
    /// Name of the supervised label column.
    pub label: String,
    /// Base directory for relative event log sources in descriptors.
    pub data_dir: Option<PathBuf>,
    /// Directory holding the cached profile snapshot. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Snapshot file name inside `cache_dir`.
    pub cache_file: String,
    /// Extract datasets on the rayon pool.
    pub parallel: bool,
}

impl Default for QualxConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            data_dir: None,
            cache_dir: None,
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            parallel: true,
        }
    }
}

/// Optional overrides read from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    label: Option<String>,
    data_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    cache_file: Option<String>,
    parallel: Option<bool>,
}

impl QualxConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary variable lookup.
    pub fn resolve_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = non_empty(lookup(ENV_CONFIG_FILE)) {
            config.apply_file(Path::new(&path))?;
        }

        if let Some(label) = non_empty(lookup(ENV_LABEL)) {
            config.label = label;
        }
        if let Some(dir) = non_empty(lookup(ENV_DATA_DIR)) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = non_empty(lookup(ENV_CACHE_DIR)) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(file) = non_empty(lookup(ENV_CACHE_FILE)) {
            config.cache_file = file;
        }
        if let Some(flag) = non_empty(lookup(ENV_PARALLEL)) {
            config.parallel = parse_bool(ENV_PARALLEL, &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PreprocessError::configuration(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|e| {
            PreprocessError::configuration(format!(
                "invalid config file {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(label) = file.label {
            self.label = label;
        }
        if file.data_dir.is_some() {
            self.data_dir = file.data_dir;
        }
        if file.cache_dir.is_some() {
            self.cache_dir = file.cache_dir;
        }
        if let Some(cache_file) = file.cache_file {
            self.cache_file = cache_file;
        }
        if let Some(parallel) = file.parallel {
            self.parallel = parallel;
        }
        debug!(path = %path.display(), "Applied config file");
        Ok(())
    }

    /// Check option values for consistency.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_LABELS.contains(&self.label.as_str()) {
            return Err(PreprocessError::configuration(format!(
                "unsupported label '{}' (supported: {})",
                self.label,
                SUPPORTED_LABELS.join(", ")
            )));
        }
        if self.cache_file.is_empty() || self.cache_file.contains(['/', '\\']) {
            return Err(PreprocessError::configuration(format!(
                "cache file name '{}' must be a plain file name",
                self.cache_file
            )));
        }
        Ok(())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Full path of the snapshot file, if caching is enabled.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(&self.cache_file))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn failure_message(err: PreprocessError) -> String {
    match err {
        PreprocessError::Configuration(msg) => msg,
        other => other.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PreprocessError::configuration(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

// =============================================================================
// RELOADABLE HANDLE
// =============================================================================

/// Shared handle to the current configuration snapshot.
pub struct ConfigHandle {
    current: ArcSwap<QualxConfig>,
    /// Resolution failure not yet superseded by a successful reload.
    failure: ArcSwapOption<String>,
    /// Serializes reloads; readers never take it.
    writer: Mutex<()>,
}

impl ConfigHandle {
    pub fn new(config: QualxConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            failure: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        }
    }

    /// Handle over the outcome of a resolution.
    ///
    /// A failed resolution publishes defaults, but `checked()` keeps
    /// returning the error until a reload or replace succeeds.
    pub fn from_resolution(resolved: Result<QualxConfig>) -> Self {
        match resolved {
            Ok(config) => Self::new(config),
            Err(err) => {
                warn!(error = %err, "Configuration did not resolve");
                let handle = Self::new(QualxConfig::default());
                handle.failure.store(Some(Arc::new(failure_message(err))));
                handle
            }
        }
    }

    /// Current snapshot. Holding the `Arc` pins that snapshot across reloads.
    pub fn current(&self) -> Arc<QualxConfig> {
        self.current.load_full()
    }

    /// Current snapshot, or the error that kept it from resolving.
    pub fn checked(&self) -> Result<Arc<QualxConfig>> {
        if let Some(message) = self.failure.load_full() {
            return Err(PreprocessError::configuration(message.as_str()));
        }
        Ok(self.current())
    }

    /// Re-resolve every option from the environment and publish the result.
    pub fn reload(&self) -> Result<Arc<QualxConfig>> {
        self.reload_with(|key| std::env::var(key).ok())
    }

    /// Re-resolve using an arbitrary lookup and publish the result.
    ///
    /// On error the previous snapshot stays published.
    pub fn reload_with<F>(&self, lookup: F) -> Result<Arc<QualxConfig>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let _guard = self.writer.lock();
        let fresh = Arc::new(QualxConfig::resolve_with(lookup)?);
        self.current.store(Arc::clone(&fresh));
        self.failure.store(None);
        info!(label = %fresh.label, cache = ?fresh.cache_path(), "Configuration reloaded");
        Ok(fresh)
    }

    /// Publish an explicit snapshot.
    pub fn replace(&self, config: QualxConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.writer.lock();
        self.current.store(Arc::new(config));
        self.failure.store(None);
        Ok(())
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: ConfigHandle =
        ConfigHandle::from_resolution(QualxConfig::from_env());
}

/// Process-wide configuration handle, resolved from the environment on first use.
///
/// Use `checked()` to observe a failed first resolution.
pub fn global_config() -> &'static ConfigHandle {
    &GLOBAL_CONFIG
}

/// Re-resolve the process-wide configuration from the environment.
pub fn reload_global_config() -> Result<Arc<QualxConfig>> {
    GLOBAL_CONFIG.reload()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = QualxConfig::resolve_with(lookup(&[])).unwrap();
        assert_eq!(config, QualxConfig::default());
        assert!(config.cache_path().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = QualxConfig::resolve_with(lookup(&[
            (ENV_LABEL, "duration_sum"),
            (ENV_CACHE_DIR, "/tmp/qualx_cache"),
            (ENV_PARALLEL, "false"),
        ]))
        .unwrap();
        assert_eq!(config.label, "duration_sum");
        assert!(!config.parallel);
        assert_eq!(
            config.cache_path(),
            Some(PathBuf::from("/tmp/qualx_cache/preprocessed.json"))
        );
    }

    #[test]
    fn test_unsupported_label_rejected() {
        let err = QualxConfig::resolve_with(lookup(&[(ENV_LABEL, "speedup")])).unwrap_err();
        assert_eq!(err.kind(), crate::preprocess::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("speedup"));
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qualx.toml");
        std::fs::write(&path, "label = \"duration_sum\"\ncache_file = \"profile.json\"\n").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let from_file =
            QualxConfig::resolve_with(lookup(&[(ENV_CONFIG_FILE, path_str.as_str())])).unwrap();
        assert_eq!(from_file.label, "duration_sum");
        assert_eq!(from_file.cache_file, "profile.json");

        let env_wins = QualxConfig::resolve_with(lookup(&[
            (ENV_CONFIG_FILE, path_str.as_str()),
            (ENV_LABEL, "Duration"),
        ]))
        .unwrap();
        assert_eq!(env_wins.label, "Duration");
        assert_eq!(env_wins.cache_file, "profile.json");
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let handle = ConfigHandle::new(QualxConfig::default());
        let before = handle.current();

        handle.reload_with(lookup(&[(ENV_LABEL, "duration_sum")])).unwrap();

        assert_eq!(before.label, "Duration");
        assert_eq!(handle.current().label, "duration_sum");
    }

    #[test]
    fn test_failed_resolution_is_reported_until_reload() {
        let resolved = QualxConfig::resolve_with(lookup(&[(ENV_LABEL, "speedup")]));
        let handle = ConfigHandle::from_resolution(resolved);
        let err = handle.checked().unwrap_err();
        assert_eq!(err.kind(), crate::preprocess::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("speedup"));

        assert!(handle.reload_with(lookup(&[(ENV_LABEL, "bogus")])).is_err());
        assert!(handle.checked().is_err());

        handle.reload_with(lookup(&[(ENV_LABEL, "duration_sum")])).unwrap();
        assert_eq!(handle.checked().unwrap().label, "duration_sum");
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let handle = ConfigHandle::new(QualxConfig::default().with_label("duration_sum"));
        assert!(handle.reload_with(lookup(&[(ENV_LABEL, "bogus")])).is_err());
        assert_eq!(handle.current().label, "duration_sum");
    }
}
