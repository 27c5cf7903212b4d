//! Preprocessing Error Taxonomy
//!
//! Every failure that can escape a `load` call is one of these variants.
//! Record-level problems (a single malformed event line) never show up here:
//! the event log reader absorbs them into its counters.
//!
//! # Propagation
//!
//! - `Configuration`: bad descriptor, missing source, bad option. Never retried.
//! - `Extraction`: a dataset's logs could not be decoded as a whole. Aborts the load.
//! - `SchemaMismatch`: a cached snapshot disagrees with the current feature schema.
//! - `Cancelled`: the caller tripped the cancel flag mid-load.

use std::fmt;
use std::path::{Path, PathBuf};

/// Stable classification used for CLI exit codes and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Extraction,
    SchemaMismatch,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Extraction => "extraction",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

/// Errors produced by the preprocessing pipeline.
#[derive(Debug)]
pub enum PreprocessError {
    /// Missing/invalid descriptor, unresolvable source path, invalid option.
    Configuration(String),
    /// A dataset's event logs failed to decode.
    Extraction {
        dataset: String,
        source: PathBuf,
        reason: String,
    },
    /// Cached snapshot columns or version disagree with the current schema.
    SchemaMismatch {
        path: PathBuf,
        missing: Vec<String>,
        extra: Vec<String>,
        detail: String,
    },
    /// The load was aborted through its cancel flag.
    Cancelled,
    /// Filesystem failure outside of event log decoding (cache, descriptors).
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// JSON encoding/decoding failure of a cache snapshot or export.
    Json(serde_json::Error),
}

impl PreprocessError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn extraction(
        dataset: impl Into<String>,
        source: impl AsRef<Path>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Extraction {
            dataset: dataset.into(),
            source: source.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } | Self::Json(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Extraction {
                dataset,
                source,
                reason,
            } => write!(
                f,
                "Extraction error in dataset '{}' ({}): {}",
                dataset,
                source.display(),
                reason
            ),
            Self::SchemaMismatch {
                path,
                missing,
                extra,
                detail,
            } => {
                write!(f, "Schema mismatch in cached profile {}: {}", path.display(), detail)?;
                if !missing.is_empty() {
                    write!(f, "; missing columns: {:?}", missing)?;
                }
                if !extra.is_empty() {
                    write!(f, "; unexpected columns: {:?}", extra)?;
                }
                write!(
                    f,
                    " (try removing {} and reloading to recompute from event logs)",
                    path.display()
                )
            }
            Self::Cancelled => write!(f, "Load cancelled"),
            Self::Io { path, source } => write!(f, "I/O error at {}: {}", path.display(), source),
            Self::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for PreprocessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PreprocessError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Result alias for the preprocessing pipeline.
pub type Result<T> = std::result::Result<T, PreprocessError>;
