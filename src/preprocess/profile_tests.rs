//! Tests for the Profile Aggregator and Cached Profile Snapshot
//!
//! These tests verify:
//! 1. Tables carry exactly the expected columns and one row per execution
//! 2. Row order is independent of parallelism and descriptor order
//! 3. A matching snapshot is served without re-reading logs
//! 4. Stale or foreign snapshots are handled as documented
//! 5. Failed and cancelled loads publish nothing

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::preprocess::cache::{dataset_signature, CacheSnapshot};
use crate::preprocess::config::QualxConfig;
use crate::preprocess::dataset::{discover_datasets, DatasetDescriptor, RunRole};
use crate::preprocess::error::{ErrorKind, PreprocessError};
use crate::preprocess::event_log::CancelFlag;
use crate::preprocess::profile::{CacheOutcome, ProfileAggregator, ProfileTable};
use crate::preprocess::schema::{expected_columns, CellValue, MISSING_FEATURE};
use crate::preprocess::synthetic::SyntheticDataset;

fn workspace() -> TempDir {
    let root = TempDir::new().unwrap();
    SyntheticDataset::paired("nds", &["db.store_sales", "db.web_sales", "db.catalog_sales"], 1)
        .write(root.path())
        .unwrap();
    SyntheticDataset::paired("tpch", &["db.lineitem", "db.orders"], 2)
        .write(root.path())
        .unwrap();
    root
}

fn config(root: &Path) -> QualxConfig {
    QualxConfig::default().with_cache_dir(root.join("cache"))
}

fn aggregator(config: QualxConfig) -> ProfileAggregator {
    ProfileAggregator::new(Arc::new(config))
}

// =============================================================================
// TABLE SHAPE
// =============================================================================

#[test]
fn test_table_has_expected_columns_and_rows() {
    let root = workspace();
    let (datasets, table) = aggregator(QualxConfig::default())
        .load(&root.path().join("datasets"))
        .unwrap();

    assert_eq!(datasets.len(), 2);
    // nds: 3 cpu + 4 gpu (warm-up), tpch: 2 cpu + 3 gpu
    assert_eq!(table.len(), 12);
    assert_eq!(table.count("nds", RunRole::Baseline), 3);
    assert_eq!(table.count("nds", RunRole::Accelerated), 4);

    let columns: BTreeSet<String> = table.columns().into_iter().collect();
    assert_eq!(columns, expected_columns("Duration"));
    assert!(table.rows().iter().all(|r| r.hash.len() == 16));
    assert!(table.rows().iter().all(|r| r.label == r.feature("Duration").unwrap()));
}

#[test]
fn test_rows_are_in_canonical_order() {
    let root = workspace();
    let (_, table) = aggregator(QualxConfig::default())
        .load(&root.path().join("datasets"))
        .unwrap();

    let keys: Vec<_> = table
        .rows()
        .iter()
        .map(|r| (r.dataset.clone(), r.role, r.sql_id))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn test_label_follows_configuration() {
    let root = workspace();
    let (_, table) = aggregator(QualxConfig::default().with_label("duration_sum"))
        .load(&root.path().join("datasets"))
        .unwrap();

    assert_eq!(table.label_column(), "duration_sum");
    for row in table.rows() {
        assert_eq!(row.label, row.feature("duration_sum").unwrap());
        assert_ne!(row.label, MISSING_FEATURE);
    }
}

#[test]
fn test_column_access() {
    let root = workspace();
    let (_, table) = aggregator(QualxConfig::default())
        .load(&root.path().join("datasets"))
        .unwrap();

    let run_types = table.column("runType").unwrap();
    assert_eq!(run_types.len(), table.len());
    assert_eq!(run_types[0], CellValue::Text("CPU".to_string()));
    assert!(table.column("not_a_column").is_none());
}

#[test]
fn test_conformance_rejects_unknown_label_and_stray_label_values() {
    let root = workspace();
    let (_, table) = aggregator(QualxConfig::default())
        .load(&root.path().join("datasets"))
        .unwrap();
    table.check_conformance().unwrap();

    let relabelled = ProfileTable::from_rows("speedup", table.rows().to_vec());
    let err = relabelled.check_conformance().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("speedup"), "{}", err);

    let mut rows = table.rows().to_vec();
    rows[0].label += 1.0;
    let err = ProfileTable::from_rows("Duration", rows)
        .check_conformance()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);
}

// =============================================================================
// DETERMINISM
// =============================================================================

#[test]
fn test_parallel_and_sequential_loads_match() {
    let root = workspace();
    let dir = root.path().join("datasets");
    let (_, parallel) = aggregator(QualxConfig::default().with_parallel(true))
        .load(&dir)
        .unwrap();
    let (_, sequential) = aggregator(QualxConfig::default().with_parallel(false))
        .load(&dir)
        .unwrap();

    assert_eq!(parallel, sequential);
    assert_eq!(parallel.to_json_bytes().unwrap(), sequential.to_json_bytes().unwrap());
}

#[test]
fn test_descriptor_order_does_not_matter() {
    let root = workspace();
    let config = QualxConfig::default();
    let datasets = discover_datasets(&root.path().join("datasets"), &config).unwrap();
    let forward: Vec<&DatasetDescriptor> = datasets.values().collect();
    let reverse: Vec<&DatasetDescriptor> = datasets.values().rev().collect();

    let agg = aggregator(config);
    let (a, _) = agg.build(&forward).unwrap();
    let (b, _) = agg.build(&reverse).unwrap();
    assert_eq!(a, b);
}

// =============================================================================
// CACHE
// =============================================================================

#[test]
fn test_second_load_is_served_from_cache() {
    let root = workspace();
    let dir = root.path().join("datasets");
    let agg = aggregator(config(root.path()));

    let (_, first, report) = agg.load_with_report(&dir).unwrap();
    assert_eq!(report.cache, CacheOutcome::Stored);
    assert!(root.path().join("cache/preprocessed.json").is_file());

    let (_, second, report) = agg.load_with_report(&dir).unwrap();
    assert_eq!(report.cache, CacheOutcome::Hit);
    assert!(report.datasets.is_empty());
    assert_eq!(first, second);
    assert_eq!(first.to_json_bytes().unwrap(), second.to_json_bytes().unwrap());
}

#[test]
fn test_deleting_cache_reproduces_table() {
    let root = workspace();
    let dir = root.path().join("datasets");
    let agg = aggregator(config(root.path()));

    let (_, first) = agg.load(&dir).unwrap();
    let snapshot = CacheSnapshot::new(root.path().join("cache/preprocessed.json"));
    assert!(snapshot.clear().unwrap());
    assert!(!snapshot.clear().unwrap());

    let (_, second) = agg.load(&dir).unwrap();
    assert_eq!(first.to_json_bytes().unwrap(), second.to_json_bytes().unwrap());
}

#[test]
fn test_changed_inputs_recompute() {
    let root = workspace();
    let dir = root.path().join("datasets");
    let agg = aggregator(config(root.path()));
    let (_, first) = agg.load(&dir).unwrap();

    SyntheticDataset::paired("extra", &["db.item"], 3)
        .write(root.path())
        .unwrap();
    let (_, second, report) = agg.load_with_report(&dir).unwrap();
    assert_eq!(report.cache, CacheOutcome::Stored);
    assert_eq!(second.len(), first.len() + 3);
}

#[test]
fn test_stale_schema_is_rejected() {
    let root = workspace();
    let dir = root.path().join("datasets");
    let agg = aggregator(config(root.path()));
    agg.load(&dir).unwrap();

    // Rename one column in the stored snapshot.
    let path = root.path().join("cache/preprocessed.json");
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replacen("\"numTasks\"", "\"taskCount\"", 1)).unwrap();

    let err = agg.load(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    let message = err.to_string();
    assert!(message.contains("numTasks"), "{}", message);
    assert!(message.contains("taskCount"), "{}", message);
    assert!(message.contains("try removing"), "{}", message);
    assert!(message.contains("preprocessed.json"), "{}", message);

    // The bad snapshot is left for the operator.
    assert!(fs::read_to_string(&path).unwrap().contains("taskCount"));
}

#[test]
fn test_unreadable_snapshot_is_schema_mismatch() {
    let root = workspace();
    let cache_dir = root.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("preprocessed.json"), b"[1, 2, 3]").unwrap();

    let err = aggregator(config(root.path()))
        .load(&root.path().join("datasets"))
        .unwrap_err();
    assert!(matches!(err, PreprocessError::SchemaMismatch { .. }));
}

#[test]
fn test_snapshot_for_other_label_is_a_miss() {
    let root = workspace();
    let dir = root.path().join("datasets");
    aggregator(config(root.path())).load(&dir).unwrap();

    let (_, table, report) = aggregator(config(root.path()).with_label("duration_sum"))
        .load_with_report(&dir)
        .unwrap();
    assert_eq!(report.cache, CacheOutcome::Stored);
    assert_eq!(table.label_column(), "duration_sum");
}

#[test]
fn test_signature_tracks_log_content() {
    let root = workspace();
    let config = QualxConfig::default();
    let datasets = discover_datasets(&root.path().join("datasets"), &config).unwrap();
    let before = dataset_signature(&datasets, "Duration").unwrap();
    assert_eq!(before, dataset_signature(&datasets, "Duration").unwrap());
    assert_ne!(before, dataset_signature(&datasets, "duration_sum").unwrap());

    let log = root.path().join("logs/nds/cpu/app-nds-cpu.zstd");
    let mut bytes = fs::read(&log).unwrap();
    bytes.extend_from_slice(b"\n");
    fs::write(&log, bytes).unwrap();
    assert_ne!(before, dataset_signature(&datasets, "Duration").unwrap());
}

#[test]
fn test_inspect_reports_header() {
    let root = workspace();
    let (_, table) = aggregator(config(root.path()))
        .load(&root.path().join("datasets"))
        .unwrap();

    let summary = CacheSnapshot::new(root.path().join("cache/preprocessed.json"))
        .inspect()
        .unwrap()
        .unwrap();
    assert_eq!(summary.row_count, table.len());
    assert_eq!(summary.label_column, "Duration");
    assert!(summary.schema_current);
    assert!(summary.modified.is_some());

    assert!(CacheSnapshot::new(root.path().join("cache/none.json"))
        .inspect()
        .unwrap()
        .is_none());
}

// =============================================================================
// FAILURE ATOMICITY
// =============================================================================

#[test]
fn test_corrupt_log_aborts_without_caching() {
    let root = workspace();
    fs::write(root.path().join("logs/tpch/gpu/app-tpch-gpu.zstd"), b"garbage, not zstd").unwrap();

    let err = aggregator(config(root.path()))
        .load(&root.path().join("datasets"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);
    assert!(err.to_string().contains("tpch"));
    assert!(!root.path().join("cache/preprocessed.json").exists());
}

#[test]
fn test_cancelled_load_publishes_nothing() {
    let root = workspace();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = aggregator(config(root.path()))
        .with_cancel_flag(cancel)
        .load(&root.path().join("datasets"))
        .unwrap_err();
    assert!(matches!(err, PreprocessError::Cancelled));
    let leftovers = fs::read_dir(root.path().join("cache"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_missing_source_is_configuration_error() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("datasets");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("broken.json"),
        r#"{"name": "broken", "runs": [{"role": "cpu", "source": "/definitely/not/here"}]}"#,
    )
    .unwrap();

    let err = aggregator(config(root.path())).load(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("/definitely/not/here"));
}

#[test]
fn test_empty_table_round_trips() {
    let table = ProfileTable::from_rows("Duration", Vec::new());
    let root = TempDir::new().unwrap();
    let snapshot = CacheSnapshot::new(root.path().join("p.json"));
    snapshot.store(&table, "sig").unwrap();
    assert_eq!(snapshot.load("Duration", "sig").unwrap(), Some(table));
    assert_eq!(snapshot.load("Duration", "other").unwrap(), None);
}
