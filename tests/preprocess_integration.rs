//! Integration tests for the preprocessing pipeline
//!
//! These tests build synthetic CPU/GPU workloads (zstd event logs plus
//! dataset descriptors) in a temp dir and run the public load and alignment
//! entry points over them.
//!
//! # Fixture Requirements
//!
//! The regression test reads a recorded workload from
//! `tests/fixtures/qualx/datasets`. If not present, it is skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use qualx_preprocess::preprocess::synthetic::SyntheticDataset;
use qualx_preprocess::preprocess::{
    compute_alignment, expected_columns, expected_raw_features, CancelFlag, ErrorKind,
    ProfileAggregator, QualxConfig, RunRole,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn fixture_datasets_dir() -> PathBuf {
    fixtures_dir().join("qualx").join("datasets")
}

/// Skip test if the recorded fixture workload doesn't exist
fn skip_if_no_fixture() -> bool {
    !fixture_datasets_dir().exists()
}

fn synthetic_workload(root: &Path) -> PathBuf {
    SyntheticDataset::paired(
        "nds_sf1",
        &["db.store_sales", "db.web_sales", "db.catalog_sales", "db.inventory"],
        11,
    )
    .write(root)
    .unwrap();
    SyntheticDataset::paired("tpch_sf1", &["db.lineitem", "db.orders", "db.customer"], 12)
        .write(root)
        .unwrap();
    SyntheticDataset::baseline_only("etl_cpu_only", &["db.events", "db.sessions"], 13)
        .write(root)
        .unwrap();
    root.join("datasets")
}

fn aggregator(config: QualxConfig) -> ProfileAggregator {
    ProfileAggregator::new(Arc::new(config))
}

// =============================================================================
// SYNTHETIC WORKLOAD
// =============================================================================

#[test]
fn test_load_and_align_synthetic_workload() {
    let root = TempDir::new().unwrap();
    let dir = synthetic_workload(root.path());

    let (datasets, table) = aggregator(QualxConfig::default()).load(&dir).unwrap();
    assert_eq!(datasets.len(), 3);
    // nds: 4 + 5, tpch: 3 + 4, etl: 2
    assert_eq!(table.len(), 18);

    let columns: BTreeSet<String> = table.columns().into_iter().collect();
    assert_eq!(columns, expected_columns("Duration"));
    let raw: BTreeSet<String> = expected_raw_features().into_iter().map(String::from).collect();
    assert!(raw.is_subset(&columns));
    assert!(table.rows().iter().all(|r| !r.hash.is_empty()));

    let alignment = compute_alignment(&table);
    assert_eq!(alignment.for_dataset("nds_sf1").count(), 4);
    assert_eq!(alignment.for_dataset("tpch_sf1").count(), 3);
    assert_eq!(alignment.for_dataset("etl_cpu_only").count(), 0);
    assert!(alignment.is_injective());

    // The warm-up query shifts GPU ids by one.
    for record in alignment.for_dataset("nds_sf1") {
        assert_eq!(record.sql_id_gpu, record.sql_id_cpu + 1);
        assert_eq!(record.app_id_cpu, "app-nds_sf1-cpu");
        assert_eq!(record.app_id_gpu, "app-nds_sf1-gpu");
    }
}

#[test]
fn test_every_aligned_pair_shares_a_hash() {
    let root = TempDir::new().unwrap();
    let dir = synthetic_workload(root.path());
    let (_, table) = aggregator(QualxConfig::default()).load(&dir).unwrap();
    let alignment = compute_alignment(&table);

    for record in &alignment.records {
        let hash_of = |role: RunRole, app: &str, sql_id: i64| {
            table
                .rows_for(&record.dataset)
                .find(|r| r.role == role && r.app_id == app && r.sql_id == sql_id)
                .map(|r| r.hash.clone())
                .unwrap()
        };
        let cpu = hash_of(RunRole::Baseline, &record.app_id_cpu, record.sql_id_cpu);
        let gpu = hash_of(RunRole::Accelerated, &record.app_id_gpu, record.sql_id_gpu);
        assert_eq!(cpu, record.hash);
        assert_eq!(gpu, record.hash);
    }
}

#[test]
fn test_alignment_is_stable_across_loads() {
    let root = TempDir::new().unwrap();
    let dir = synthetic_workload(root.path());
    let config = QualxConfig::default().with_cache_dir(root.path().join("cache"));

    let (_, fresh) = aggregator(config.clone()).load(&dir).unwrap();
    let (_, cached) = aggregator(config.clone().with_parallel(false)).load(&dir).unwrap();
    assert_eq!(fresh.to_json_bytes().unwrap(), cached.to_json_bytes().unwrap());
    assert_eq!(compute_alignment(&fresh), compute_alignment(&cached));
}

#[test]
fn test_cancel_mid_load_leaves_no_snapshot() {
    let root = TempDir::new().unwrap();
    let dir = synthetic_workload(root.path());
    let cache_dir = root.path().join("cache");

    let cancel = CancelFlag::new();
    let agg = aggregator(QualxConfig::default().with_cache_dir(&cache_dir))
        .with_cancel_flag(cancel.clone());
    cancel.cancel();
    let err = agg.load(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!cache_dir.join("preprocessed.json").exists());
}

#[test]
fn test_label_mismatch_in_descriptor_is_rejected() {
    let root = TempDir::new().unwrap();
    let dir = synthetic_workload(root.path());
    let path = dir.join("tpch_sf1.json");
    let mut descriptor: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    descriptor["label"] = serde_json::json!("duration_sum");
    fs::write(&path, descriptor.to_string()).unwrap();

    let err = aggregator(QualxConfig::default()).load(&dir).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("tpch_sf1"));
}

// =============================================================================
// RECORDED FIXTURE REGRESSION
// =============================================================================

#[test]
fn test_fixture_regression() {
    if skip_if_no_fixture() {
        eprintln!("Skipping: fixture workload not found at {:?}", fixture_datasets_dir());
        return;
    }

    let cache = TempDir::new().unwrap();
    let config = QualxConfig::default()
        .with_data_dir(fixtures_dir().join("qualx"))
        .with_cache_dir(cache.path());
    let (_, table) = aggregator(config.clone()).load(&fixture_datasets_dir()).unwrap();
    assert_eq!(table.len(), 194);

    let alignment = compute_alignment(&table);
    assert!(alignment.len() >= 46, "only {} alignments", alignment.len());
    assert!(alignment.is_injective());
    // Holds for this recording's submission order only.
    for record in &alignment.records {
        assert_eq!(record.sql_id_cpu, record.sql_id_gpu);
    }

    // Cache hit, then recompute from scratch after deleting the snapshot.
    let (_, cached) = aggregator(config.clone()).load(&fixture_datasets_dir()).unwrap();
    assert_eq!(cached, table);
    fs::remove_file(cache.path().join("preprocessed.json")).unwrap();
    let (_, recomputed) = aggregator(config).load(&fixture_datasets_dir()).unwrap();
    assert_eq!(recomputed.to_json_bytes().unwrap(), table.to_json_bytes().unwrap());
}

// =============================================================================
// CLI
// =============================================================================

fn qualx() -> std::process::Command {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_qualx"));
    for key in [
        "QUALX_CONFIG",
        "QUALX_LABEL",
        "QUALX_DATA_DIR",
        "QUALX_CACHE_DIR",
        "QUALX_CACHE_FILE",
        "QUALX_PARALLEL",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn test_cli_load_writes_table_and_snapshot() {
    let root = TempDir::new().unwrap();
    let demo = root.path().join("demo");
    let status = qualx().args(["synth", "--out"]).arg(&demo).status().unwrap();
    assert!(status.success());

    let output = root.path().join("out/profile.json");
    let status = qualx()
        .arg("--cache-dir")
        .arg(root.path().join("cache"))
        .args(["load", "--datasets"])
        .arg(demo.join("datasets"))
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(root.path().join("cache/preprocessed.json").is_file());

    let exported: serde_json::Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(exported["label_column"], "Duration");
    assert!(exported["row_count"].as_u64().unwrap() > 0);
}

#[test]
fn test_cli_exit_codes() {
    let root = TempDir::new().unwrap();

    // Missing descriptor directory.
    let status = qualx()
        .args(["load", "--datasets"])
        .arg(root.path().join("nowhere"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));

    // Unsupported label.
    let status = qualx().args(["--label", "speedup", "schema"]).status().unwrap();
    assert_eq!(status.code(), Some(2));

    // Stale snapshot.
    let demo = root.path().join("demo");
    assert!(qualx().args(["synth", "--out"]).arg(&demo).status().unwrap().success());
    let cache_dir = root.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(
        cache_dir.join("preprocessed.json"),
        r#"{"format":"qualx-profile","schema_version":0,"signature":"","label_column":"Duration","row_count":0,"columns":[],"data":[]}"#,
    )
    .unwrap();
    let output = qualx()
        .arg("--cache-dir")
        .arg(&cache_dir)
        .args(["align", "--datasets"])
        .arg(demo.join("datasets"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("try removing"));
}
