//! `load_datasets` over the process-wide configuration
//!
//! Runs in its own test binary because it mutates `QUALX_*` variables and
//! reloads the global handle.

use std::path::PathBuf;
use tempfile::TempDir;

use qualx_preprocess::preprocess::synthetic::SyntheticDataset;
use qualx_preprocess::preprocess::{
    global_config, load_datasets, reload_global_config, CacheSnapshot,
};

fn clear_qualx_env() {
    for key in [
        "QUALX_CONFIG",
        "QUALX_LABEL",
        "QUALX_DATA_DIR",
        "QUALX_CACHE_DIR",
        "QUALX_CACHE_FILE",
        "QUALX_PARALLEL",
    ] {
        std::env::remove_var(key);
    }
}

fn workload(root: &TempDir) -> PathBuf {
    SyntheticDataset::paired("nds", &["db.store_sales", "db.web_sales", "db.inventory"], 3)
        .write(root.path())
        .unwrap();
    SyntheticDataset::baseline_only("etl", &["db.events"], 4)
        .write(root.path())
        .unwrap();
    root.path().join("datasets")
}

#[test]
fn test_reload_switches_label_for_new_loads_only() {
    clear_qualx_env();
    let root = TempDir::new().unwrap();
    let dir = workload(&root);
    let cache_dir = root.path().join("cache");
    let snapshot = CacheSnapshot::new(cache_dir.join("preprocessed.json"));

    std::env::set_var("QUALX_LABEL", "Duration");
    std::env::set_var("QUALX_CACHE_DIR", &cache_dir);
    let first_config = reload_global_config().unwrap();
    assert_eq!(first_config.label, "Duration");

    let (datasets, first) = load_datasets(&dir).unwrap();
    assert_eq!(datasets.len(), 2);
    assert_eq!(first.label_column(), "Duration");
    assert!(!first.is_empty());
    let first_bytes = first.to_json_bytes().unwrap();
    let summary = snapshot.inspect().unwrap().unwrap();
    assert_eq!(summary.label_column, "Duration");
    assert_eq!(summary.row_count, first.len());

    std::env::set_var("QUALX_LABEL", "duration_sum");
    reload_global_config().unwrap();
    assert_eq!(global_config().current().label, "duration_sum");

    let (_, second) = load_datasets(&dir).unwrap();
    assert_eq!(second.label_column(), "duration_sum");
    assert_eq!(second.len(), first.len());
    for row in second.rows() {
        assert_eq!(Some(row.label), row.feature("duration_sum"));
    }
    assert_eq!(snapshot.inspect().unwrap().unwrap().label_column, "duration_sum");

    // Earlier table and config snapshot are untouched by the reload.
    assert_eq!(first.label_column(), "Duration");
    assert_eq!(first.to_json_bytes().unwrap(), first_bytes);
    assert_eq!(first_config.label, "Duration");
    for row in first.rows() {
        assert_eq!(Some(row.label), row.feature("Duration"));
    }
}
