//! Qualx Preprocessing CLI
//!
//! Loads dataset descriptors and Spark event logs into the profile table,
//! computes the CPU/GPU query alignment, and manages the cached snapshot.
//!
//! # Usage
//!
//! ```bash
//! qualx load  --datasets ./datasets --output profile.json
//! qualx align --datasets ./datasets --output alignment.json
//! qualx schema --label duration_sum
//! qualx cache inspect
//! qualx cache clear
//! qualx synth --out ./demo
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 2: Configuration error or stale cached snapshot
//! - 3: Runtime error (event log extraction, I/O, cancellation)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use qualx_preprocess::preprocess::cache::write_atomic;
use qualx_preprocess::preprocess::schema::{column_kind, ordered_columns};
use qualx_preprocess::preprocess::synthetic::SyntheticDataset;
use qualx_preprocess::preprocess::{
    alignment_summary, compute_alignment, expected_columns, global_config, reload_global_config,
    AlignmentTable, CacheOutcome, CacheSnapshot, ErrorKind, LoadReport, PreprocessError,
    ProfileAggregator, ProfileTable, QualxConfig, RunRole,
};

/// Spark event log preprocessing for qualification model training
#[derive(Parser, Debug)]
#[command(name = "qualx")]
#[command(about = "Build per-query profile tables and CPU/GPU alignments from Spark event logs")]
struct Cli {
    /// Label column (overrides QUALX_LABEL)
    #[arg(long, global = true)]
    label: Option<String>,

    /// Snapshot directory (overrides QUALX_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Extract datasets one at a time
    #[arg(long, global = true)]
    sequential: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load every dataset and summarize the profile table
    Load {
        /// Directory of dataset descriptor files
        #[arg(short, long, env = "QUALX_DATASETS")]
        datasets: PathBuf,

        /// Write the table as columnar JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load every dataset and pair CPU/GPU queries
    Align {
        /// Directory of dataset descriptor files
        #[arg(short, long, env = "QUALX_DATASETS")]
        datasets: PathBuf,

        /// Write the alignment records as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the expected profile columns
    Schema,

    /// Inspect or delete the cached snapshot
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write a synthetic CPU/GPU workload (descriptors plus zstd event logs)
    Synth {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Deterministic seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Describe the snapshot without loading it
    Inspect,
    /// Delete the snapshot
    Clear,
}

fn main() {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "qualx_preprocess=debug"
    } else {
        "qualx_preprocess=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::WARN.into())
                .add_directive(directive.parse().expect("static directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        let code = exit_code(&e);
        eprintln!("error: {:#}", e);
        std::process::exit(code);
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PreprocessError>().map(PreprocessError::kind) {
        Some(ErrorKind::Configuration) | Some(ErrorKind::SchemaMismatch) => 2,
        _ => 3,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Load { datasets, output } => {
            let (table, report) = load(&config, &datasets)?;
            print_load_summary(&table, &report);
            if let Some(path) = output {
                write_atomic(&path, &table.to_json_bytes()?)?;
                info!(path = %path.display(), "Profile table written");
            }
        }
        Commands::Align { datasets, output } => {
            let (table, report) = load(&config, &datasets)?;
            print_load_summary(&table, &report);
            let alignment = compute_alignment(&table);
            print_alignment_summary(&table, &alignment);
            if let Some(path) = output {
                let bytes = serde_json::to_vec_pretty(&alignment.records)?;
                write_atomic(&path, &bytes)?;
                info!(path = %path.display(), records = alignment.len(), "Alignment written");
            }
        }
        Commands::Schema => print_schema(&config),
        Commands::Cache { action } => {
            let path = config
                .cache_path()
                .context("no cache directory configured (set QUALX_CACHE_DIR or --cache-dir)")?;
            let snapshot = CacheSnapshot::new(path);
            match action {
                CacheAction::Inspect => inspect_cache(&snapshot)?,
                CacheAction::Clear => {
                    if snapshot.clear()? {
                        println!("Removed {}", snapshot.path().display());
                    } else {
                        println!("No snapshot at {}", snapshot.path().display());
                    }
                }
            }
        }
        Commands::Synth { out, seed } => synth(&out, seed)?,
    }

    Ok(())
}

/// Process config from the environment, with command-line overrides applied.
fn resolve_config(cli: &Cli) -> Result<QualxConfig> {
    let mut config = (*reload_global_config()?).clone();
    if let Some(label) = &cli.label {
        config = config.with_label(label.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir.clone());
    }
    if cli.sequential {
        config = config.with_parallel(false);
    }
    config.validate()?;
    global_config().replace(config.clone())?;
    Ok(config)
}

fn load(config: &QualxConfig, datasets: &Path) -> Result<(ProfileTable, LoadReport)> {
    let (_, table, report) = ProfileAggregator::new(Arc::new(config.clone()))
        .load_with_report(datasets)
        .with_context(|| format!("loading datasets from {}", datasets.display()))?;
    Ok((table, report))
}

fn print_load_summary(table: &ProfileTable, report: &LoadReport) {
    println!("{}", "=".repeat(70));
    println!("PROFILE SUMMARY");
    println!("{}", "=".repeat(70));
    println!("Label column:       {}", table.label_column());
    println!("Rows:               {}", table.len());
    println!("Columns:            {}", table.columns().len());
    let cache = match report.cache {
        CacheOutcome::Disabled => "disabled".to_string(),
        CacheOutcome::Hit => "hit".to_string(),
        CacheOutcome::Stored => "stored".to_string(),
    };
    match &report.cache_path {
        Some(path) => println!("Cache:              {} ({})", cache, path.display()),
        None => println!("Cache:              {}", cache),
    }
    println!("Elapsed:            {} ms", report.elapsed_ms);

    let stats = report.reader_stats();
    if stats.warnings() > 0 {
        println!(
            "Skipped:            {} malformed, {} orphaned, {} incomplete, {} truncated",
            stats.malformed, stats.orphaned, stats.incomplete, stats.truncated_files
        );
    }

    println!();
    println!("{:<32} {:>8} {:>8}", "dataset", "cpu", "gpu");
    for dataset in table.datasets() {
        println!(
            "{:<32} {:>8} {:>8}",
            dataset,
            table.count(dataset, RunRole::Baseline),
            table.count(dataset, RunRole::Accelerated)
        );
    }
    println!();
}

fn print_alignment_summary(table: &ProfileTable, alignment: &AlignmentTable) {
    println!("{}", "=".repeat(70));
    println!("ALIGNMENT");
    println!("{}", "=".repeat(70));
    println!(
        "{:<32} {:>8} {:>10} {:>10}",
        "dataset", "matched", "cpu only", "gpu only"
    );
    for summary in alignment_summary(table, alignment) {
        println!(
            "{:<32} {:>8} {:>10} {:>10}",
            summary.dataset,
            summary.matched,
            summary.unmatched_baseline(),
            summary.unmatched_accelerated()
        );
    }
    println!("Total pairs:        {}", alignment.len());
    println!("Injective:          {}", alignment.is_injective());
}

fn print_schema(config: &QualxConfig) {
    let expected = expected_columns(&config.label);
    println!("# label: {}", config.label);
    for column in ordered_columns() {
        let kind = column_kind(column)
            .map(|k| format!("{:?}", k))
            .unwrap_or_default();
        let marker = if column == config.label { " (label)" } else { "" };
        println!("{:<36} {}{}", column, kind, marker);
    }
    println!("# {} columns", expected.len());
}

fn inspect_cache(snapshot: &CacheSnapshot) -> Result<()> {
    let Some(summary) = snapshot.inspect()? else {
        println!("No snapshot at {}", snapshot.path().display());
        return Ok(());
    };
    println!("Path:               {}", summary.path.display());
    println!("Format:             {} v{}", summary.format, summary.schema_version);
    println!("Schema current:     {}", summary.schema_current);
    println!("Label column:       {}", summary.label_column);
    println!("Rows:               {}", summary.row_count);
    println!("Columns:            {}", summary.column_count);
    println!("Size:               {} bytes", summary.size_bytes);
    println!("Signature:          {}", summary.signature);
    if let Some(modified) = summary.modified {
        println!("Modified:           {}", modified.to_rfc3339());
    }
    if !summary.schema_current {
        println!(
            "Snapshot does not match the current schema; remove {} to recompute.",
            summary.path.display()
        );
    }
    Ok(())
}

fn synth(out: &Path, seed: u64) -> Result<()> {
    let workloads: [(&str, &[&str]); 3] = [
        ("nds_sf1", &["db.store_sales", "db.web_sales", "db.catalog_sales", "db.inventory"]),
        ("tpch_sf1", &["db.lineitem", "db.orders", "db.customer"]),
        ("etl_cpu_only", &["db.events"]),
    ];
    for (i, (name, tables)) in workloads.iter().enumerate() {
        let dataset = if name.ends_with("cpu_only") {
            SyntheticDataset::baseline_only(name, tables, seed + i as u64)
        } else {
            SyntheticDataset::paired(name, tables, seed + i as u64)
        };
        let descriptor = dataset
            .write(out)
            .with_context(|| format!("writing synthetic dataset {}", name))?;
        println!("Wrote {}", descriptor.display());
    }
    println!("Run: qualx load --datasets {}", out.join("datasets").display());
    Ok(())
}
