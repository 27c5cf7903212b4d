//! Spark Event Log Reader
//!
//! Turns one application's append-only event stream into a lazy sequence of
//! per-SQL-execution records.
//!
//! ```text
//! source path (file or directory tree)
//!    ↓  discover_applications()
//! ApplicationLog (one app, one or more rolling files)
//!    ↓  zstd / plain, JSON lines
//! EventLogReader: Iterator<Item = Result<EventLogRecord>>
//! ```
//!
//! # Stream Semantics
//!
//! - Forward-only and one-pass. Re-reading means calling `open` again.
//! - A record is emitted when its `SQLExecutionEnd` event arrives; jobs,
//!   stages and tasks in between are attributed through the
//!   `spark.sql.execution.id` job property.
//! - Lines that fail to parse are counted in `ReaderStats::malformed` and skipped.
//! - Executions still open at end of stream are counted as incomplete.
//! - A file that fails to decode after yielding lines is treated as truncated
//!   (counted, reading continues with the next file). A file that fails before
//!   yielding any line makes the source unreadable: the iterator yields one
//!   extraction error and then stops.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::preprocess::error::{PreprocessError, Result};
use crate::preprocess::plan::{normalize_plan, NormalizedPlan, SparkPlanInfo};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Lines between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Cooperative cancellation shared by every reader of one load.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// SOURCE DISCOVERY
// =============================================================================

/// One Spark application's event log, possibly split into rolling files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationLog {
    /// File or rolling-log directory identifying the application.
    pub path: PathBuf,
    /// Files in read order.
    pub files: Vec<PathBuf>,
}

/// Find every application log under `source`, in sorted path order.
pub fn discover_applications(source: &Path) -> Result<Vec<ApplicationLog>> {
    if source.is_file() {
        return Ok(vec![ApplicationLog {
            path: source.to_path_buf(),
            files: vec![source.to_path_buf()],
        }]);
    }

    let mut apps = Vec::new();
    walk_source(source, &mut apps)?;
    apps.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(apps)
}

fn walk_source(dir: &Path, apps: &mut Vec<ApplicationLog>) -> Result<()> {
    let mut entries = read_dir_sorted(dir)?;

    let is_rolling = dir
        .file_name()
        .map(|n| n.to_string_lossy().starts_with("eventlog_v2_"))
        .unwrap_or(false);
    if is_rolling {
        entries.retain(|p| p.is_file() && is_rolling_event_file(p));
        entries.sort_by_key(|p| (rolling_index(p), p.clone()));
        if !entries.is_empty() {
            apps.push(ApplicationLog {
                path: dir.to_path_buf(),
                files: entries,
            });
        }
        return Ok(());
    }

    for path in entries {
        if path.is_dir() {
            walk_source(&path, apps)?;
        } else if is_event_log_file(&path) {
            apps.push(ApplicationLog {
                path: path.clone(),
                files: vec![path],
            });
        }
    }
    Ok(())
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| PreprocessError::io(dir, e))? {
        let entry = entry.map_err(|e| PreprocessError::io(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_event_log_file(path: &Path) -> bool {
    let name = file_name(path);
    !(name.starts_with('.')
        || name.ends_with(".crc")
        || name.ends_with(".inprogress")
        || name.starts_with("appstatus_"))
}

fn is_rolling_event_file(path: &Path) -> bool {
    file_name(path).starts_with("events_")
}

/// `events_12_app-123.zstd` -> 12
fn rolling_index(path: &Path) -> u64 {
    file_name(path)
        .strip_prefix("events_")
        .and_then(|rest| rest.split('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Open `path`, decompressing zstd by extension or magic bytes.
fn open_decoded(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
    let by_extension = path
        .extension()
        .map(|ext| ext == "zstd" || ext == "zst")
        .unwrap_or(false);
    let compressed = by_extension || {
        let mut magic = [0u8; 4];
        let mut probe = File::open(path)?;
        probe.read_exact(&mut magic).is_ok() && magic == ZSTD_MAGIC
    };

    let file = File::open(path)?;
    if compressed {
        let decoder = zstd::stream::read::Decoder::new(file)?;
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

// =============================================================================
// RECORD TYPES
// =============================================================================

/// Application-level facts known when a record is emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    pub app_name: String,
    pub spark_version: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub executor_cores: Option<f64>,
    pub executor_memory_mb: Option<f64>,
    pub executors_added: u32,
    /// RAPIDS SQL plugin configured and enabled.
    pub accelerated: bool,
}

/// Metrics of one finished task. `None` means the event did not carry the counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub duration_ms: Option<f64>,
    pub failed: bool,
    pub executor_run_time: Option<f64>,
    /// Nanoseconds, as reported by Spark.
    pub executor_cpu_time: Option<f64>,
    pub executor_deserialize_time: Option<f64>,
    pub jvm_gc_time: Option<f64>,
    pub result_serialization_time: Option<f64>,
    pub result_size: Option<f64>,
    pub memory_bytes_spilled: Option<f64>,
    pub disk_bytes_spilled: Option<f64>,
    pub peak_execution_memory: Option<f64>,
    pub input_bytes_read: Option<f64>,
    pub input_records_read: Option<f64>,
    pub output_bytes_written: Option<f64>,
    pub output_records_written: Option<f64>,
    pub sr_remote_blocks_fetched: Option<f64>,
    pub sr_local_blocks_fetched: Option<f64>,
    pub sr_fetch_wait_time: Option<f64>,
    pub sr_remote_bytes_read: Option<f64>,
    pub sr_remote_bytes_read_to_disk: Option<f64>,
    pub sr_local_bytes_read: Option<f64>,
    pub sr_total_records_read: Option<f64>,
    pub sw_bytes_written: Option<f64>,
    /// Nanoseconds, as reported by Spark.
    pub sw_write_time: Option<f64>,
    pub sw_records_written: Option<f64>,
}

/// One SQL execution within one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogRecord {
    pub app: AppInfo,
    /// Native, run-local execution id.
    pub sql_id: i64,
    pub description: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Final plan (adaptive updates replace the initial one).
    pub plan: SparkPlanInfo,
    pub job_count: u32,
    pub failed_jobs: u32,
    pub stage_ids: BTreeSet<i64>,
    pub tasks: Vec<TaskMetrics>,
}

impl EventLogRecord {
    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).max(0) as f64
    }

    pub fn normalized_plan(&self) -> NormalizedPlan {
        normalize_plan(&self.plan)
    }
}

/// Counters describing one pass over an application log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    pub lines: u64,
    pub malformed: u64,
    /// Events referencing an execution that was never started.
    pub orphaned: u64,
    /// Executions started but never ended.
    pub incomplete: u64,
    /// Files that stopped decoding part-way.
    pub truncated_files: u64,
    /// Tasks whose stage belongs to no SQL execution.
    pub unattributed_tasks: u64,
    pub records: u64,
}

impl ReaderStats {
    pub fn warnings(&self) -> u64 {
        self.malformed + self.orphaned + self.incomplete + self.truncated_files
    }

    pub fn merge(&mut self, other: &ReaderStats) {
        self.lines += other.lines;
        self.malformed += other.malformed;
        self.orphaned += other.orphaned;
        self.incomplete += other.incomplete;
        self.truncated_files += other.truncated_files;
        self.unattributed_tasks += other.unattributed_tasks;
        self.records += other.records;
    }
}

// =============================================================================
// READER
// =============================================================================

#[derive(Debug)]
struct OpenExecution {
    description: String,
    start_time: i64,
    plan: SparkPlanInfo,
    job_count: u32,
    failed_jobs: u32,
    stage_ids: BTreeSet<i64>,
    tasks: Vec<TaskMetrics>,
}

/// Lazy reader over one application log.
pub struct EventLogReader {
    dataset: String,
    app_path: PathBuf,
    pending_files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Box<dyn BufRead + Send>, u64)>,
    buf: Vec<u8>,
    app: AppInfo,
    open: HashMap<i64, OpenExecution>,
    job_to_sql: HashMap<i64, i64>,
    stage_to_sql: HashMap<i64, i64>,
    stats: ReaderStats,
    cancel: Option<CancelFlag>,
    finished: bool,
}

impl EventLogReader {
    /// Prepare a reader; files are opened lazily as the stream advances.
    pub fn open(dataset: impl Into<String>, log: &ApplicationLog) -> Self {
        Self {
            dataset: dataset.into(),
            app_path: log.path.clone(),
            pending_files: log.files.clone().into_iter(),
            current: None,
            buf: Vec::with_capacity(4096),
            app: AppInfo::default(),
            open: HashMap::new(),
            job_to_sql: HashMap::new(),
            stage_to_sql: HashMap::new(),
            stats: ReaderStats::default(),
            cancel: None,
            finished: false,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Application facts seen so far.
    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    fn fail(&mut self, err: PreprocessError) -> Option<Result<EventLogRecord>> {
        self.finished = true;
        Some(Err(err))
    }

    /// Next raw line across files. `Ok(None)` at end of stream.
    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.pending_files.next() else {
                    return Ok(None);
                };
                let reader = open_decoded(&path).map_err(|e| {
                    PreprocessError::extraction(&self.dataset, &path, format!("cannot open: {}", e))
                })?;
                self.current = Some((path, reader, 0));
            }

            let Some((path, reader, lines_in_file)) = self.current.as_mut() else {
                continue;
            };
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.current = None;
                }
                Ok(_) => {
                    *lines_in_file += 1;
                    return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
                }
                Err(e) if *lines_in_file > 0 => {
                    warn!(
                        dataset = %self.dataset,
                        file = %path.display(),
                        error = %e,
                        "Event log truncated; continuing with next file"
                    );
                    self.stats.truncated_files += 1;
                    self.current = None;
                }
                Err(e) => {
                    let path = path.clone();
                    self.current = None;
                    return Err(PreprocessError::extraction(
                        &self.dataset,
                        path,
                        format!("unreadable event log: {}", e),
                    ));
                }
            }
        }
    }

    fn finish_stream(&mut self) {
        self.finished = true;
        let incomplete = self.open.len() as u64;
        if incomplete > 0 {
            self.stats.incomplete += incomplete;
            self.open.clear();
        }
        if self.stats.warnings() > 0 {
            warn!(
                dataset = %self.dataset,
                app = %self.app_path.display(),
                malformed = self.stats.malformed,
                orphaned = self.stats.orphaned,
                incomplete = self.stats.incomplete,
                truncated = self.stats.truncated_files,
                "Skipped unusable events"
            );
        }
        debug!(
            dataset = %self.dataset,
            app = %self.app_path.display(),
            records = self.stats.records,
            lines = self.stats.lines,
            "Finished event log"
        );
    }

    /// Apply one event; returns a record when an execution completes.
    fn apply(&mut self, event: &Value) -> Option<EventLogRecord> {
        let Some(kind) = event.get("Event").and_then(Value::as_str) else {
            self.stats.malformed += 1;
            return None;
        };
        let short = kind.rsplit('.').next().unwrap_or(kind);

        match short {
            "SparkListenerLogStart" => {
                self.app.spark_version = str_field(event, "Spark Version");
            }
            "SparkListenerApplicationStart" => {
                self.app.app_name = str_field(event, "App Name").unwrap_or_default();
                self.app.app_id = str_field(event, "App ID").unwrap_or_default();
                self.app.start_time = i64_field(event, "Timestamp");
            }
            "SparkListenerApplicationEnd" => {
                self.app.end_time = i64_field(event, "Timestamp");
            }
            "SparkListenerEnvironmentUpdate" => {
                if let Some(props) = event.get("Spark Properties") {
                    self.apply_spark_properties(props);
                }
            }
            "SparkListenerExecutorAdded" => {
                self.app.executors_added += 1;
                if self.app.executor_cores.is_none() {
                    self.app.executor_cores = event
                        .pointer("/Executor Info/Total Cores")
                        .and_then(Value::as_f64);
                }
            }
            "SparkListenerSQLExecutionStart" => self.on_sql_start(event),
            "SparkListenerSQLAdaptiveExecutionUpdate" => {
                match (i64_field(event, "executionId"), event.get("sparkPlanInfo")) {
                    (Some(id), Some(plan)) => match serde_json::from_value(plan.clone()) {
                        Ok(plan) => match self.open.get_mut(&id) {
                            Some(exec) => exec.plan = plan,
                            None => self.stats.orphaned += 1,
                        },
                        Err(_) => self.stats.malformed += 1,
                    },
                    _ => self.stats.malformed += 1,
                }
            }
            "SparkListenerSQLExecutionEnd" => return self.on_sql_end(event),
            "SparkListenerJobStart" => self.on_job_start(event),
            "SparkListenerJobEnd" => {
                let Some(job_id) = i64_field(event, "Job ID") else {
                    self.stats.malformed += 1;
                    return None;
                };
                let succeeded = event
                    .pointer("/Job Result/Result")
                    .and_then(Value::as_str)
                    .map(|r| r == "JobSucceeded")
                    .unwrap_or(true);
                if let Some(exec) = self
                    .job_to_sql
                    .get(&job_id)
                    .and_then(|sql| self.open.get_mut(sql))
                {
                    if !succeeded {
                        exec.failed_jobs += 1;
                    }
                }
            }
            "SparkListenerTaskEnd" => self.on_task_end(event),
            _ => {}
        }
        None
    }

    fn apply_spark_properties(&mut self, props: &Value) {
        let mut lookup: HashMap<String, String> = HashMap::new();
        match props {
            Value::Object(map) => {
                for (k, v) in map {
                    if let Some(s) = v.as_str() {
                        lookup.insert(k.clone(), s.to_string());
                    }
                }
            }
            Value::Array(pairs) => {
                for pair in pairs {
                    if let (Some(k), Some(v)) = (
                        pair.get(0).and_then(Value::as_str),
                        pair.get(1).and_then(Value::as_str),
                    ) {
                        lookup.insert(k.to_string(), v.to_string());
                    }
                }
            }
            _ => {}
        }

        if let Some(cores) = lookup.get("spark.executor.cores").and_then(|c| c.parse().ok()) {
            self.app.executor_cores = Some(cores);
        }
        if let Some(mem) = lookup.get("spark.executor.memory").and_then(|m| parse_memory_mb(m)) {
            self.app.executor_memory_mb = Some(mem);
        }
        let plugin = lookup
            .get("spark.plugins")
            .map(|p| p.contains("com.nvidia.spark.SQLPlugin"))
            .unwrap_or(false);
        let enabled = lookup
            .get("spark.rapids.sql.enabled")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        self.app.accelerated = plugin && enabled;
    }

    fn on_sql_start(&mut self, event: &Value) {
        let Some(id) = i64_field(event, "executionId") else {
            self.stats.malformed += 1;
            return;
        };
        let plan = match event.get("sparkPlanInfo").map(|p| serde_json::from_value(p.clone())) {
            Some(Ok(plan)) => plan,
            Some(Err(_)) | None => {
                self.stats.malformed += 1;
                return;
            }
        };
        self.open.insert(
            id,
            OpenExecution {
                description: str_field(event, "description").unwrap_or_default(),
                start_time: i64_field(event, "time").unwrap_or(0),
                plan,
                job_count: 0,
                failed_jobs: 0,
                stage_ids: BTreeSet::new(),
                tasks: Vec::new(),
            },
        );
    }

    fn on_sql_end(&mut self, event: &Value) -> Option<EventLogRecord> {
        let Some(id) = i64_field(event, "executionId") else {
            self.stats.malformed += 1;
            return None;
        };
        let Some(exec) = self.open.remove(&id) else {
            self.stats.orphaned += 1;
            return None;
        };
        let end_time = i64_field(event, "time").unwrap_or(exec.start_time);

        self.stats.records += 1;
        Some(EventLogRecord {
            app: self.app.clone(),
            sql_id: id,
            description: exec.description,
            start_time: exec.start_time,
            end_time,
            plan: exec.plan,
            job_count: exec.job_count,
            failed_jobs: exec.failed_jobs,
            stage_ids: exec.stage_ids,
            tasks: exec.tasks,
        })
    }

    fn on_job_start(&mut self, event: &Value) {
        let Some(job_id) = i64_field(event, "Job ID") else {
            self.stats.malformed += 1;
            return;
        };
        let sql_id = event
            .pointer("/Properties/spark.sql.execution.id")
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                other => other.as_i64(),
            });
        let Some(sql_id) = sql_id else {
            return;
        };
        let Some(exec) = self.open.get_mut(&sql_id) else {
            self.stats.orphaned += 1;
            return;
        };

        exec.job_count += 1;
        self.job_to_sql.insert(job_id, sql_id);
        if let Some(stages) = event.get("Stage IDs").and_then(Value::as_array) {
            for stage in stages.iter().filter_map(Value::as_i64) {
                exec.stage_ids.insert(stage);
                self.stage_to_sql.insert(stage, sql_id);
            }
        }
    }

    fn on_task_end(&mut self, event: &Value) {
        let Some(stage_id) = i64_field(event, "Stage ID") else {
            self.stats.malformed += 1;
            return;
        };
        let Some(exec) = self
            .stage_to_sql
            .get(&stage_id)
            .and_then(|sql| self.open.get_mut(sql))
        else {
            self.stats.unattributed_tasks += 1;
            return;
        };
        exec.tasks.push(parse_task_metrics(event));
    }
}

impl Iterator for EventLogReader {
    type Item = Result<EventLogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let cancelled = self.stats.lines % CANCEL_CHECK_INTERVAL == 0
                && self.cancel.as_ref().map(CancelFlag::is_cancelled).unwrap_or(false);
            if cancelled {
                return self.fail(PreprocessError::Cancelled);
            }

            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finish_stream();
                    return None;
                }
                Err(e) => return self.fail(e),
            };
            self.stats.lines += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    self.stats.malformed += 1;
                    continue;
                }
            };
            if let Some(record) = self.apply(&event) {
                return Some(Ok(record));
            }
        }
    }
}

/// Read every record of `log`, returning records plus the pass statistics.
pub fn read_application(
    dataset: &str,
    log: &ApplicationLog,
    cancel: Option<&CancelFlag>,
) -> Result<(Vec<EventLogRecord>, ReaderStats)> {
    let mut reader = EventLogReader::open(dataset, log);
    if let Some(cancel) = cancel {
        reader = reader.with_cancel_flag(cancel.clone());
    }
    let mut records = Vec::new();
    for record in reader.by_ref() {
        records.push(record?);
    }
    Ok((records, reader.stats()))
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn str_field(event: &Value, key: &str) -> Option<String> {
    event.get(key).and_then(Value::as_str).map(str::to_string)
}

fn i64_field(event: &Value, key: &str) -> Option<i64> {
    event.get(key).and_then(Value::as_i64)
}

fn f64_at(value: &Value, pointer: &str) -> Option<f64> {
    value.pointer(pointer).and_then(Value::as_f64)
}

fn parse_task_metrics(event: &Value) -> TaskMetrics {
    let launch = f64_at(event, "/Task Info/Launch Time");
    let finish = f64_at(event, "/Task Info/Finish Time");
    let duration_ms = match (launch, finish) {
        (Some(l), Some(f)) if f >= l => Some(f - l),
        _ => None,
    };
    let failed = event
        .pointer("/Task Info/Failed")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let empty = Value::Null;
    let m = event.get("Task Metrics").unwrap_or(&empty);

    TaskMetrics {
        duration_ms,
        failed,
        executor_run_time: f64_at(m, "/Executor Run Time"),
        executor_cpu_time: f64_at(m, "/Executor CPU Time"),
        executor_deserialize_time: f64_at(m, "/Executor Deserialize Time"),
        jvm_gc_time: f64_at(m, "/JVM GC Time"),
        result_serialization_time: f64_at(m, "/Result Serialization Time"),
        result_size: f64_at(m, "/Result Size"),
        memory_bytes_spilled: f64_at(m, "/Memory Bytes Spilled"),
        disk_bytes_spilled: f64_at(m, "/Disk Bytes Spilled"),
        peak_execution_memory: f64_at(m, "/Peak Execution Memory"),
        input_bytes_read: f64_at(m, "/Input Metrics/Bytes Read"),
        input_records_read: f64_at(m, "/Input Metrics/Records Read"),
        output_bytes_written: f64_at(m, "/Output Metrics/Bytes Written"),
        output_records_written: f64_at(m, "/Output Metrics/Records Written"),
        sr_remote_blocks_fetched: f64_at(m, "/Shuffle Read Metrics/Remote Blocks Fetched"),
        sr_local_blocks_fetched: f64_at(m, "/Shuffle Read Metrics/Local Blocks Fetched"),
        sr_fetch_wait_time: f64_at(m, "/Shuffle Read Metrics/Fetch Wait Time"),
        sr_remote_bytes_read: f64_at(m, "/Shuffle Read Metrics/Remote Bytes Read"),
        sr_remote_bytes_read_to_disk: f64_at(m, "/Shuffle Read Metrics/Remote Bytes Read To Disk"),
        sr_local_bytes_read: f64_at(m, "/Shuffle Read Metrics/Local Bytes Read"),
        sr_total_records_read: f64_at(m, "/Shuffle Read Metrics/Total Records Read"),
        sw_bytes_written: f64_at(m, "/Shuffle Write Metrics/Shuffle Bytes Written"),
        sw_write_time: f64_at(m, "/Shuffle Write Metrics/Shuffle Write Time"),
        sw_records_written: f64_at(m, "/Shuffle Write Metrics/Shuffle Records Written"),
    }
}

/// Parse a JVM memory string (`4g`, `512m`, `2048`) into MiB.
pub fn parse_memory_mb(value: &str) -> Option<f64> {
    let v = value.trim().to_ascii_lowercase();
    let v = v.strip_suffix('b').unwrap_or(&v);
    let (digits, scale) = match v.chars().last()? {
        'k' => (&v[..v.len() - 1], 1.0 / 1024.0),
        'm' => (&v[..v.len() - 1], 1.0),
        'g' => (&v[..v.len() - 1], 1024.0),
        't' => (&v[..v.len() - 1], 1024.0 * 1024.0),
        _ => (v, 1.0),
    };
    digits.trim().parse::<f64>().ok().map(|n| n * scale)
}
