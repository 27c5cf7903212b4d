//! Synthetic Spark Event Logs
//!
//! Deterministic generator for application event logs in the Spark listener
//! JSON-lines format. Used by tests and by `qualx` smoke runs to produce CPU
//! and GPU runs of the same queries without a cluster.
//!
//! ```text
//! SparkListenerLogStart
//! SparkListenerApplicationStart
//! SparkListenerEnvironmentUpdate     (RAPIDS plugin when accelerated)
//! SparkListenerExecutorAdded × n
//! per query:
//!   SparkListenerSQLExecutionStart
//!   SparkListenerJobStart            (spark.sql.execution.id property)
//!   SparkListenerTaskEnd × tasks
//!   SparkListenerJobEnd
//!   SparkListenerSQLExecutionEnd     (omitted for an incomplete query)
//! SparkListenerApplicationEnd
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::preprocess::plan::SparkPlanInfo;

const JOB_EVENT_PREFIX: &str = "org.apache.spark.sql.execution.ui.";

/// One SQL execution of a synthetic application.
#[derive(Debug, Clone)]
pub struct SyntheticQuery {
    pub sql_id: i64,
    pub description: String,
    pub plan: SparkPlanInfo,
    pub tasks: u32,
    /// Mean task duration in milliseconds.
    pub task_ms: f64,
    /// Emit the `SQLExecutionEnd` event.
    pub complete: bool,
    pub failed_job: bool,
}

impl SyntheticQuery {
    pub fn new(sql_id: i64, description: impl Into<String>, plan: SparkPlanInfo) -> Self {
        Self {
            sql_id,
            description: description.into(),
            plan,
            tasks: 4,
            task_ms: 100.0,
            complete: true,
            failed_job: false,
        }
    }

    pub fn with_tasks(mut self, tasks: u32, task_ms: f64) -> Self {
        self.tasks = tasks;
        self.task_ms = task_ms;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.complete = false;
        self
    }

    pub fn with_failed_job(mut self) -> Self {
        self.failed_job = true;
        self
    }
}

/// A synthetic Spark application.
#[derive(Debug, Clone)]
pub struct SyntheticApp {
    pub app_id: String,
    pub app_name: String,
    pub accelerated: bool,
    pub executors: u32,
    pub executor_cores: u32,
    pub executor_memory: String,
    pub start_time: i64,
    pub queries: Vec<SyntheticQuery>,
    seed: u64,
}

impl SyntheticApp {
    pub fn new(app_id: impl Into<String>, accelerated: bool) -> Self {
        Self {
            app_id: app_id.into(),
            app_name: "NDS - Power Run".to_string(),
            accelerated,
            executors: 2,
            executor_cores: 8,
            executor_memory: "16g".to_string(),
            start_time: 1_700_000_000_000,
            queries: Vec::new(),
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_query(mut self, query: SyntheticQuery) -> Self {
        self.queries.push(query);
        self
    }

    /// Every event of the application, one JSON document per line.
    pub fn event_lines(&self) -> Vec<String> {
        self.events().iter().map(Value::to_string).collect()
    }

    fn events(&self) -> Vec<Value> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut events = Vec::new();
        let mut now = self.start_time;

        events.push(json!({"Event": "SparkListenerLogStart", "Spark Version": "3.4.1"}));
        events.push(json!({
            "Event": "SparkListenerApplicationStart",
            "App Name": self.app_name,
            "App ID": self.app_id,
            "Timestamp": now,
            "User": "spark"
        }));

        let mut props = json!({
            "spark.executor.cores": self.executor_cores.to_string(),
            "spark.executor.memory": self.executor_memory,
        });
        if self.accelerated {
            props["spark.plugins"] = json!("com.nvidia.spark.SQLPlugin");
            props["spark.rapids.sql.enabled"] = json!("true");
        }
        events.push(json!({
            "Event": "SparkListenerEnvironmentUpdate",
            "JVM Information": {},
            "Spark Properties": props,
            "System Properties": {},
            "Classpath Entries": {}
        }));

        for executor in 0..self.executors {
            events.push(json!({
                "Event": "SparkListenerExecutorAdded",
                "Timestamp": now,
                "Executor ID": executor.to_string(),
                "Executor Info": {"Host": "worker", "Total Cores": self.executor_cores}
            }));
        }

        let mut job_id = 0i64;
        let mut stage_id = 0i64;
        let mut task_id = 0i64;
        for query in &self.queries {
            now += 50;
            let start = now;
            events.push(json!({
                "Event": format!("{}SparkListenerSQLExecutionStart", JOB_EVENT_PREFIX),
                "executionId": query.sql_id,
                "description": query.description,
                "details": "",
                "physicalPlanDescription": "",
                "sparkPlanInfo": query.plan,
                "time": start
            }));

            let stages = [stage_id, stage_id + 1];
            events.push(json!({
                "Event": "SparkListenerJobStart",
                "Job ID": job_id,
                "Submission Time": start,
                "Stage IDs": stages,
                "Properties": {"spark.sql.execution.id": query.sql_id.to_string()}
            }));

            let mut finish = start;
            for i in 0..query.tasks {
                let jitter: f64 = rng.gen_range(0.8..1.2);
                let duration = (query.task_ms * jitter).round().max(1.0);
                let launch = start + 5;
                let end = launch + duration as i64;
                finish = finish.max(end);
                let stage = stages[(i % 2) as usize];
                events.push(task_end(task_id, stage, launch, end, duration, self.accelerated));
                task_id += 1;
            }

            let result = if query.failed_job {
                json!({"Result": "JobFailed", "Exception": {"Message": "stage failed"}})
            } else {
                json!({"Result": "JobSucceeded"})
            };
            events.push(json!({
                "Event": "SparkListenerJobEnd",
                "Job ID": job_id,
                "Completion Time": finish,
                "Job Result": result
            }));
            job_id += 1;
            stage_id += 2;

            now = finish + 20;
            if query.complete {
                events.push(json!({
                    "Event": format!("{}SparkListenerSQLExecutionEnd", JOB_EVENT_PREFIX),
                    "executionId": query.sql_id,
                    "time": now
                }));
            }
        }

        events.push(json!({"Event": "SparkListenerApplicationEnd", "Timestamp": now + 100}));
        events
    }

    /// Write an uncompressed event log.
    pub fn write_plain(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for line in self.event_lines() {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()
    }

    /// Write a zstd-compressed event log.
    pub fn write_zstd(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut encoder = zstd::stream::write::Encoder::new(file, 3)?;
        for line in self.event_lines() {
            writeln!(encoder, "{}", line)?;
        }
        encoder.finish()?.sync_all()
    }

    /// Write a rolling log directory `eventlog_v2_<app>` split into `parts`
    /// zstd files. Returns the directory.
    pub fn write_rolling(&self, parent: &Path, parts: usize) -> io::Result<PathBuf> {
        let dir = parent.join(format!("eventlog_v2_{}", self.app_id));
        fs::create_dir_all(&dir)?;
        let lines = self.event_lines();
        let per_part = lines.len().div_ceil(parts.max(1));
        for (index, chunk) in lines.chunks(per_part.max(1)).enumerate() {
            let path = dir.join(format!("events_{}_{}.zstd", index + 1, self.app_id));
            let mut encoder = zstd::stream::write::Encoder::new(File::create(path)?, 3)?;
            for line in chunk {
                writeln!(encoder, "{}", line)?;
            }
            encoder.finish()?;
        }
        fs::write(dir.join(format!("appstatus_{}", self.app_id)), b"")?;
        Ok(dir)
    }
}

fn task_end(task_id: i64, stage: i64, launch: i64, finish: i64, duration: f64, gpu: bool) -> Value {
    let cpu_ns = duration * if gpu { 300_000.0 } else { 900_000.0 };
    json!({
        "Event": "SparkListenerTaskEnd",
        "Stage ID": stage,
        "Stage Attempt ID": 0,
        "Task Type": "ShuffleMapTask",
        "Task End Reason": {"Reason": "Success"},
        "Task Info": {
            "Task ID": task_id,
            "Launch Time": launch,
            "Finish Time": finish,
            "Failed": false
        },
        "Task Metrics": {
            "Executor Deserialize Time": 3,
            "Executor Run Time": (duration - 4.0).max(0.0),
            "Executor CPU Time": cpu_ns,
            "Result Size": 2_048,
            "JVM GC Time": if gpu { 1 } else { 6 },
            "Result Serialization Time": 0,
            "Memory Bytes Spilled": 0,
            "Disk Bytes Spilled": 0,
            "Peak Execution Memory": 1_048_576,
            "Input Metrics": {"Bytes Read": 65_536, "Records Read": 1_000},
            "Output Metrics": {"Bytes Written": 0, "Records Written": 0},
            "Shuffle Read Metrics": {
                "Remote Blocks Fetched": 2,
                "Local Blocks Fetched": 2,
                "Fetch Wait Time": 1,
                "Remote Bytes Read": 4_096,
                "Remote Bytes Read To Disk": 0,
                "Local Bytes Read": 4_096,
                "Total Records Read": 200
            },
            "Shuffle Write Metrics": {
                "Shuffle Bytes Written": 8_192,
                "Shuffle Write Time": 250_000,
                "Shuffle Records Written": 200
            }
        }
    })
}

// =============================================================================
// PLAN SHAPES
// =============================================================================

fn op(name: &str, accelerated: bool, children: Vec<SparkPlanInfo>) -> SparkPlanInfo {
    if accelerated {
        SparkPlanInfo::node(format!("Gpu{}", name), children)
    } else {
        SparkPlanInfo::node(name, children)
    }
}

/// Scan, filter, project and two-phase aggregate over `table`.
pub fn aggregate_plan(table: &str, accelerated: bool) -> SparkPlanInfo {
    let scan = op(&format!("Scan parquet {}", table), accelerated, vec![]);
    let partial = op(
        "HashAggregate",
        accelerated,
        vec![op("Project", accelerated, vec![op("Filter", accelerated, vec![scan])])],
    );
    let body = if accelerated {
        op(
            "HashAggregate",
            true,
            vec![op("ShuffleCoalesce", true, vec![op("ColumnarExchange", true, vec![partial])])],
        )
    } else {
        SparkPlanInfo::node(
            "WholeStageCodegen (2)",
            vec![op(
                "HashAggregate",
                false,
                vec![SparkPlanInfo::node(
                    "InputAdapter",
                    vec![op("Exchange", false, vec![SparkPlanInfo::node(
                        "WholeStageCodegen (1)",
                        vec![partial],
                    )])],
                )],
            )],
        )
    };
    let root = if accelerated {
        op("ColumnarToRow", true, vec![body])
    } else {
        body
    };
    SparkPlanInfo::node("AdaptiveSparkPlan", vec![root])
}

/// Shuffled equi-join of two scans. The CPU engine plans a sort-merge join,
/// the accelerated engine a shuffled hash join.
pub fn join_plan(left: &str, right: &str, accelerated: bool) -> SparkPlanInfo {
    let side = |table: &str| {
        let scan = op(&format!("Scan parquet {}", table), accelerated, vec![]);
        if accelerated {
            op("ShuffleCoalesce", true, vec![op("ColumnarExchange", true, vec![scan])])
        } else {
            op("Sort", false, vec![op("Exchange", false, vec![scan])])
        }
    };
    let join_name = if accelerated { "ShuffledHashJoin" } else { "SortMergeJoin" };
    let join = op(join_name, accelerated, vec![side(left), side(right)]);
    SparkPlanInfo::node("AdaptiveSparkPlan", vec![op("Project", accelerated, vec![join])])
}

/// Ordered top-N over a filtered scan.
pub fn top_n_plan(table: &str, limit: u32, accelerated: bool) -> SparkPlanInfo {
    let scan = op(&format!("Scan parquet {}", table), accelerated, vec![]);
    let name = if accelerated { "TopN" } else { "TakeOrderedAndProject" };
    let mut root = op(name, accelerated, vec![op("Filter", accelerated, vec![scan])]);
    root.simple_string = format!("{} limit={}", name, limit);
    root
}

// =============================================================================
// DATASET LAYOUT
// =============================================================================

/// One synthetic dataset: descriptor plus the applications of each role.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub name: String,
    pub scale_factor: i64,
    pub baseline: Vec<SyntheticApp>,
    pub accelerated: Vec<SyntheticApp>,
}

impl SyntheticDataset {
    /// CPU and GPU runs of the same queries over `tables`.
    ///
    /// The GPU run starts with an extra warm-up execution, so the same query
    /// carries a different native id in each run.
    pub fn paired(name: &str, tables: &[&str], seed: u64) -> Self {
        let build = |accelerated: bool| {
            let tag = if accelerated { "gpu" } else { "cpu" };
            let mut app = SyntheticApp::new(format!("app-{}-{}", name, tag), accelerated)
                .with_seed(seed ^ accelerated as u64);
            let mut next_id = 0;
            if accelerated {
                app = app.with_query(SyntheticQuery::new(
                    next_id,
                    "warmup",
                    top_n_plan("db.warmup", 1, true),
                ));
                next_id += 1;
            }
            let task_ms = if accelerated { 40.0 } else { 120.0 };
            for (i, table) in tables.iter().enumerate() {
                let plan = if i % 2 == 0 {
                    aggregate_plan(table, accelerated)
                } else {
                    join_plan(table, "db.date_dim", accelerated)
                };
                app = app.with_query(
                    SyntheticQuery::new(next_id, format!("query{}", i + 1), plan)
                        .with_tasks(4 + i as u32, task_ms),
                );
                next_id += 1;
            }
            app
        };
        Self {
            name: name.to_string(),
            scale_factor: 1,
            baseline: vec![build(false)],
            accelerated: vec![build(true)],
        }
    }

    /// Only a baseline run.
    pub fn baseline_only(name: &str, tables: &[&str], seed: u64) -> Self {
        let mut dataset = Self::paired(name, tables, seed);
        dataset.accelerated.clear();
        dataset
    }

    /// Write logs under `<root>/logs/<name>/{cpu,gpu}` as zstd files and the
    /// descriptor as `<root>/datasets/<name>.json`. Returns the descriptor path.
    pub fn write(&self, root: &Path) -> io::Result<PathBuf> {
        let mut runs = Vec::new();
        for (role, tag, apps) in [
            ("baseline", "cpu", &self.baseline),
            ("accelerated", "gpu", &self.accelerated),
        ] {
            if apps.is_empty() {
                continue;
            }
            let dir = root.join("logs").join(&self.name).join(tag);
            fs::create_dir_all(&dir)?;
            for app in apps {
                app.write_zstd(&dir.join(format!("{}.zstd", app.app_id)))?;
            }
            runs.push(json!({"role": role, "source": dir}));
        }

        let descriptors = root.join("datasets");
        fs::create_dir_all(&descriptors)?;
        let path = descriptors.join(format!("{}.json", self.name));
        let descriptor = json!({
            "name": self.name,
            "platform": "onprem",
            "scale_factor": self.scale_factor,
            "runs": runs
        });
        fs::write(&path, serde_json::to_vec_pretty(&descriptor)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::plan::normalize_plan;

    #[test]
    fn test_plan_shapes_align_across_engines() {
        for (cpu, gpu) in [
            (aggregate_plan("db.a", false), aggregate_plan("db.a", true)),
            (join_plan("db.a", "db.b", false), join_plan("db.a", "db.b", true)),
            (top_n_plan("db.a", 10, false), top_n_plan("db.a", 100, true)),
        ] {
            let cpu = normalize_plan(&cpu);
            let gpu = normalize_plan(&gpu);
            assert_eq!(cpu.canonical, gpu.canonical);
            assert_eq!(cpu.gpu_nodes, 0);
            assert_eq!(gpu.gpu_nodes, gpu.total_nodes);
        }
    }

    #[test]
    fn test_events_are_deterministic() {
        let app = SyntheticApp::new("app-1", false)
            .with_query(SyntheticQuery::new(0, "q1", aggregate_plan("db.a", false)));
        assert_eq!(app.event_lines(), app.clone().event_lines());
        assert_ne!(app.event_lines(), app.clone().with_seed(7).event_lines());
    }

    #[test]
    fn test_incomplete_query_has_no_end_event() {
        let app = SyntheticApp::new("app-1", true).with_query(
            SyntheticQuery::new(3, "q3", aggregate_plan("db.a", true)).incomplete(),
        );
        let lines = app.event_lines();
        assert!(lines.iter().any(|l| l.contains("SQLExecutionStart")));
        assert!(!lines.iter().any(|l| l.contains("SQLExecutionEnd")));
    }
}
