//! Feature Extractor
//!
//! Maps one `EventLogRecord` to exactly one `FeatureRow`. Every column of the
//! schema is populated: a counter no task reported, or an extremum over zero
//! tasks, gets `MISSING_FEATURE` rather than being left out.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::preprocess::dataset::{DatasetDescriptor, RunRole};
use crate::preprocess::event_log::{EventLogRecord, TaskMetrics};
use crate::preprocess::schema::{
    feature_index, CellValue, HASH_COLUMN, MISSING_FEATURE, NUMERIC_FEATURES,
};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// One row of the profile table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub dataset: String,
    pub role: RunRole,
    pub app_id: String,
    pub app_name: String,
    /// Native, run-local SQL execution id.
    pub sql_id: i64,
    pub description: String,
    pub scale_factor: i64,
    /// Content fingerprint of the normalized plan.
    pub hash: String,
    /// Supervised label value, attached by the aggregator.
    pub label: f64,
    /// Values aligned with `NUMERIC_FEATURES`.
    pub features: Vec<f64>,
}

impl FeatureRow {
    pub fn feature(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|i| self.features.get(i).copied())
    }

    /// Value of any schema column.
    pub fn cell(&self, column: &str) -> Option<CellValue> {
        let value = match column {
            "appId" => CellValue::Text(self.app_id.clone()),
            "appName" => CellValue::Text(self.app_name.clone()),
            "dataset" => CellValue::Text(self.dataset.clone()),
            "description" => CellValue::Text(self.description.clone()),
            "runType" => CellValue::Text(self.role.run_type().to_string()),
            "scaleFactor" => CellValue::Int(self.scale_factor),
            "sqlID" => CellValue::Int(self.sql_id),
            HASH_COLUMN => CellValue::Text(self.hash.clone()),
            other => CellValue::Float(self.feature(other)?),
        };
        Some(value)
    }

    /// Table order: dataset, role (baseline first), native id, then app id.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.dataset
            .cmp(&other.dataset)
            .then_with(|| self.role.cmp(&other.role))
            .then_with(|| self.sql_id.cmp(&other.sql_id))
            .then_with(|| self.app_id.cmp(&other.app_id))
    }
}

/// Extracts rows for one run of one dataset.
pub struct FeatureExtractor<'a> {
    dataset: &'a DatasetDescriptor,
    role: RunRole,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(dataset: &'a DatasetDescriptor, role: RunRole) -> Self {
        Self { dataset, role }
    }

    /// Build the row for `record`. The label is left at the sentinel; the
    /// aggregator attaches it.
    pub fn extract(&self, record: &EventLogRecord) -> FeatureRow {
        let plan = record.normalized_plan();
        let mut values = FeatureValues::new();
        let tasks = &record.tasks;

        values.set("Duration", record.duration_ms());
        values.set("numJobs", record.job_count as f64);
        values.set("failedJobs", record.failed_jobs as f64);
        values.set("numStages", record.stage_ids.len() as f64);
        values.set("numTasks", tasks.len() as f64);
        values.set(
            "failedTasks",
            tasks.iter().filter(|t| t.failed).count() as f64,
        );

        // Task durations.
        let durations: Vec<f64> = tasks.iter().filter_map(|t| t.duration_ms).collect();
        values.set("duration_sum", durations.iter().sum());
        values.set_opt("duration_max", fold_max(&durations));
        values.set_opt("duration_min", fold_min(&durations));
        values.set_opt(
            "duration_mean",
            (!durations.is_empty()).then(|| durations.iter().sum::<f64>() / durations.len() as f64),
        );

        // Executor metrics.
        values.set_opt("executorRunTime_sum", sum_of(tasks, |t| t.executor_run_time));
        values.set_opt(
            "executorCPUTime_sum",
            sum_of(tasks, |t| t.executor_cpu_time).map(|ns| ns / NANOS_PER_MILLI),
        );
        values.set_opt(
            "executorDeserializeTime_sum",
            sum_of(tasks, |t| t.executor_deserialize_time),
        );
        values.set_opt("jvmGCTime_sum", sum_of(tasks, |t| t.jvm_gc_time));
        values.set_opt(
            "resultSerializationTime_sum",
            sum_of(tasks, |t| t.result_serialization_time),
        );
        values.set_opt("resultSize_max", max_of(tasks, |t| t.result_size));
        values.set_opt("memoryBytesSpilled_sum", sum_of(tasks, |t| t.memory_bytes_spilled));
        values.set_opt("diskBytesSpilled_sum", sum_of(tasks, |t| t.disk_bytes_spilled));
        values.set_opt("peakExecutionMemory_max", max_of(tasks, |t| t.peak_execution_memory));

        // Input / output.
        values.set_opt("input_bytesRead_sum", sum_of(tasks, |t| t.input_bytes_read));
        values.set_opt("input_recordsRead_sum", sum_of(tasks, |t| t.input_records_read));
        values.set_opt("output_bytesWritten_sum", sum_of(tasks, |t| t.output_bytes_written));
        values.set_opt("output_recordsWritten_sum", sum_of(tasks, |t| t.output_records_written));

        // Shuffle read.
        values.set_opt("sr_fetchWaitTime_sum", sum_of(tasks, |t| t.sr_fetch_wait_time));
        values.set_opt("sr_localBlocksFetched_sum", sum_of(tasks, |t| t.sr_local_blocks_fetched));
        values.set_opt("sr_localBytesRead_sum", sum_of(tasks, |t| t.sr_local_bytes_read));
        values.set_opt("sr_remoteBlocksFetched_sum", sum_of(tasks, |t| t.sr_remote_blocks_fetched));
        values.set_opt("sr_remoteBytesRead_sum", sum_of(tasks, |t| t.sr_remote_bytes_read));
        values.set_opt(
            "sr_remoteBytesReadToDisk_sum",
            sum_of(tasks, |t| t.sr_remote_bytes_read_to_disk),
        );
        values.set_opt(
            "sr_totalBytesRead_sum",
            sum_of(tasks, |t| match (t.sr_local_bytes_read, t.sr_remote_bytes_read) {
                (None, None) => None,
                (local, remote) => Some(local.unwrap_or(0.0) + remote.unwrap_or(0.0)),
            }),
        );
        values.set_opt("sr_totalRecordsRead_sum", sum_of(tasks, |t| t.sr_total_records_read));

        // Shuffle write.
        values.set_opt("sw_bytesWritten_sum", sum_of(tasks, |t| t.sw_bytes_written));
        values.set_opt("sw_recordsWritten_sum", sum_of(tasks, |t| t.sw_records_written));
        values.set_opt(
            "sw_writeTime_sum",
            sum_of(tasks, |t| t.sw_write_time).map(|ns| ns / NANOS_PER_MILLI),
        );

        // Application resources.
        let app = &record.app;
        values.set_opt("executorCores", app.executor_cores);
        values.set_opt("executorMemory", app.executor_memory_mb);
        values.set_opt(
            "numExecutors",
            (app.executors_added > 0).then_some(app.executors_added as f64),
        );

        // Plan shape.
        values.set("gpuOpFraction", plan.gpu_fraction());
        for column in NUMERIC_FEATURES.iter().filter(|c| c.starts_with("sqlOp_")) {
            let count = plan.operator_counts.get(column).copied().unwrap_or(0);
            values.set(column, count as f64);
        }

        FeatureRow {
            dataset: self.dataset.name.clone(),
            role: self.role,
            app_id: app.app_id.clone(),
            app_name: app.app_name.clone(),
            sql_id: record.sql_id,
            description: record.description.clone(),
            scale_factor: self.dataset.scale_factor,
            hash: plan.hash,
            label: MISSING_FEATURE,
            features: values.into_inner(),
        }
    }
}

/// Feature vector under construction; starts fully at the sentinel.
struct FeatureValues(Vec<f64>);

impl FeatureValues {
    fn new() -> Self {
        Self(vec![MISSING_FEATURE; NUMERIC_FEATURES.len()])
    }

    fn set(&mut self, name: &str, value: f64) {
        if let Some(i) = feature_index(name) {
            self.0[i] = if value.is_finite() { value } else { MISSING_FEATURE };
        }
    }

    fn set_opt(&mut self, name: &str, value: Option<f64>) {
        self.set(name, value.unwrap_or(MISSING_FEATURE));
    }

    fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Sum of a counter. Zero tasks sum to 0; tasks that all lack the counter give `None`.
fn sum_of<F>(tasks: &[TaskMetrics], field: F) -> Option<f64>
where
    F: Fn(&TaskMetrics) -> Option<f64>,
{
    if tasks.is_empty() {
        return Some(0.0);
    }
    let mut seen = false;
    let mut total = 0.0;
    for value in tasks.iter().filter_map(&field) {
        seen = true;
        total += value;
    }
    seen.then_some(total)
}

fn max_of<F>(tasks: &[TaskMetrics], field: F) -> Option<f64>
where
    F: Fn(&TaskMetrics) -> Option<f64>,
{
    let values: Vec<f64> = tasks.iter().filter_map(field).collect();
    fold_max(&values)
}

fn fold_max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn fold_min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::dataset::RunSource;
    use crate::preprocess::event_log::AppInfo;
    use crate::preprocess::plan::SparkPlanInfo;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn dataset() -> DatasetDescriptor {
        DatasetDescriptor {
            name: "nds".to_string(),
            label: None,
            platform: "onprem".to_string(),
            scale_factor: 3,
            runs: vec![RunSource {
                role: RunRole::Baseline,
                path: PathBuf::from("/logs"),
            }],
            descriptor_path: PathBuf::from("/datasets/nds.json"),
        }
    }

    fn record(tasks: Vec<TaskMetrics>) -> EventLogRecord {
        EventLogRecord {
            app: AppInfo {
                app_id: "app-1".to_string(),
                app_name: "nds".to_string(),
                executor_cores: Some(4.0),
                executors_added: 2,
                ..Default::default()
            },
            sql_id: 7,
            description: "query7".to_string(),
            start_time: 1_000,
            end_time: 3_500,
            plan: SparkPlanInfo::node(
                "Filter",
                vec![SparkPlanInfo::leaf("Scan parquet db.t")],
            ),
            job_count: 1,
            failed_jobs: 0,
            stage_ids: BTreeSet::from([0, 1]),
            tasks,
        }
    }

    fn task(duration: f64, cpu_ns: Option<f64>) -> TaskMetrics {
        TaskMetrics {
            duration_ms: Some(duration),
            executor_run_time: Some(duration - 1.0),
            executor_cpu_time: cpu_ns,
            input_bytes_read: Some(100.0),
            sr_local_bytes_read: Some(10.0),
            sr_remote_bytes_read: Some(5.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_feature_is_populated() {
        let row = FeatureExtractor::new(&dataset(), RunRole::Baseline)
            .extract(&record(vec![task(10.0, Some(2e6)), task(30.0, Some(4e6))]));

        assert_eq!(row.features.len(), NUMERIC_FEATURES.len());
        assert!(row.features.iter().all(|v| v.is_finite()));
        assert_eq!(row.feature("Duration"), Some(2_500.0));
        assert_eq!(row.feature("duration_sum"), Some(40.0));
        assert_eq!(row.feature("duration_mean"), Some(20.0));
        assert_eq!(row.feature("duration_max"), Some(30.0));
        assert_eq!(row.feature("executorCPUTime_sum"), Some(6.0));
        assert_eq!(row.feature("sr_totalBytesRead_sum"), Some(30.0));
        assert_eq!(row.feature("numStages"), Some(2.0));
        assert_eq!(row.feature("sqlOp_Filter"), Some(1.0));
        assert_eq!(row.feature("sqlOp_Scan"), Some(1.0));
        assert_eq!(row.feature("numExecutors"), Some(2.0));
        assert_eq!(row.scale_factor, 3);
        assert_eq!(row.hash.len(), 16);
    }

    #[test]
    fn test_absent_counter_uses_sentinel() {
        let row = FeatureExtractor::new(&dataset(), RunRole::Baseline)
            .extract(&record(vec![task(10.0, None)]));
        assert_eq!(row.feature("executorCPUTime_sum"), Some(MISSING_FEATURE));
        assert_eq!(row.feature("executorMemory"), Some(MISSING_FEATURE));
        assert_eq!(row.feature("executorRunTime_sum"), Some(9.0));
    }

    #[test]
    fn test_zero_task_query() {
        let row = FeatureExtractor::new(&dataset(), RunRole::Accelerated).extract(&record(vec![]));
        assert_eq!(row.feature("numTasks"), Some(0.0));
        assert_eq!(row.feature("duration_sum"), Some(0.0));
        assert_eq!(row.feature("input_bytesRead_sum"), Some(0.0));
        assert_eq!(row.feature("duration_max"), Some(MISSING_FEATURE));
        assert_eq!(row.cell("runType"), Some(CellValue::Text("GPU".to_string())));
    }

    #[test]
    fn test_cells_cover_schema() {
        let row = FeatureExtractor::new(&dataset(), RunRole::Baseline).extract(&record(vec![]));
        for column in crate::preprocess::schema::ordered_columns() {
            assert!(row.cell(column).is_some(), "{} has no cell", column);
        }
        assert_eq!(row.cell("nope"), None);
    }
}
