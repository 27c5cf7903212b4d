//! Execution Plan Normalization and Content Hash
//!
//! A SQL execution's native id is a run-local counter, so the only way to
//! recognize "the same query" across a CPU run and a GPU run is by the shape
//! of its plan. This module reduces a `sparkPlanInfo` tree to an
//! engine-independent canonical form and hashes it.
//!
//! # Normalization
//!
//! ```text
//! GpuHashAggregate                         HashAggregate
//!   GpuShuffleCoalesce                       Exchange
//!     GpuColumnarExchange        ==>           HashAggregate
//!       GpuHashAggregate                         Project
//!         GpuProject                               Filter
//!           GpuFilter                                Scan parquet db.t
//!             GpuScan parquet db.t
//! ```
//!
//! - `Gpu` prefixes are stripped from every word of a node name
//! - Engine plumbing is elided and its children lifted: whole-stage codegen,
//!   input adapters, row/columnar transitions, batch coalescing, AQE readers
//!   and query stages
//! - Join and aggregate variants the engines choose differently collapse to
//!   one name (`SortMergeJoin`/`ShuffledHashJoin` -> `ShuffledJoin`), and the
//!   `Sort` inputs a sort-merge join needs are dropped
//! - Timestamps, metrics, and literal values never enter the canonical form:
//!   only node names and tree structure do

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Version tag mixed into every plan hash. Bump when normalization changes.
pub const PLAN_HASH_VERSION: &str = "PLANHASH_V1";

/// Plan tree as recorded in `sparkPlanInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparkPlanInfo {
    #[serde(rename = "nodeName")]
    pub node_name: String,
    #[serde(rename = "simpleString", default)]
    pub simple_string: String,
    #[serde(default)]
    pub children: Vec<SparkPlanInfo>,
}

impl SparkPlanInfo {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            node_name: name.into(),
            simple_string: String::new(),
            children: Vec::new(),
        }
    }

    pub fn node(name: impl Into<String>, children: Vec<SparkPlanInfo>) -> Self {
        Self {
            node_name: name.into(),
            simple_string: String::new(),
            children,
        }
    }
}

/// Engine-independent view of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPlan {
    /// Canonical text, e.g. `HashAggregate(Exchange(Scan parquet db.t))`.
    pub canonical: String,
    /// Hex content hash of `canonical`.
    pub hash: String,
    /// Kept operators per `sqlOp_*` column.
    pub operator_counts: BTreeMap<&'static str, u32>,
    /// Kept operators in total.
    pub total_nodes: u32,
    /// Kept operators that ran on the accelerated engine.
    pub gpu_nodes: u32,
}

impl NormalizedPlan {
    /// Share of kept operators that ran on the accelerated engine.
    pub fn gpu_fraction(&self) -> f64 {
        if self.total_nodes == 0 {
            0.0
        } else {
            self.gpu_nodes as f64 / self.total_nodes as f64
        }
    }
}

/// Canonical node after name normalization.
#[derive(Debug, Clone)]
struct CanonicalNode {
    name: String,
    children: Vec<CanonicalNode>,
}

/// Normalize `plan` and compute its content hash.
pub fn normalize_plan(plan: &SparkPlanInfo) -> NormalizedPlan {
    let mut stats = WalkStats::default();
    let forest = canonicalize(plan, false, &mut stats);

    let mut canonical = String::new();
    render_forest(&forest, &mut canonical);

    NormalizedPlan {
        hash: plan_hash(&canonical),
        canonical,
        operator_counts: stats.operator_counts,
        total_nodes: stats.total_nodes,
        gpu_nodes: stats.gpu_nodes,
    }
}

/// Hash canonical plan text.
pub fn plan_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PLAN_HASH_VERSION.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[derive(Default)]
struct WalkStats {
    operator_counts: BTreeMap<&'static str, u32>,
    total_nodes: u32,
    gpu_nodes: u32,
}

/// Returns the canonical nodes `plan` contributes to its parent: one node if
/// it is kept, its lifted children if it is elided.
fn canonicalize(
    plan: &SparkPlanInfo,
    drop_sort: bool,
    stats: &mut WalkStats,
) -> Vec<CanonicalNode> {
    let (name, is_gpu) = canonical_name(&plan.node_name);

    let elide = is_engine_plumbing(&name) || (drop_sort && name == "Sort");
    if elide {
        // Wrappers keep the parent's sort-dropping context; a dropped Sort does not.
        let child_drop_sort = drop_sort && name != "Sort";
        return plan
            .children
            .iter()
            .flat_map(|child| canonicalize(child, child_drop_sort, stats))
            .collect();
    }

    stats.total_nodes += 1;
    if is_gpu {
        stats.gpu_nodes += 1;
    }
    *stats.operator_counts.entry(operator_column(&name)).or_insert(0) += 1;

    let drops_child_sort = name == "ShuffledJoin";
    let children = plan
        .children
        .iter()
        .flat_map(|child| canonicalize(child, drops_child_sort, stats))
        .collect();

    vec![CanonicalNode { name, children }]
}

fn render_forest(nodes: &[CanonicalNode], out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&node.name);
        if !node.children.is_empty() {
            out.push('(');
            render_forest(&node.children, out);
            out.push(')');
        }
    }
}

/// Normalize a raw node name. Returns the name and whether it was a GPU node.
fn canonical_name(raw: &str) -> (String, bool) {
    let mut is_gpu = false;
    let words: Vec<&str> = raw
        .split_whitespace()
        .map(|word| match word.strip_prefix("Gpu") {
            Some(rest) if !rest.is_empty() => {
                is_gpu = true;
                rest
            }
            _ => word,
        })
        .collect();
    let mut name = words.join(" ");

    // "WholeStageCodegen (3)" -> "WholeStageCodegen"
    if let Some(open) = name.rfind(" (") {
        let inner = &name[open + 2..];
        if inner.ends_with(')') && inner[..inner.len() - 1].chars().all(|c| c.is_ascii_digit()) {
            name.truncate(open);
        }
    }

    let unified = match name.as_str() {
        "ColumnarExchange" => "Exchange",
        "SortMergeJoin" | "ShuffledHashJoin" | "ShuffledSymmetricHashJoin" => "ShuffledJoin",
        "SortAggregate" | "ObjectHashAggregate" => "HashAggregate",
        "TopN" => "TakeOrderedAndProject",
        "RunningWindow" => "Window",
        _ => return (name, is_gpu),
    };
    (unified.to_string(), is_gpu)
}

fn is_engine_plumbing(name: &str) -> bool {
    matches!(
        name,
        "WholeStageCodegen"
            | "InputAdapter"
            | "AdaptiveSparkPlan"
            | "ColumnarToRow"
            | "RowToColumnar"
            | "CoalesceBatches"
            | "ShuffleCoalesce"
            | "BringBackToHost"
            | "AQEShuffleRead"
            | "CustomShuffleReader"
            | "ShuffleQueryStage"
            | "BroadcastQueryStage"
            | "TableCacheQueryStage"
            | "ResultQueryStage"
    )
}

/// `sqlOp_*` column a canonical operator is counted under.
pub fn operator_column(name: &str) -> &'static str {
    if name.starts_with("Scan") || name.starts_with("BatchScan") {
        return "sqlOp_Scan";
    }
    if name.starts_with("Execute ") {
        return "sqlOp_Write";
    }
    match name {
        "Filter" => "sqlOp_Filter",
        "Project" => "sqlOp_Project",
        "HashAggregate" => "sqlOp_HashAggregate",
        "Exchange" => "sqlOp_Exchange",
        "BroadcastExchange" => "sqlOp_BroadcastExchange",
        "ReusedExchange" => "sqlOp_ReusedExchange",
        "ShuffledJoin" => "sqlOp_ShuffledJoin",
        "BroadcastHashJoin" => "sqlOp_BroadcastHashJoin",
        "BroadcastNestedLoopJoin" | "CartesianProduct" => "sqlOp_NestedLoopJoin",
        "Sort" => "sqlOp_Sort",
        "Window" => "sqlOp_Window",
        "Union" => "sqlOp_Union",
        "Expand" => "sqlOp_Expand",
        "Generate" => "sqlOp_Generate",
        "TakeOrderedAndProject" => "sqlOp_TakeOrderedAndProject",
        "GlobalLimit" | "LocalLimit" | "CollectLimit" => "sqlOp_Limit",
        "Subquery" | "SubqueryBroadcast" | "ReusedSubquery" => "sqlOp_Subquery",
        _ => "sqlOp_Other",
    }
}

/// Every column `operator_column` can return.
pub const OPERATOR_COLUMNS: &[&str] = &[
    "sqlOp_BroadcastExchange",
    "sqlOp_BroadcastHashJoin",
    "sqlOp_Exchange",
    "sqlOp_Expand",
    "sqlOp_Filter",
    "sqlOp_Generate",
    "sqlOp_HashAggregate",
    "sqlOp_Limit",
    "sqlOp_NestedLoopJoin",
    "sqlOp_Other",
    "sqlOp_Project",
    "sqlOp_ReusedExchange",
    "sqlOp_Scan",
    "sqlOp_ShuffledJoin",
    "sqlOp_Sort",
    "sqlOp_Subquery",
    "sqlOp_TakeOrderedAndProject",
    "sqlOp_Union",
    "sqlOp_Window",
    "sqlOp_Write",
];
