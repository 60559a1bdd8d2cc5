//! Planner configuration.
//!
//! [`PlannerSettings`] is the plain value the planning core reads. Inside
//! PostgreSQL the same knobs are GUC variables registered in `_PG_init()`
//! (all prefixed with `pg_shardplan.`) and snapshotted per planning request
//! by [`current_settings`].

use serde::{Deserialize, Serialize};

#[cfg(feature = "pg18")]
use pgrx::guc::*;

/// Group id of the coordinator node.
pub const COORDINATOR_GROUP_ID: i32 = 0;

/// Executor used for queries that fan out to more than one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskExecutorType {
    /// Opens one connection per task and streams results back.
    RealTime,
    /// Assigns tasks to worker-side trackers. Supports repartition joins.
    TaskTracker,
}

impl TaskExecutorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecutorType::RealTime => "real-time",
            TaskExecutorType::TaskTracker => "task-tracker",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "real-time" | "real_time" => Some(TaskExecutorType::RealTime),
            "task-tracker" | "task_tracker" => Some(TaskExecutorType::TaskTracker),
            _ => None,
        }
    }

    /// Whether this executor can run repartition jobs.
    pub fn supports_repartition(&self) -> bool {
        matches!(self, TaskExecutorType::TaskTracker)
    }
}

/// Level at which the "multi-task query" notice is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiTaskLogLevel {
    Off,
    Debug,
    Log,
    Notice,
    Info,
    Warning,
}

impl MultiTaskLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultiTaskLogLevel::Off => "off",
            MultiTaskLogLevel::Debug => "debug",
            MultiTaskLogLevel::Log => "log",
            MultiTaskLogLevel::Notice => "notice",
            MultiTaskLogLevel::Info => "info",
            MultiTaskLogLevel::Warning => "warning",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(MultiTaskLogLevel::Off),
            "debug" | "debug1" => Some(MultiTaskLogLevel::Debug),
            "log" => Some(MultiTaskLogLevel::Log),
            "notice" => Some(MultiTaskLogLevel::Notice),
            "info" => Some(MultiTaskLogLevel::Info),
            "warning" => Some(MultiTaskLogLevel::Warning),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, MultiTaskLogLevel::Off)
    }
}

/// Snapshot of every setting the planner consults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Master switch. When false no query is considered distributed.
    pub enabled: bool,
    /// Try the single-shard router planner first, and allow materializing
    /// CTEs and subqueries.
    pub enable_router_execution: bool,
    /// Legacy mode: push every subquery down as-is and never build
    /// sub-plans.
    pub subquery_pushdown: bool,
    pub task_executor_type: TaskExecutorType,
    pub multi_task_query_log_level: MultiTaskLogLevel,
    /// Group of the node this backend runs on. Part of every intermediate
    /// result name.
    pub local_group_id: i32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings {
            enabled: true,
            enable_router_execution: true,
            subquery_pushdown: false,
            task_executor_type: TaskExecutorType::RealTime,
            multi_task_query_log_level: MultiTaskLogLevel::Off,
            local_group_id: COORDINATOR_GROUP_ID,
        }
    }
}

// ── GUC variables ──────────────────────────────────────────────────────────

/// Master enable/disable switch for distributed planning.
#[cfg(feature = "pg18")]
pub static PGS_ENABLED: GucSetting<bool> = GucSetting::<bool>::new(true);

/// Whether the router executor (single-shard fast path) is available.
#[cfg(feature = "pg18")]
pub static PGS_ENABLE_ROUTER_EXECUTION: GucSetting<bool> = GucSetting::<bool>::new(true);

/// Push subqueries down without recursive planning.
#[cfg(feature = "pg18")]
pub static PGS_SUBQUERY_PUSHDOWN: GucSetting<bool> = GucSetting::<bool>::new(false);

/// Executor for multi-task queries: `"real-time"` or `"task-tracker"`.
#[cfg(feature = "pg18")]
pub static PGS_TASK_EXECUTOR_TYPE: GucSetting<Option<std::ffi::CString>> =
    GucSetting::<Option<std::ffi::CString>>::new(Some(c"real-time"));

/// Level of the notice emitted before a multi-task query runs.
///
/// - `"off"` (default): no notice.
/// - `"debug"`, `"log"`, `"notice"`, `"info"`, `"warning"`: emit at that level.
#[cfg(feature = "pg18")]
pub static PGS_MULTI_TASK_QUERY_LOG_LEVEL: GucSetting<Option<std::ffi::CString>> =
    GucSetting::<Option<std::ffi::CString>>::new(Some(c"off"));

/// Group id of the local node. Workers are configured with their own group.
#[cfg(feature = "pg18")]
pub static PGS_LOCAL_GROUP_ID: GucSetting<i32> = GucSetting::<i32>::new(COORDINATOR_GROUP_ID);

/// Register all GUC variables. Called from `_PG_init()`.
#[cfg(feature = "pg18")]
pub fn register_gucs() {
    GucRegistry::define_bool_guc(
        c"pg_shardplan.enabled",
        c"Master enable/disable switch for distributed planning.",
        c"When false, every query is planned by the standard planner alone.",
        &PGS_ENABLED,
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_bool_guc(
        c"pg_shardplan.enable_router_execution",
        c"Enables the router executor for single-shard queries.",
        c"Recursive planning of CTEs and subqueries also relies on the router executor.",
        &PGS_ENABLE_ROUTER_EXECUTION,
        GucContext::Userset,
        GucFlags::default(),
    );

    GucRegistry::define_bool_guc(
        c"pg_shardplan.subquery_pushdown",
        c"Pushes subqueries down to the workers without recursive planning.",
        c"Queries whose subqueries cannot be pushed down fail instead of being split into sub-plans.",
        &PGS_SUBQUERY_PUSHDOWN,
        GucContext::Userset,
        GucFlags::default(),
    );

    GucRegistry::define_string_guc(
        c"pg_shardplan.task_executor_type",
        c"Executor for queries with more than one task.",
        c"'real-time' (default) or 'task-tracker'. Only task-tracker can run repartition jobs.",
        &PGS_TASK_EXECUTOR_TYPE,
        GucContext::Userset,
        GucFlags::default(),
    );

    GucRegistry::define_string_guc(
        c"pg_shardplan.multi_task_query_log_level",
        c"Log level of the notice emitted for multi-task queries.",
        c"'off' (default), 'debug', 'log', 'notice', 'info' or 'warning'.",
        &PGS_MULTI_TASK_QUERY_LOG_LEVEL,
        GucContext::Userset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_shardplan.local_group_id",
        c"Group id of the local node.",
        c"Used in the names of intermediate result files. 0 is the coordinator.",
        &PGS_LOCAL_GROUP_ID,
        0,        // min
        i32::MAX, // max
        GucContext::Postmaster,
        GucFlags::default(),
    );
}

// ── Convenience accessors ──────────────────────────────────────────────────

#[cfg(feature = "pg18")]
pub fn pg_shardplan_enabled() -> bool {
    PGS_ENABLED.get()
}

#[cfg(feature = "pg18")]
pub fn pg_shardplan_enable_router_execution() -> bool {
    PGS_ENABLE_ROUTER_EXECUTION.get()
}

#[cfg(feature = "pg18")]
pub fn pg_shardplan_subquery_pushdown() -> bool {
    PGS_SUBQUERY_PUSHDOWN.get()
}

/// Unknown values fall back to the real-time executor.
#[cfg(feature = "pg18")]
pub fn pg_shardplan_task_executor_type() -> TaskExecutorType {
    PGS_TASK_EXECUTOR_TYPE
        .get()
        .and_then(|cs| cs.to_str().ok().and_then(TaskExecutorType::from_str))
        .unwrap_or(TaskExecutorType::RealTime)
}

#[cfg(feature = "pg18")]
pub fn pg_shardplan_multi_task_query_log_level() -> MultiTaskLogLevel {
    PGS_MULTI_TASK_QUERY_LOG_LEVEL
        .get()
        .and_then(|cs| cs.to_str().ok().and_then(MultiTaskLogLevel::from_str))
        .unwrap_or(MultiTaskLogLevel::Off)
}

#[cfg(feature = "pg18")]
pub fn pg_shardplan_local_group_id() -> i32 {
    PGS_LOCAL_GROUP_ID.get()
}

/// Snapshot the GUCs into a [`PlannerSettings`].
#[cfg(feature = "pg18")]
pub fn current_settings() -> PlannerSettings {
    PlannerSettings {
        enabled: pg_shardplan_enabled(),
        enable_router_execution: pg_shardplan_enable_router_execution(),
        subquery_pushdown: pg_shardplan_subquery_pushdown(),
        task_executor_type: pg_shardplan_task_executor_type(),
        multi_task_query_log_level: pg_shardplan_multi_task_query_log_level(),
        local_group_id: pg_shardplan_local_group_id(),
    }
}
