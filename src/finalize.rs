//! Final plan assembly.
//!
//! Wraps a distributed plan descriptor in a [`DistributedScan`] node and
//! shapes the statement handed back to the host engine:
//!
//! - **Router shape**: the scan is the only plan node. Its output is read
//!   through a synthetic `remote_scan` range-table entry at index 1.
//! - **Non-router shape**: a combiner plan built over the scan merges the
//!   workers' results on the coordinator.
//!
//! Both shapes keep the local plan's range table so that permission checks
//! at execution time see every relation the statement touches.

use tracing::{debug, info, warn};

use crate::config::{MultiTaskLogLevel, PlannerSettings};
use crate::error::PlannerError;
use crate::interfaces::DistributedPlanBuilder;
use crate::plan::{DistributedPlan, DistributedScan, ExecutorType, PlanNode, PlannedStatement};
use crate::query::{Expr, RangeTableEntry, RteKind, TargetEntry};

const MULTI_TASK_HINT: &str =
    "Queries are split to multiple tasks if they have to be split into several queries on the workers.";

/// Alias of the synthetic entry describing a router plan's output.
pub const REMOTE_SCAN_ALIAS: &str = "remote_scan";

/// Pick the executor that runs `plan`.
pub fn job_executor_type(plan: &DistributedPlan, settings: &PlannerSettings) -> ExecutorType {
    if plan.planning_error.is_some() {
        return ExecutorType::DelayedError;
    }
    if plan.insert_select_query.is_some() {
        return ExecutorType::CoordinatorInsertSelect;
    }
    if plan.router_executable {
        return ExecutorType::Router;
    }

    if plan.is_multi_task() {
        log_multi_task_query(settings.multi_task_query_log_level);
    }

    if settings.task_executor_type.supports_repartition() {
        ExecutorType::TaskTracker
    } else {
        ExecutorType::RealTime
    }
}

fn log_multi_task_query(level: MultiTaskLogLevel) {
    let message = "multi-task query about to be executed";
    match level {
        MultiTaskLogLevel::Off => {}
        MultiTaskLogLevel::Debug => debug!(hint = MULTI_TASK_HINT, "{message}"),
        MultiTaskLogLevel::Log => info!(hint = MULTI_TASK_HINT, "{message}"),
        MultiTaskLogLevel::Notice | MultiTaskLogLevel::Info => {
            info!(pg_level = level.as_str(), hint = MULTI_TASK_HINT, "{message}")
        }
        MultiTaskLogLevel::Warning => warn!(hint = MULTI_TASK_HINT, "{message}"),
    }
}

/// Combine the local plan shell with the distributed plan.
pub fn finalize_plan(
    settings: &PlannerSettings,
    builder: &dyn DistributedPlanBuilder,
    local: PlannedStatement,
    mut plan: DistributedPlan,
) -> Result<PlannedStatement, PlannerError> {
    let executor = job_executor_type(&plan, settings);
    plan.relation_ids = local.relation_oids.clone();

    let scan = DistributedScan {
        executor,
        total_cost: local.plan_tree.total_cost(),
        plan,
        target_list: Vec::new(),
    };

    if scan.plan.master_query.is_some() {
        finalize_non_router_plan(builder, local, scan)
    } else {
        Ok(finalize_router_plan(local, scan))
    }
}

fn finalize_non_router_plan(
    builder: &dyn DistributedPlanBuilder,
    local: PlannedStatement,
    scan: DistributedScan,
) -> Result<PlannedStatement, PlannerError> {
    let mut result = builder.build_combiner_plan(scan)?;
    result.query_id = local.query_id;
    result.utility_statement = local.utility_statement;
    result.range_table.extend(local.range_table);
    Ok(result)
}

fn finalize_router_plan(local: PlannedStatement, mut scan: DistributedScan) -> PlannedStatement {
    let mut column_names = Vec::new();
    for target in local.plan_tree.target_list().iter().filter(|t| !t.resjunk) {
        let name = target
            .name
            .clone()
            .unwrap_or_else(|| format!("column{}", target.resno));
        column_names.push(name.clone());
        scan.target_list.push(TargetEntry {
            expr: Expr::var(1, target.resno as i32, target.expr.column_type()),
            resno: target.resno,
            name: Some(name),
            resjunk: false,
        });
    }

    let remote_scan = RangeTableEntry {
        kind: RteKind::Values { lists: Vec::new() },
        alias: REMOTE_SCAN_ALIAS.to_string(),
        column_names,
        in_from_clause: true,
    };
    let mut range_table = vec![remote_scan];
    range_table.extend(local.range_table);

    let mut result = PlannedStatement::new(local.command, PlanNode::DistributedScan(Box::new(scan)));
    result.range_table = range_table;
    result.relation_oids = Vec::new();
    result.query_id = local.query_id;
    result.utility_statement = local.utility_statement;
    result.has_returning = local.has_returning;
    result.can_set_tag = true;
    result
}
