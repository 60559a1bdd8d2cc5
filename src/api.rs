//! SQL-callable helpers.
//!
//! Exposed in the `pg_shardplan` schema. They let operators inspect what the
//! planner would do in the current session without planning a query.

use pgrx::prelude::*;

use crate::config;
use crate::error::PlannerError;
use crate::plan::{IntermediateResultId, PlanId, SessionIdentity};

/// File name of the materialized result of sub-plan `sub_plan_id` of plan
/// `plan_id` in the current session.
#[pg_extern(schema = "pg_shardplan", stable)]
fn intermediate_result_name(plan_id: i64, sub_plan_id: i32) -> String {
    let result = intermediate_result_name_impl(plan_id, sub_plan_id);
    match result {
        Ok(name) => name,
        Err(e) => e.report(),
    }
}

fn intermediate_result_name_impl(plan_id: i64, sub_plan_id: i32) -> Result<String, PlannerError> {
    let plan_id = u64::try_from(plan_id)
        .map_err(|_| PlannerError::InternalError(format!("invalid plan id {plan_id}")))?;
    let sub_plan_id = u32::try_from(sub_plan_id)
        .map_err(|_| PlannerError::InternalError(format!("invalid sub-plan id {sub_plan_id}")))?;
    let id = IntermediateResultId {
        session: SessionIdentity::current(&config::current_settings()),
        plan_id: PlanId(plan_id),
        sub_plan_id,
    };
    Ok(id.to_string())
}

/// The planner settings in effect for this session.
#[pg_extern(schema = "pg_shardplan", stable, name = "planner_settings")]
fn planner_settings() -> pgrx::JsonB {
    let result = planner_settings_impl();
    match result {
        Ok(settings) => pgrx::JsonB(settings),
        Err(e) => e.report(),
    }
}

fn planner_settings_impl() -> Result<serde_json::Value, PlannerError> {
    Ok(serde_json::to_value(config::current_settings())?)
}
