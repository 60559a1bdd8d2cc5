//! Materialization of common table expressions.

use tracing::debug;

use super::result_query::build_sub_plan_result_query;
use super::PullPushContext;
use crate::error::PlannerError;
use crate::interfaces::CursorOptions;
use crate::plan::SubPlan;
use crate::query::deparse::deparse_query;
use crate::query::{walker, QueryId, QueryTree, RteKind};

/// Plan every CTE of `query` as a sub-plan, point each reference to it at a
/// reader of the sub-plan's result, and clear the CTE list.
pub fn plan_ctes(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<(), PlannerError> {
    let q = tree.query(query);
    if q.has_modifying_cte {
        return Err(PlannerError::ModifyingCte);
    }
    if q.has_recursive {
        return Err(PlannerError::RecursiveCte);
    }
    if q.cte_list.is_empty() {
        return Ok(());
    }

    let ctes = q.cte_list.clone();
    let references = walker::cte_references(tree, query);
    let planner = ctx.planner;
    let reader_function = planner.catalog.intermediate_result_function();

    for cte in &ctes {
        if walker::contains_outer_references(tree, cte.query) {
            return Err(PlannerError::CorrelatedCte);
        }

        let result = ctx.next_result_id();
        let result_query = build_sub_plan_result_query(tree, cte.query, &result, reader_function);
        let mut sub_tree = tree.extract(cte.query);

        debug!(
            plan_id = %result.plan_id,
            sub_plan_id = result.sub_plan_id,
            "building subplan for CTE {}: {}",
            cte.name,
            deparse_query(&sub_tree, sub_tree.root())
        );

        for &(owner, rt_index) in &references {
            let matches = tree
                .query(owner)
                .rte(rt_index)
                .map(|rte| matches!(&rte.kind, RteKind::Cte { name, .. } if *name == cte.name))
                .unwrap_or(false);
            if !matches {
                continue;
            }

            debug!(
                "replacing CTE reference {} --> {}",
                cte.name,
                deparse_query(&QueryTree::new(result_query.clone()), QueryId(0))
            );

            let reader = tree.add(result_query.clone());
            if let Some(rte) = tree.query_mut(owner).rte_mut(rt_index) {
                rte.kind = RteKind::Subquery { query: reader };
            }
        }

        let cursor_options = if walker::contains_function_call(&sub_tree, sub_tree.root(), reader_function) {
            CursorOptions::force_distributed()
        } else {
            CursorOptions::default()
        };

        if !planner.settings.enable_router_execution {
            return Err(PlannerError::RouterExecutorDisabled("CTEs"));
        }

        let planned = planner.plan_in_stack(ctx.stack, &mut sub_tree, cursor_options, None)?;
        ctx.sub_plans.push(SubPlan {
            sub_plan_id: result.sub_plan_id,
            result,
            plan: Box::new(planned),
        });
    }

    tree.query_mut(query).cte_list.clear();
    Ok(())
}
