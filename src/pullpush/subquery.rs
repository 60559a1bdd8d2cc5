//! Per-subquery materialization decisions.

use tracing::debug;

use super::result_query::build_sub_plan_result_query;
use super::{plan_pull_push_subqueries, PullPushContext};
use crate::classifier;
use crate::error::PlannerError;
use crate::identity;
use crate::interfaces::CursorOptions;
use crate::plan::SubPlan;
use crate::query::deparse::deparse_query;
use crate::query::{walker, QueryId, QueryTree};

/// Visit a query nested below the one being rewritten: rewrite its own
/// insides first, then decide whether it has to be materialized as a whole.
pub fn plan_nested_query(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<(), PlannerError> {
    ctx.level += 1;
    let nested = plan_pull_push_subqueries(ctx, tree, query);
    ctx.level -= 1;
    nested?;

    if should_materialize(ctx, tree, query)? {
        return recursively_plan_query(ctx, tree, query);
    }

    if walker::contains_outer_references(tree, query) {
        return Ok(());
    }

    // The query may still join relations that are not colocated.
    let filtered = ctx.filtered(tree, query);
    if ctx.planner.pushdown.contains_union_subquery(tree, query)
        || ctx
            .planner
            .colocation
            .restriction_equivalence_on_partition_keys(&filtered)
    {
        return Ok(());
    }
    let fewest = ctx.planner.colocation.fewest_colocated_joins_identity(&filtered);
    let holds_fewest = fewest
        .map(|id| identity::query_rte_identities(tree, query).contains(&id))
        .unwrap_or(false);
    if holds_fewest {
        recursively_plan_query(ctx, tree, query)?;
    }
    Ok(())
}

/// Whether `query` must be planned on its own and read back as an
/// intermediate result.
///
/// Queries bound to an enclosing query are never materialized. Queries the
/// pushdown planner accepts are materialized only when their relations are
/// not colocated. Of the rest, local-only queries and queries that can be
/// planned as standalone distributed queries are materialized; the others
/// are left in place and fail later.
pub fn should_materialize(
    ctx: &PullPushContext<'_, '_>,
    tree: &QueryTree,
    query: QueryId,
) -> Result<bool, PlannerError> {
    if walker::contains_outer_references(tree, query) {
        debug!("query has a reference to an outer query, so it is not recursively planned");
        return Ok(false);
    }

    let planner = ctx.planner;
    let pushdown = planner.pushdown;

    if pushdown.cannot_pushdown_subquery(tree, query).is_some() {
        if !classifier::needs_distributed_planning(tree, query, planner.catalog, &planner.settings)? {
            // The host planner can always plan a local query by itself.
            return Ok(true);
        }
        if planner.settings.task_executor_type.supports_repartition()
            && pushdown.single_relation_repartition_subquery(tree, query)
        {
            return Ok(false);
        }
        // Sublinks nested inside an otherwise plannable query are left for
        // the pushdown planner.
        return Ok(pushdown.query_not_supported(tree, query).is_none());
    }

    let filtered = ctx.filtered(tree, query);
    Ok(!pushdown.contains_union_subquery(tree, query)
        && pushdown.query_not_supported(tree, query).is_none()
        && !tree.query(query).has_subquery_entries()
        && !planner
            .colocation
            .restriction_equivalence_on_partition_keys(&filtered))
}

/// Plan `query` as a sub-plan and overwrite it in place with a query that
/// reads the sub-plan's result.
pub fn recursively_plan_query(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<(), PlannerError> {
    let planner = ctx.planner;
    let result = ctx.next_result_id();
    let reader_function = planner.catalog.intermediate_result_function();
    let result_query = build_sub_plan_result_query(tree, query, &result, reader_function);

    debug!(
        plan_id = %result.plan_id,
        sub_plan_id = result.sub_plan_id,
        "replacing subquery {} --> {}",
        deparse_query(tree, query),
        deparse_query(&QueryTree::new(result_query.clone()), QueryId(0))
    );

    let cursor_options = if walker::contains_function_call(tree, query, reader_function) {
        CursorOptions::force_distributed()
    } else {
        CursorOptions::default()
    };

    if !planner.settings.enable_router_execution {
        return Err(PlannerError::RouterExecutorDisabled("complex subqueries"));
    }

    let mut sub_tree = tree.extract(query);
    let planned = planner.plan_in_stack(ctx.stack, &mut sub_tree, cursor_options, None)?;
    tree.replace(query, result_query);

    ctx.sub_plans.push(SubPlan {
        sub_plan_id: result.sub_plan_id,
        result,
        plan: Box::new(planned),
    });
    Ok(())
}
