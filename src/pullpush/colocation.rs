//! Materialization of subqueries joined on non-colocated relations.

use tracing::debug;

use super::subquery::recursively_plan_query;
use super::PullPushContext;
use crate::classifier;
use crate::error::PlannerError;
use crate::identity;
use crate::query::{walker, QueryId, QueryTree, RteIdentity};

/// Until the relations below `query` are joined on their partition keys,
/// materialize the smallest subquery holding the relation with the fewest
/// colocated joins.
pub fn plan_non_colocated_joins(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<(), PlannerError> {
    let pushdown = ctx.planner.pushdown;
    let colocation = ctx.planner.colocation;

    let mut filtered = ctx.filtered(tree, query);
    if pushdown.contains_union_subquery(tree, query) && !colocation.safe_to_pushdown_union(&filtered) {
        // Handled once the subquery holding the union is materialized.
        return Ok(());
    }

    while !pushdown.contains_union_subquery(tree, query)
        && !colocation.restriction_equivalence_on_partition_keys(&filtered)
    {
        if !replace_non_colocated_join(ctx, tree, query)? {
            break;
        }
        filtered = ctx.filtered(tree, query);
    }
    Ok(())
}

/// Materialize one subquery of `query` that holds the relation with the
/// fewest colocated joins. Returns whether anything was replaced.
fn replace_non_colocated_join(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<bool, PlannerError> {
    let planner = ctx.planner;
    if !classifier::needs_distributed_planning(tree, query, planner.catalog, &planner.settings)?
        || walker::contains_outer_references(tree, query)
    {
        return Ok(false);
    }

    let filtered = ctx.filtered(tree, query);
    let Some(identity) = planner.colocation.fewest_colocated_joins_identity(&filtered) else {
        return Ok(false);
    };
    let Some(target) = smallest_subquery_with_identity(tree, query, identity) else {
        return Ok(false);
    };

    debug!(identity = identity.0, "materializing non-colocated subquery");
    recursively_plan_query(ctx, tree, target)?;
    Ok(true)
}

/// The most deeply nested query below `query` that references `identity`
/// and can be planned on its own.
fn smallest_subquery_with_identity(
    tree: &QueryTree,
    query: QueryId,
    identity: RteIdentity,
) -> Option<QueryId> {
    for child in walker::direct_subqueries(tree, query) {
        if !identity::query_rte_identities(tree, child).contains(&identity) {
            continue;
        }
        if let Some(found) = smallest_subquery_with_identity(tree, child, identity) {
            return Some(found);
        }
        if !walker::contains_outer_references(tree, child) {
            return Some(child);
        }
    }
    None
}
