//! Branch-by-branch planning of set operations.

use super::subquery::recursively_plan_query;
use super::PullPushContext;
use crate::classifier::query_contains_distributed_table;
use crate::error::PlannerError;
use crate::query::{QueryId, QueryTree, RangeTableEntry, SetOperationTree};

/// Materialize every branch of the set operation that reads a distributed
/// table, left to right, depth-first.
pub fn plan_set_operations(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
    node: &SetOperationTree,
) -> Result<(), PlannerError> {
    match node {
        SetOperationTree::Operation { left, right, .. } => {
            plan_set_operations(ctx, tree, query, left)?;
            plan_set_operations(ctx, tree, query, right)
        }
        SetOperationTree::Leaf { rt_index } => {
            let branch = tree
                .query(query)
                .rte(*rt_index)
                .and_then(RangeTableEntry::subquery_id);
            match branch {
                Some(branch) if query_contains_distributed_table(tree, branch, ctx.planner.catalog) => {
                    recursively_plan_query(ctx, tree, branch)
                }
                _ => Ok(()),
            }
        }
    }
}
