//! Outer joins between recurring and non-recurring sides.
//!
//! A side is recurring when no distributed table is reachable from it: the
//! same rows show up next to every shard. An outer join that keeps the rows
//! of a recurring side cannot run shard by shard against a non-recurring
//! side, since every shard would emit the unmatched recurring rows. The
//! non-recurring side is materialized instead.

use super::subquery::recursively_plan_query;
use super::PullPushContext;
use crate::classifier::{join_tree_contains_distributed_table, query_contains_distributed_table};
use crate::error::PlannerError;
use crate::query::{JoinTreeNode, JoinType, QueryId, QueryTree, RangeTableEntry};

/// Walk the join tree below `node` top-down and materialize the
/// non-recurring side of outer joins whose other side recurs.
pub fn plan_recurring_outer_joins(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
    node: &JoinTreeNode,
) -> Result<(), PlannerError> {
    let JoinTreeNode::Join(join) = node else {
        return Ok(());
    };

    let catalog = ctx.planner.catalog;
    let mut left_recurs = !join_tree_contains_distributed_table(tree, query, &join.left, catalog);
    let mut right_recurs = !join_tree_contains_distributed_table(tree, query, &join.right, catalog);

    match join.join_type {
        JoinType::Left => {
            if left_recurs && !right_recurs {
                plan_join_tree(ctx, tree, query, &join.right)?;
                right_recurs = true;
            }
        }
        JoinType::Right => {
            if !left_recurs && right_recurs {
                plan_join_tree(ctx, tree, query, &join.left)?;
                left_recurs = true;
            }
        }
        JoinType::Full => {
            if left_recurs && !right_recurs {
                plan_join_tree(ctx, tree, query, &join.right)?;
                right_recurs = true;
            }
            if !left_recurs && right_recurs {
                plan_join_tree(ctx, tree, query, &join.left)?;
                left_recurs = true;
            }
        }
        // Recurring rows are safe on either side of an inner join.
        JoinType::Inner | JoinType::Semi | JoinType::Anti => {}
    }

    if left_recurs && right_recurs {
        return Ok(());
    }

    plan_recurring_outer_joins(ctx, tree, query, &join.left)?;
    plan_recurring_outer_joins(ctx, tree, query, &join.right)
}

/// Materialize every subquery leaf below `node` that reads a distributed
/// table, right side first.
fn plan_join_tree(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
    node: &JoinTreeNode,
) -> Result<(), PlannerError> {
    match node {
        JoinTreeNode::Join(join) => {
            plan_join_tree(ctx, tree, query, &join.right)?;
            plan_join_tree(ctx, tree, query, &join.left)
        }
        JoinTreeNode::RangeTableRef(index) => {
            let leaf = tree
                .query(query)
                .rte(*index)
                .and_then(RangeTableEntry::subquery_id);
            match leaf {
                Some(leaf) if query_contains_distributed_table(tree, leaf, ctx.planner.catalog) => {
                    recursively_plan_query(ctx, tree, leaf)
                }
                _ => Ok(()),
            }
        }
    }
}
