//! Pull-push planning.
//!
//! Parts of a query that cannot run on the shards as they are (CTEs,
//! subqueries that need a merge step, set operations over non-colocated
//! relations, the non-recurring side of an outer join) are planned on their
//! own as sub-plans. Their results are materialized on the coordinator
//! ("pulled") and read back by the rewritten query, which is then sent to
//! the workers ("pushed").
//!
//! Sub-plans are produced in a fixed order: CTEs in list order, then nested
//! queries in walker order, then set-operation branches depth-first, then
//! the sides of outer joins. Sub-plan ids follow that order.

pub mod colocation;
pub mod cte;
pub mod outer_join;
pub mod result_query;
pub mod set_operation;
pub mod subquery;

use tracing::debug;

use crate::error::PlannerError;
use crate::plan::{IntermediateResultId, PlanId, SubPlan};
use crate::planner::DistributedPlanner;
use crate::query::{walker, QueryId, QueryTree, SetOperation};
use crate::restriction::{RestrictionContext, RestrictionStack};

/// State of one pull-push pass over a statement.
pub struct PullPushContext<'p, 'a> {
    pub(crate) planner: &'p DistributedPlanner<'a>,
    /// Nested planning passes push their contexts here.
    pub(crate) stack: &'p mut RestrictionStack,
    pub(crate) plan_id: PlanId,
    /// Facts gathered by the host planner for the statement being rewritten.
    pub(crate) restrictions: RestrictionContext,
    pub(crate) sub_plans: Vec<SubPlan>,
    /// Nesting depth of the query being visited; 0 for the statement itself.
    pub(crate) level: u32,
}

impl<'p, 'a> PullPushContext<'p, 'a> {
    pub fn new(
        planner: &'p DistributedPlanner<'a>,
        stack: &'p mut RestrictionStack,
        plan_id: PlanId,
        restrictions: RestrictionContext,
        sub_plans: Vec<SubPlan>,
    ) -> Self {
        PullPushContext {
            planner,
            stack,
            plan_id,
            restrictions,
            sub_plans,
            level: 0,
        }
    }

    pub fn sub_plans(&self) -> &[SubPlan] {
        &self.sub_plans
    }

    pub fn into_sub_plans(self) -> Vec<SubPlan> {
        self.sub_plans
    }

    /// Where the next sub-plan's result will be stored.
    pub(crate) fn next_result_id(&self) -> IntermediateResultId {
        IntermediateResultId {
            session: self.planner.session,
            plan_id: self.plan_id,
            sub_plan_id: self.sub_plans.len() as u32,
        }
    }

    /// Restriction facts about the relations reachable from `query`.
    pub(crate) fn filtered(&self, tree: &QueryTree, query: QueryId) -> RestrictionContext {
        self.restrictions.filter_for_query(tree, query)
    }
}

/// Rewrite the query at `query`, and everything below it, so that what
/// remains can be pushed down to the shards.
pub fn plan_pull_push_subqueries(
    ctx: &mut PullPushContext<'_, '_>,
    tree: &mut QueryTree,
    query: QueryId,
) -> Result<(), PlannerError> {
    if ctx.planner.settings.subquery_pushdown {
        return Ok(());
    }

    cte::plan_ctes(ctx, tree, query)?;

    for child in walker::direct_subqueries(tree, query) {
        subquery::plan_nested_query(ctx, tree, child)?;
    }

    let set_operations = tree.query(query).set_operations.clone();
    match set_operations {
        Some(set_operations) => {
            let pushdown = ctx.planner.pushdown;
            let filtered = ctx.filtered(tree, query);
            // Top-level set operations are always split; a nested UNION stays
            // in place when its branches can be pushed down together.
            let materialize = set_operations.root_operation() != Some(SetOperation::Union)
                || ctx.level == 0
                || pushdown.unsupported_union_query(tree, query).is_some()
                || !ctx.planner.colocation.safe_to_pushdown_union(&filtered);
            if materialize {
                debug!(level = ctx.level, "planning set operation branches separately");
                set_operation::plan_set_operations(ctx, tree, query, &set_operations)?;
            }
        }
        None => colocation::plan_non_colocated_joins(ctx, tree, query)?,
    }

    let items = tree.query(query).join_tree.items.clone();
    for item in &items {
        outer_join::plan_recurring_outer_joins(ctx, tree, query, item)?;
    }

    Ok(())
}
