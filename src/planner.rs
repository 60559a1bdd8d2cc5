//! The distributed planner entry point.
//!
//! [`DistributedPlanner::plan`] wraps the host engine's planner. Statements
//! that touch distributed tables are tagged with range-table identities,
//! planned by the host planner while restriction facts are collected, and
//! then turned into a distributed plan: a router plan when a single shard
//! can answer the query, otherwise a multi-task plan built after pull-push
//! planning has split off whatever cannot be pushed down.

use tracing::debug;

use crate::classifier;
use crate::config::PlannerSettings;
use crate::error::{DeferredError, PlannerError};
use crate::finalize;
use crate::identity;
use crate::interfaces::{
    BoundParams, ColocationOracle, CursorOptions, DistributedPlanBuilder, DistributionCatalog,
    HostPlanner, PushdownOracle, RouterPlanner,
};
use crate::plan::{next_plan_id, DistributedPlan, PlanId, PlannedStatement, SessionIdentity, SubPlan};
use crate::pullpush::{self, PullPushContext};
use crate::query::QueryTree;
use crate::restriction::{RestrictionCollector, RestrictionScope, RestrictionStack};
use crate::serialization_check;

/// Cost given to plans that may only work once parameters are bound. High
/// enough that the host prefers re-planning with the actual values, low
/// enough that summing a few of them does not overflow.
pub const UNRESOLVED_PARAMS_COST: f64 = f32::MAX as f64 / 1e8;

/// The components the planner delegates to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub host: &'a dyn HostPlanner,
    pub router: &'a dyn RouterPlanner,
    pub catalog: &'a dyn DistributionCatalog,
    pub colocation: &'a dyn ColocationOracle,
    pub pushdown: &'a dyn PushdownOracle,
    pub builder: &'a dyn DistributedPlanBuilder,
}

pub struct DistributedPlanner<'a> {
    pub(crate) settings: PlannerSettings,
    pub(crate) session: SessionIdentity,
    pub(crate) host: &'a dyn HostPlanner,
    pub(crate) router: &'a dyn RouterPlanner,
    pub(crate) catalog: &'a dyn DistributionCatalog,
    pub(crate) colocation: &'a dyn ColocationOracle,
    pub(crate) pushdown: &'a dyn PushdownOracle,
    pub(crate) builder: &'a dyn DistributedPlanBuilder,
}

impl<'a> DistributedPlanner<'a> {
    pub fn new(settings: PlannerSettings, session: SessionIdentity, collaborators: Collaborators<'a>) -> Self {
        DistributedPlanner {
            settings,
            session,
            host: collaborators.host,
            router: collaborators.router,
            catalog: collaborators.catalog,
            colocation: collaborators.colocation,
            pushdown: collaborators.pushdown,
            builder: collaborators.builder,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Plan a statement.
    ///
    /// The tree is rewritten in place: after planning a distributed query
    /// it holds the statement as it was sent to the workers, with CTEs and
    /// materialized subqueries replaced by readers of their results.
    pub fn plan(
        &self,
        tree: &mut QueryTree,
        cursor_options: CursorOptions,
        params: Option<&BoundParams>,
    ) -> Result<PlannedStatement, PlannerError> {
        let mut stack = RestrictionStack::new();
        self.plan_in_stack(&mut stack, tree, cursor_options, params)
    }

    /// [`plan`](Self::plan) for a statement nested in a planning pass that
    /// is already running on `stack`.
    pub(crate) fn plan_in_stack(
        &self,
        stack: &mut RestrictionStack,
        tree: &mut QueryTree,
        cursor_options: CursorOptions,
        params: Option<&BoundParams>,
    ) -> Result<PlannedStatement, PlannerError> {
        let mut needs_distributed =
            classifier::needs_distributed_planning(tree, tree.root(), self.catalog, &self.settings)?;
        if cursor_options.is_force_distributed() {
            needs_distributed = true;
        }

        // The host planner scribbles on its input; keep the statement as
        // written for the distributed planners.
        let mut original = None;
        if needs_distributed {
            identity::assign_identities(tree);
            original = Some(tree.clone());
            identity::adjust_partition_expansion(tree, self.catalog, false);
        }

        let result = {
            let mut scope = stack.push();
            let local = {
                let mut hooks = RestrictionCollector::new(&mut scope, self.catalog);
                self.host.plan(tree, cursor_options, params, &mut hooks)?
            };
            match original.as_mut() {
                Some(original) => {
                    let plan_id = next_plan_id();
                    self.create_distributed_plan(&mut scope, plan_id, local, original, tree, params)?
                }
                None => local,
            }
        };

        if needs_distributed {
            identity::adjust_partition_expansion(tree, self.catalog, true);
        }

        // Inlined SQL functions can reveal distributed tables only after
        // the host planner ran.
        if !needs_distributed
            && classifier::needs_distributed_planning(tree, tree.root(), self.catalog, &self.settings)?
        {
            return Err(PlannerError::ParameterizedSqlFunction);
        }

        Ok(result)
    }

    fn create_distributed_plan(
        &self,
        scope: &mut RestrictionScope<'_>,
        plan_id: PlanId,
        local: PlannedStatement,
        original: &mut QueryTree,
        transformed: &mut QueryTree,
        params: Option<&BoundParams>,
    ) -> Result<PlannedStatement, PlannerError> {
        let unresolved_params = classifier::has_unresolved_params(original, params);
        let command = transformed.root_query().command;

        let plan = if command.is_modification() {
            let plan = if classifier::insert_select_into_distributed_table(original, original.root(), self.catalog) {
                self.builder.build_insert_select_plan(original, scope.context())?
            } else {
                self.builder.build_modify_plan(original, transformed, scope.context())?
            };
            Some(plan)
        } else {
            self.create_distributed_select_plan(
                scope,
                plan_id,
                original,
                transformed,
                params,
                unresolved_params,
                Vec::new(),
            )?
        };

        // Without a plan the failure is most likely caused by unbound
        // parameters. SQL functions never get a custom plan, so an error
        // has to be ready for them.
        let mut plan =
            plan.unwrap_or_else(|| DistributedPlan::with_error(command, DeferredError::could_not_create_plan()));

        if let Some(error) = &plan.planning_error {
            if !unresolved_params {
                return Err(PlannerError::Deferred(error.clone()));
            }
        }

        plan.plan_id = Some(plan_id);
        let inflate_cost =
            unresolved_params && (plan.planning_error.is_some() || plan.is_multi_shard_modify());

        let mut result = finalize::finalize_plan(&self.settings, self.builder, local, plan)?;
        if inflate_cost {
            result.plan_tree.set_total_cost(UNRESOLVED_PARAMS_COST);
        }
        Ok(result)
    }

    /// Plan a SELECT: router first, then pull-push planning and the
    /// multi-task builders. Returns `None` when the query cannot be planned
    /// until its parameters are bound.
    #[allow(clippy::too_many_arguments)]
    fn create_distributed_select_plan(
        &self,
        scope: &mut RestrictionScope<'_>,
        plan_id: PlanId,
        original: &mut QueryTree,
        transformed: &mut QueryTree,
        params: Option<&BoundParams>,
        unresolved_params: bool,
        sub_plans: Vec<SubPlan>,
    ) -> Result<Option<DistributedPlan>, PlannerError> {
        if self.settings.enable_router_execution {
            if let Some(mut plan) = self.router.try_route(original, transformed, scope.context()) {
                if plan.planning_error.is_none() {
                    attach_sub_plans(&mut plan, sub_plans);
                    return Ok(Some(plan));
                }
                if let Some(error) = &plan.planning_error {
                    debug!(plan_id = %plan_id, "{}", error.message);
                }
            }
        }

        if unresolved_params {
            return Ok(None);
        }

        let known_sub_plans = sub_plans.len();
        let sub_plans = {
            let restrictions = scope.context().clone();
            let root = original.root();
            let mut ctx = PullPushContext::new(self, &mut **scope, plan_id, restrictions, sub_plans);
            pullpush::plan_pull_push_subqueries(&mut ctx, original, root)?;
            ctx.into_sub_plans()
        };

        if sub_plans.len() > known_sub_plans {
            // Relations, joins and restriction facts all changed. Plan the
            // rewritten statement again from scratch.
            debug!(
                plan_id = %plan_id,
                sub_plans = sub_plans.len(),
                "re-planning query with materialized sub-plans"
            );
            identity::assign_identities(original);
            let mut replanned = original.clone();
            identity::adjust_partition_expansion(&mut replanned, self.catalog, false);

            scope.reset();
            {
                let mut hooks = RestrictionCollector::new(&mut **scope, self.catalog);
                self.host
                    .plan(&mut replanned, CursorOptions::default(), params, &mut hooks)?;
            }
            *transformed = replanned;

            return self.create_distributed_select_plan(
                scope,
                plan_id,
                original,
                transformed,
                None,
                false,
                sub_plans,
            );
        }

        let mut logical = self
            .builder
            .build_logical_plan(original, transformed, scope.context(), params)?;
        self.builder.optimize_logical_plan(&mut logical)?;
        serialization_check::check_node_is_dumpable(&logical)?;

        let mut plan = self.builder.build_physical_plan(logical, scope.context())?;
        attach_sub_plans(&mut plan, sub_plans);
        Ok(Some(plan))
    }
}

/// Put the sub-plans produced so far in front of the plan's own.
fn attach_sub_plans(plan: &mut DistributedPlan, mut sub_plans: Vec<SubPlan>) {
    sub_plans.append(&mut plan.sub_plans);
    plan.sub_plans = sub_plans;
}
