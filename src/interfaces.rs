//! Contracts of the components the planner drives but does not implement.
//!
//! The host engine's planner, the single-shard router planner, the
//! distribution metadata, the colocation analysis and the multi-task plan
//! builders all live outside this crate. The planner only decides when to
//! call them and how to stitch their results together.

use serde::{Deserialize, Serialize};

use crate::error::{DeferredError, PlannerError};
use crate::plan::{DistributedPlan, DistributedScan, PlannedStatement};
use crate::query::{FunctionId, Oid, QueryId, QueryTree, RangeTableEntry, RelationId, RteIdentity};
use crate::restriction::{JoinRestriction, PlannerScope, RelationInfo, RestrictionContext};

/// How a distributed relation is split into shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Not partitioned: a reference table replicated to every node.
    None,
    Hash,
    Range,
    Append,
}

impl PartitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionMethod::None => "none",
            PartitionMethod::Hash => "hash",
            PartitionMethod::Range => "range",
            PartitionMethod::Append => "append",
        }
    }
}

/// Cursor options passed to the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOptions(pub u32);

impl CursorOptions {
    pub const SCROLL: u32 = 0x0002;
    pub const NO_SCROLL: u32 = 0x0004;
    /// Plan through the distributed planner even if no distributed
    /// relation is referenced.
    pub const FORCE_DISTRIBUTED: u32 = 0x0200_0000;

    pub fn force_distributed() -> Self {
        CursorOptions(Self::FORCE_DISTRIBUTED)
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn is_force_distributed(&self) -> bool {
        self.contains(Self::FORCE_DISTRIBUTED)
    }
}

/// A bound external parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParam {
    /// `None` when the parameter's type is not known yet.
    pub type_oid: Option<Oid>,
    pub value: Option<String>,
}

/// External parameter values supplied by the client, `$1` first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundParams {
    pub params: Vec<BoundParam>,
}

impl BoundParams {
    /// Whether `$id` has a value of known type.
    pub fn is_resolved(&self, id: i32) -> bool {
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| self.params.get(index))
            .map(|param| param.type_oid.is_some())
            .unwrap_or(false)
    }
}

/// The two callbacks the host planner fires while planning.
pub trait PlannerHooks {
    /// A base relation was considered.
    fn on_relation(
        &mut self,
        rt_index: usize,
        rte: &RangeTableEntry,
        info: RelationInfo,
        scope: PlannerScope,
    ) -> Result<(), PlannerError>;

    /// A join between two sets of relations was considered.
    fn on_join(&mut self, join: JoinRestriction) -> Result<(), PlannerError>;
}

/// The host engine's planner.
pub trait HostPlanner {
    /// Plan `tree` locally. The planner may rewrite the tree in place.
    fn plan(
        &self,
        tree: &mut QueryTree,
        cursor_options: CursorOptions,
        params: Option<&BoundParams>,
        hooks: &mut dyn PlannerHooks,
    ) -> Result<PlannedStatement, PlannerError>;
}

/// Fast path for queries that touch a single shard.
pub trait RouterPlanner {
    /// A router plan, a plan carrying the reason routing failed, or `None`.
    fn try_route(
        &self,
        original: &QueryTree,
        transformed: &QueryTree,
        restrictions: &RestrictionContext,
    ) -> Option<DistributedPlan>;
}

/// Distribution metadata.
pub trait DistributionCatalog {
    /// Whether the distribution layer is installed and usable.
    fn is_active(&self) -> bool;

    fn is_distributed(&self, relation: RelationId) -> bool;

    /// Only meaningful for distributed relations.
    fn partition_method(&self, relation: RelationId) -> PartitionMethod;

    /// Whether the relation is a natively partitioned table.
    fn is_partitioned_table(&self, relation: RelationId) -> bool;

    /// The set-returning function that reads an intermediate result file.
    fn intermediate_result_function(&self) -> FunctionId;
}

/// Colocation analysis over restriction facts.
pub trait ColocationOracle {
    fn safe_to_pushdown_union(&self, restrictions: &RestrictionContext) -> bool;

    /// Whether all distributed relations are joined on their partition keys.
    fn restriction_equivalence_on_partition_keys(&self, restrictions: &RestrictionContext) -> bool;

    /// The relation that takes part in the fewest colocated joins.
    fn fewest_colocated_joins_identity(&self, restrictions: &RestrictionContext) -> Option<RteIdentity>;
}

/// Query-shape checks of the subquery pushdown planner.
pub trait PushdownOracle {
    /// Why the subquery cannot be pushed down to the shards as-is, if it cannot.
    fn cannot_pushdown_subquery(&self, tree: &QueryTree, query: QueryId) -> Option<DeferredError>;

    /// Why the query cannot be planned as a standalone distributed query.
    fn query_not_supported(&self, tree: &QueryTree, query: QueryId) -> Option<DeferredError>;

    /// Why a UNION in this query cannot be pushed down, if it cannot.
    fn unsupported_union_query(&self, tree: &QueryTree, query: QueryId) -> Option<DeferredError>;

    /// Whether the query's subquery chain leads to a UNION.
    fn contains_union_subquery(&self, tree: &QueryTree, query: QueryId) -> bool;

    /// Whether the query reads a single relation that the task-tracker
    /// executor can repartition.
    fn single_relation_repartition_subquery(&self, tree: &QueryTree, query: QueryId) -> bool;
}

/// Output of the logical planner, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub tree: serde_json::Value,
}

/// Builders of multi-task plans.
pub trait DistributedPlanBuilder {
    fn build_logical_plan(
        &self,
        original: &QueryTree,
        transformed: &QueryTree,
        restrictions: &RestrictionContext,
        params: Option<&BoundParams>,
    ) -> Result<LogicalPlan, PlannerError>;

    fn optimize_logical_plan(&self, plan: &mut LogicalPlan) -> Result<(), PlannerError>;

    fn build_physical_plan(
        &self,
        logical: LogicalPlan,
        restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError>;

    fn build_modify_plan(
        &self,
        original: &QueryTree,
        transformed: &QueryTree,
        restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError>;

    fn build_insert_select_plan(
        &self,
        original: &QueryTree,
        restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError>;

    /// Plan the combiner query of `scan.plan` on top of the scan node.
    fn build_combiner_plan(&self, scan: DistributedScan) -> Result<PlannedStatement, PlannerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_distributed_flag() {
        assert!(CursorOptions::force_distributed().is_force_distributed());
        assert!(!CursorOptions::default().is_force_distributed());
        assert!(!CursorOptions(CursorOptions::SCROLL).is_force_distributed());
    }

    #[test]
    fn test_bound_params_resolution() {
        let params = BoundParams {
            params: vec![
                BoundParam {
                    type_oid: Some(23),
                    value: Some("1".into()),
                },
                BoundParam {
                    type_oid: None,
                    value: None,
                },
            ],
        };
        assert!(params.is_resolved(1));
        assert!(!params.is_resolved(2));
        assert!(!params.is_resolved(3));
        assert!(!params.is_resolved(0));
        assert!(!params.is_resolved(-1));
    }
}
