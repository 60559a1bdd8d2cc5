//! Planner restriction contexts.
//!
//! While the host planner plans a query it reports every base relation and
//! every join it considers. Those facts are collected into a
//! [`RestrictionContext`] so the colocation checks can later ask whether
//! the relations of a (sub)query are joined on their distribution keys.
//!
//! Planning passes nest: materializing a CTE or subquery plans it through
//! the top-level entry point, which runs the host planner again. Each pass
//! therefore pushes its own context onto a [`RestrictionStack`]. The stack
//! is threaded explicitly through the recursive calls, and
//! [`RestrictionStack::push`] hands out a [`RestrictionScope`] guard that
//! pops the context when it goes out of scope, including when an error
//! propagates through it.

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::identity;
use crate::interfaces::{DistributionCatalog, PartitionMethod, PlannerHooks};
use crate::query::{Expr, JoinType, QueryId, QueryTree, RangeTableEntry, RelationId, RteIdentity};

/// Nesting position of a relation or join inside the statement the host
/// planner is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerScope {
    /// 1 for the top-level query, 2 for its subqueries, ...
    pub query_level: u32,
}

/// Optimizer information about a base relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub estimated_rows: f64,
    /// Filters pushed down to the relation scan.
    pub base_restrictions: Vec<Expr>,
}

/// One base relation seen by the host planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRestriction {
    pub rt_index: usize,
    pub relation_id: RelationId,
    pub identity: Option<RteIdentity>,
    pub info: RelationInfo,
    pub distributed: bool,
    pub partition_method: PartitionMethod,
    pub scope: PlannerScope,
}

/// One join seen by the host planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRestriction {
    pub join_type: JoinType,
    pub filters: Vec<Expr>,
    /// Relations on the outer side of the join.
    pub outer: BTreeSet<RteIdentity>,
    /// Relations on the inner side of the join.
    pub inner: BTreeSet<RteIdentity>,
    pub scope: PlannerScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRestrictionContext {
    pub has_distributed_relation: bool,
    pub has_local_relation: bool,
    /// Whether every distributed relation seen is a reference table.
    pub all_reference_tables: bool,
    pub relations: Vec<RelationRestriction>,
}

impl Default for RelationRestrictionContext {
    fn default() -> Self {
        RelationRestrictionContext {
            has_distributed_relation: false,
            has_local_relation: false,
            all_reference_tables: true,
            relations: Vec::new(),
        }
    }
}

impl RelationRestrictionContext {
    fn add(&mut self, restriction: RelationRestriction) {
        if restriction.distributed {
            self.has_distributed_relation = true;
            self.all_reference_tables &= restriction.partition_method == PartitionMethod::None;
        } else {
            self.has_local_relation = true;
        }
        self.relations.push(restriction);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRestrictionContext {
    pub joins: Vec<JoinRestriction>,
}

/// Relation and join facts of one host-planner pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestrictionContext {
    pub relations: RelationRestrictionContext,
    pub joins: JoinRestrictionContext,
}

impl RestrictionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_relation(&mut self, restriction: RelationRestriction) {
        self.relations.add(restriction);
    }

    pub fn record_join(&mut self, join: JoinRestriction) {
        self.joins.joins.push(join);
    }

    /// Keep only the facts about relations reachable from `query`.
    ///
    /// A join survives when both of its sides are made of such relations.
    /// The relation flags are recomputed for the surviving relations.
    pub fn filter_for_query(&self, tree: &QueryTree, query: QueryId) -> RestrictionContext {
        let identities = identity::query_rte_identities(tree, query);
        self.filter_for_identities(&identities)
    }

    pub fn filter_for_identities(&self, identities: &BTreeSet<RteIdentity>) -> RestrictionContext {
        let mut filtered = RestrictionContext::new();
        for relation in &self.relations.relations {
            let reachable = relation
                .identity
                .map(|id| identities.contains(&id))
                .unwrap_or(false);
            if reachable {
                filtered.record_relation(relation.clone());
            }
        }
        for join in &self.joins.joins {
            let sides_reachable = !(join.outer.is_empty() && join.inner.is_empty())
                && join.outer.is_subset(identities)
                && join.inner.is_subset(identities);
            if sides_reachable {
                filtered.record_join(join.clone());
            }
        }
        filtered
    }

    /// Identities of every recorded relation.
    pub fn identities(&self) -> BTreeSet<RteIdentity> {
        self.relations
            .relations
            .iter()
            .filter_map(|r| r.identity)
            .collect()
    }
}

/// Stack of restriction contexts, one per active host-planner pass.
#[derive(Debug, Default)]
pub struct RestrictionStack {
    contexts: Vec<RestrictionContext>,
}

impl RestrictionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a fresh context. It is popped when the returned scope drops.
    pub fn push(&mut self) -> RestrictionScope<'_> {
        self.contexts.push(RestrictionContext::new());
        let depth = self.contexts.len();
        RestrictionScope { stack: self, depth }
    }

    /// The most recently pushed context.
    pub fn top(&self) -> Result<&RestrictionContext, PlannerError> {
        self.contexts.last().ok_or_else(empty_stack)
    }

    pub fn top_mut(&mut self) -> Result<&mut RestrictionContext, PlannerError> {
        self.contexts.last_mut().ok_or_else(empty_stack)
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn record_relation(&mut self, restriction: RelationRestriction) -> Result<(), PlannerError> {
        self.top_mut()?.record_relation(restriction);
        Ok(())
    }

    pub fn record_join(&mut self, join: JoinRestriction) -> Result<(), PlannerError> {
        self.top_mut()?.record_join(join);
        Ok(())
    }
}

fn empty_stack() -> PlannerError {
    PlannerError::InternalError("no planner restriction context is active".to_string())
}

/// A pushed restriction context. Dropping the scope pops it.
#[derive(Debug)]
pub struct RestrictionScope<'a> {
    stack: &'a mut RestrictionStack,
    depth: usize,
}

impl RestrictionScope<'_> {
    /// The context pushed by this scope, even while nested scopes are active.
    pub fn context(&self) -> &RestrictionContext {
        &self.stack.contexts[self.depth - 1]
    }

    /// Discard the facts gathered so far and start over with a fresh context.
    pub fn reset(&mut self) {
        self.stack.contexts[self.depth - 1] = RestrictionContext::new();
    }
}

impl Deref for RestrictionScope<'_> {
    type Target = RestrictionStack;

    fn deref(&self) -> &RestrictionStack {
        self.stack
    }
}

impl DerefMut for RestrictionScope<'_> {
    fn deref_mut(&mut self) -> &mut RestrictionStack {
        self.stack
    }
}

impl Drop for RestrictionScope<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(self.stack.depth(), self.depth, "unbalanced restriction stack");
        self.stack.contexts.truncate(self.depth - 1);
    }
}

/// Receives the host planner's callbacks and records them on the top of the
/// stack, classifying relations through the catalog.
pub struct RestrictionCollector<'s, 'c> {
    stack: &'s mut RestrictionStack,
    catalog: &'c dyn DistributionCatalog,
}

impl<'s, 'c> RestrictionCollector<'s, 'c> {
    pub fn new(stack: &'s mut RestrictionStack, catalog: &'c dyn DistributionCatalog) -> Self {
        RestrictionCollector { stack, catalog }
    }
}

impl PlannerHooks for RestrictionCollector<'_, '_> {
    fn on_relation(
        &mut self,
        rt_index: usize,
        rte: &RangeTableEntry,
        info: RelationInfo,
        scope: PlannerScope,
    ) -> Result<(), PlannerError> {
        let Some(relation) = rte.as_relation() else {
            return Ok(());
        };
        let distributed = self.catalog.is_distributed(relation.relation_id);
        let partition_method = if distributed {
            self.catalog.partition_method(relation.relation_id)
        } else {
            PartitionMethod::None
        };
        self.stack.record_relation(RelationRestriction {
            rt_index,
            relation_id: relation.relation_id,
            identity: relation.identity,
            info,
            distributed,
            partition_method,
            scope,
        })
    }

    fn on_join(&mut self, join: JoinRestriction) -> Result<(), PlannerError> {
        self.stack.record_join(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restriction(identity: u32, distributed: bool, method: PartitionMethod) -> RelationRestriction {
        RelationRestriction {
            rt_index: identity as usize,
            relation_id: RelationId(100 + identity),
            identity: Some(RteIdentity(identity)),
            info: RelationInfo::default(),
            distributed,
            partition_method: method,
            scope: PlannerScope { query_level: 1 },
        }
    }

    fn join(outer: &[u32], inner: &[u32]) -> JoinRestriction {
        JoinRestriction {
            join_type: JoinType::Inner,
            filters: Vec::new(),
            outer: outer.iter().map(|i| RteIdentity(*i)).collect(),
            inner: inner.iter().map(|i| RteIdentity(*i)).collect(),
            scope: PlannerScope { query_level: 1 },
        }
    }

    #[test]
    fn test_fresh_context_flags() {
        let ctx = RestrictionContext::new();
        assert!(ctx.relations.all_reference_tables);
        assert!(!ctx.relations.has_distributed_relation);
        assert!(!ctx.relations.has_local_relation);
    }

    #[test]
    fn test_record_relation_updates_flags() {
        let mut ctx = RestrictionContext::new();
        ctx.record_relation(restriction(1, true, PartitionMethod::None));
        assert!(ctx.relations.all_reference_tables);
        ctx.record_relation(restriction(2, true, PartitionMethod::Hash));
        assert!(!ctx.relations.all_reference_tables);
        assert!(ctx.relations.has_distributed_relation);
        assert!(!ctx.relations.has_local_relation);
        ctx.record_relation(restriction(3, false, PartitionMethod::None));
        assert!(ctx.relations.has_local_relation);
    }

    #[test]
    fn test_top_of_empty_stack_fails() {
        let mut stack = RestrictionStack::new();
        assert!(matches!(stack.top(), Err(PlannerError::InternalError(_))));
        assert!(stack.record_join(join(&[1], &[2])).is_err());
    }

    #[test]
    fn test_scope_pops_on_drop() {
        let mut stack = RestrictionStack::new();
        {
            let mut outer = stack.push();
            outer
                .record_relation(restriction(1, true, PartitionMethod::Hash))
                .unwrap();
            {
                let mut inner = outer.push();
                assert_eq!(inner.depth(), 2);
                inner
                    .record_relation(restriction(2, true, PartitionMethod::Hash))
                    .unwrap();
                assert_eq!(inner.context().relations.relations.len(), 1);
            }
            assert_eq!(outer.depth(), 1);
            assert_eq!(outer.top().unwrap().relations.relations.len(), 1);
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn test_scope_pops_on_error_path() {
        fn failing(stack: &mut RestrictionStack) -> Result<(), PlannerError> {
            let _scope = stack.push();
            Err(PlannerError::RecursiveCte)
        }
        let mut stack = RestrictionStack::new();
        assert!(failing(&mut stack).is_err());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_reset_replaces_scope_context() {
        let mut stack = RestrictionStack::new();
        let mut scope = stack.push();
        scope
            .record_relation(restriction(1, true, PartitionMethod::Hash))
            .unwrap();
        scope.reset();
        assert!(scope.context().relations.relations.is_empty());
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_filter_for_identities() {
        let mut ctx = RestrictionContext::new();
        ctx.record_relation(restriction(1, true, PartitionMethod::Hash));
        ctx.record_relation(restriction(2, true, PartitionMethod::None));
        ctx.record_relation(restriction(3, false, PartitionMethod::None));
        ctx.record_join(join(&[1], &[2]));
        ctx.record_join(join(&[2], &[3]));

        let keep: BTreeSet<RteIdentity> = [RteIdentity(1), RteIdentity(2)].into_iter().collect();
        let filtered = ctx.filter_for_identities(&keep);
        assert_eq!(filtered.relations.relations.len(), 2);
        assert_eq!(filtered.joins.joins.len(), 1);
        assert!(!filtered.relations.has_local_relation);
        assert!(!filtered.relations.all_reference_tables);
        assert_eq!(filtered.identities(), keep);
    }
}
