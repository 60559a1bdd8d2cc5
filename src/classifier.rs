//! Decides whether a statement goes through distributed planning.

use crate::config::PlannerSettings;
use crate::error::PlannerError;
use crate::interfaces::{BoundParams, DistributionCatalog, PartitionMethod};
use crate::query::{
    walker, CommandType, Expr, JoinTreeNode, ParamKind, QueryId, QueryTree, RelKind, RteKind,
};

/// Whether the query at `query` references distributed relations and must
/// be planned by the distributed planner.
///
/// Fails when local and distributed relations appear in the same statement,
/// and when the rows of a distributed query would be inserted into a local
/// table.
pub fn needs_distributed_planning(
    tree: &QueryTree,
    query: QueryId,
    catalog: &dyn DistributionCatalog,
    settings: &PlannerSettings,
) -> Result<bool, PlannerError> {
    let command = tree.query(query).command;
    if !matches!(
        command,
        CommandType::Select | CommandType::Insert | CommandType::Update | CommandType::Delete
    ) {
        return Ok(false);
    }
    if !settings.enabled || !catalog.is_active() {
        return Ok(false);
    }

    // The SELECT part may mix local and distributed relations freely.
    if insert_select_into_distributed_table(tree, query, catalog) {
        return Ok(true);
    }

    let insert_target = insert_select_source(tree, query).and(tree.query(query).result_relation);

    let mut has_local = false;
    let mut has_distributed = false;
    for qid in walker::reachable_queries(tree, query) {
        for (i, rte) in tree.query(qid).range_table.iter().enumerate() {
            let Some(relation) = rte.as_relation() else {
                continue;
            };
            if relation.relkind == RelKind::View {
                continue;
            }
            if qid == query && insert_target == Some(i + 1) {
                continue;
            }
            if catalog.is_distributed(relation.relation_id) {
                has_distributed = true;
            } else {
                has_local = true;
            }
        }
    }

    if has_local && has_distributed {
        return Err(PlannerError::MixedLocalAndDistributed);
    }
    if !has_distributed {
        return Ok(false);
    }
    if insert_select_into_local_table(tree, query, catalog) {
        return Err(PlannerError::InsertIntoLocalTable);
    }
    Ok(true)
}

/// The SELECT of an `INSERT ... SELECT`: the only FROM item of the INSERT,
/// a subquery entry.
pub fn insert_select_source(tree: &QueryTree, query: QueryId) -> Option<QueryId> {
    let q = tree.query(query);
    if q.command != CommandType::Insert {
        return None;
    }
    let [JoinTreeNode::RangeTableRef(index)] = q.join_tree.items.as_slice() else {
        return None;
    };
    q.rte(*index).and_then(|rte| rte.subquery_id())
}

fn insert_target_is_distributed(
    tree: &QueryTree,
    query: QueryId,
    catalog: &dyn DistributionCatalog,
) -> Option<bool> {
    let q = tree.query(query);
    let target = q.result_relation.and_then(|index| q.rte(index))?;
    let relation = target.as_relation()?;
    Some(catalog.is_distributed(relation.relation_id))
}

pub fn insert_select_into_distributed_table(
    tree: &QueryTree,
    query: QueryId,
    catalog: &dyn DistributionCatalog,
) -> bool {
    insert_select_source(tree, query).is_some()
        && insert_target_is_distributed(tree, query, catalog) == Some(true)
}

pub fn insert_select_into_local_table(
    tree: &QueryTree,
    query: QueryId,
    catalog: &dyn DistributionCatalog,
) -> bool {
    insert_select_source(tree, query).is_some()
        && insert_target_is_distributed(tree, query, catalog) == Some(false)
}

/// Whether a relation is distributed on a partition key. Reference tables
/// are replicated everywhere and do not count.
pub fn is_distributed_table_rte(kind: &RteKind, catalog: &dyn DistributionCatalog) -> bool {
    let RteKind::Relation(relation) = kind else {
        return false;
    };
    catalog.is_distributed(relation.relation_id)
        && catalog.partition_method(relation.relation_id) != PartitionMethod::None
}

/// Whether the range table of `query`, or of a FROM-clause subquery below
/// it, holds a distributed table.
pub fn query_contains_distributed_table(
    tree: &QueryTree,
    query: QueryId,
    catalog: &dyn DistributionCatalog,
) -> bool {
    tree.query(query).range_table.iter().any(|rte| {
        is_distributed_table_rte(&rte.kind, catalog)
            || rte
                .subquery_id()
                .map(|sub| query_contains_distributed_table(tree, sub, catalog))
                .unwrap_or(false)
    })
}

/// Whether a distributed table is reachable from a join-tree node of
/// `query` without leaving the FROM clause.
pub fn join_tree_contains_distributed_table(
    tree: &QueryTree,
    query: QueryId,
    node: &JoinTreeNode,
    catalog: &dyn DistributionCatalog,
) -> bool {
    match node {
        JoinTreeNode::Join(join) => {
            join_tree_contains_distributed_table(tree, query, &join.left, catalog)
                || join_tree_contains_distributed_table(tree, query, &join.right, catalog)
        }
        JoinTreeNode::RangeTableRef(index) => {
            let Some(rte) = tree.query(query).rte(*index) else {
                return false;
            };
            is_distributed_table_rte(&rte.kind, catalog)
                || rte
                    .subquery_id()
                    .map(|sub| query_contains_distributed_table(tree, sub, catalog))
                    .unwrap_or(false)
        }
    }
}

/// Whether an external parameter anywhere in the statement has no bound
/// value of known type.
pub fn has_unresolved_params(tree: &QueryTree, params: Option<&BoundParams>) -> bool {
    walker::all_expressions(tree, tree.root()).into_iter().any(|expr| {
        expr.any(&mut |node| match node {
            Expr::Param {
                kind: ParamKind::Extern,
                id,
                ..
            } => !params.map(|p| p.is_resolved(*id)).unwrap_or(false),
            _ => false,
        })
    })
}
