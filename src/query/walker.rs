//! Traversals over a [`QueryTree`].
//!
//! Every walker visits nested queries in the same order: sublinks found in
//! the query's own clauses, then CTE bodies, then range-table entries
//! (FROM-clause subqueries and sublinks inside function or VALUES entries)
//! in range-table order. Sub-plan numbering depends on this order.

use std::collections::HashSet;

use super::{Expr, FunctionId, QueryId, QueryTree, RteKind};

/// Queries nested exactly one level below `id`.
pub fn direct_subqueries(tree: &QueryTree, id: QueryId) -> Vec<QueryId> {
    let query = tree.query(id);
    let mut out = Vec::new();
    for expr in query.clause_expressions() {
        out.extend(expr.sublink_queries());
    }
    out.extend(query.cte_list.iter().map(|cte| cte.query));
    for rte in &query.range_table {
        match &rte.kind {
            RteKind::Subquery { query } => out.push(*query),
            RteKind::Function { .. } | RteKind::Values { .. } => {
                for expr in rte.expressions() {
                    out.extend(expr.sublink_queries());
                }
            }
            RteKind::Relation(_) | RteKind::Join { .. } | RteKind::Cte { .. } => {}
        }
    }
    out
}

/// `id` followed by every query reachable from it, pre-order, each once.
pub fn reachable_queries(tree: &QueryTree, id: QueryId) -> Vec<QueryId> {
    fn visit(tree: &QueryTree, id: QueryId, seen: &mut HashSet<QueryId>, out: &mut Vec<QueryId>) {
        if !seen.insert(id) {
            return;
        }
        out.push(id);
        for child in direct_subqueries(tree, id) {
            visit(tree, child, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(tree, id, &mut seen, &mut out);
    out
}

/// Positions `(query, rt_index)` of every base-relation entry reachable
/// from `id`, in traversal order.
pub fn base_relation_refs(tree: &QueryTree, id: QueryId) -> Vec<(QueryId, usize)> {
    let mut out = Vec::new();
    for qid in reachable_queries(tree, id) {
        for (i, rte) in tree.query(qid).range_table.iter().enumerate() {
            if let RteKind::Relation(_) = rte.kind {
                out.push((qid, i + 1));
            }
        }
    }
    out
}

/// Whether anything in the query at `id` is bound by an enclosing query:
/// a column or placeholder whose levels-up crosses `id`, or `CURRENT OF`.
pub fn contains_outer_references(tree: &QueryTree, id: QueryId) -> bool {
    fn at_depth(tree: &QueryTree, id: QueryId, depth: u32) -> bool {
        let crosses = |expr: &Expr| {
            expr.any(&mut |node| match node {
                Expr::Var(var) => var.levels_up > depth,
                Expr::PlaceHolderVar { levels_up, .. } => *levels_up > depth,
                Expr::CurrentOf { .. } => true,
                _ => false,
            })
        };
        if tree.query(id).expressions().into_iter().any(crosses) {
            return true;
        }
        direct_subqueries(tree, id)
            .into_iter()
            .any(|child| at_depth(tree, child, depth + 1))
    }

    at_depth(tree, id, 0)
}

/// Whether a call to `func` appears anywhere below `id`.
pub fn contains_function_call(tree: &QueryTree, id: QueryId, func: FunctionId) -> bool {
    reachable_queries(tree, id).into_iter().any(|qid| {
        tree.query(qid).expressions().into_iter().any(|expr| {
            expr.any(&mut |node| matches!(node, Expr::Func { func_id, .. } if *func_id == func))
        })
    })
}

/// Every expression of every query reachable from `id`.
pub fn all_expressions(tree: &QueryTree, id: QueryId) -> Vec<&Expr> {
    reachable_queries(tree, id)
        .into_iter()
        .flat_map(|qid| tree.query(qid).expressions())
        .collect()
}

/// CTE-reference entries below `id` that point at the CTE list of `id`
/// itself: at nesting depth `d` these are the references whose levels-up
/// equals `d`.
pub fn cte_references(tree: &QueryTree, id: QueryId) -> Vec<(QueryId, usize)> {
    fn collect(tree: &QueryTree, id: QueryId, depth: u32, out: &mut Vec<(QueryId, usize)>) {
        for (i, rte) in tree.query(id).range_table.iter().enumerate() {
            if let RteKind::Cte { levels_up, .. } = &rte.kind {
                if *levels_up == depth {
                    out.push((id, i + 1));
                }
            }
        }
        for child in direct_subqueries(tree, id) {
            collect(tree, child, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    collect(tree, id, 0, &mut out);
    out
}
