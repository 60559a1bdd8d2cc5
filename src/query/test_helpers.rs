//! Shared tree builders for unit tests.
//!
//! These never touch PostgreSQL; every column is `int4` unless stated.

use super::*;

/// A base relation entry with `int4` columns.
pub fn relation(alias: &str, oid: Oid, columns: &[&str]) -> RangeTableEntry {
    RangeTableEntry::relation(alias, RelationId(oid), columns)
}

/// `SELECT <all columns> FROM <entries>` with a flat FROM list.
pub fn select_from(entries: &[RangeTableEntry]) -> Query {
    let mut q = Query::select();
    let mut resno = 0;
    for rte in entries {
        let index = q.add_range_table_entry(rte.clone());
        q.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
        for (i, name) in rte.column_names.iter().enumerate() {
            resno += 1;
            q.target_list.push(TargetEntry::new(
                Expr::var(index, i as i32 + 1, ColumnType::int4()),
                resno,
                name,
            ));
        }
    }
    q
}

/// `EXISTS (<subquery>)`.
pub fn exists(subquery: QueryId) -> Expr {
    Expr::SubLink {
        kind: SubLinkKind::Exists,
        test_expr: None,
        subquery,
        result_type: ColumnType::boolean(),
    }
}

/// First column of the first entry of the query `levels_up` levels above.
pub fn outer_var(levels_up: u32) -> Expr {
    Expr::Var(Var {
        rt_index: 1,
        attno: 1,
        column_type: ColumnType::int4(),
        levels_up,
    })
}

/// Root `SELECT` over one subquery entry per given query.
pub fn tree_over_subqueries(subqueries: Vec<Query>) -> QueryTree {
    let mut tree = QueryTree::new(Query::select());
    let ids: Vec<QueryId> = subqueries.into_iter().map(|q| tree.add(q)).collect();
    let root = tree.root();
    for (i, id) in ids.into_iter().enumerate() {
        let alias = format!("s{}", i + 1);
        let rte = RangeTableEntry::subquery(&alias, id, &["a"]);
        let q = tree.query_mut(root);
        let index = q.add_range_table_entry(rte);
        q.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
        q.target_list.push(TargetEntry::new(
            Expr::var(index, 1, ColumnType::int4()),
            index as u32,
            &alias,
        ));
    }
    tree
}
