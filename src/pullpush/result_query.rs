//! Queries that read a materialized sub-plan result back.

use crate::plan::IntermediateResultId;
use crate::query::{
    ColumnType, Expr, FromExpr, FunctionId, JoinTreeNode, Query, QueryId, QueryTree,
    RangeTableEntry, RangeTableFunction, RteKind, TargetEntry,
};

/// Alias of the function entry in a result query.
pub const RESULT_ALIAS: &str = "intermediate_result";
pub const RESULT_FORMAT: &str = "binary";

/// A column a query returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Output columns of a query: every non-junk target entry, in order.
pub fn visible_columns(query: &Query) -> Vec<ResultColumn> {
    query
        .visible_targets()
        .map(|te| ResultColumn {
            name: te.name.clone().unwrap_or_default(),
            column_type: te.expr.column_type(),
        })
        .collect()
}

/// Build the query that replaces `subquery` once it is materialized:
///
/// ```sql
/// SELECT c1, ..., cn
/// FROM read_intermediate_result('<result name>', 'binary')
///      AS intermediate_result(c1 t1, ..., cn tn)
/// ```
///
/// The columns match the subquery's output exactly in name, type, type
/// modifier and collation.
pub fn build_sub_plan_result_query(
    tree: &QueryTree,
    subquery: QueryId,
    result: &IntermediateResultId,
    reader: FunctionId,
) -> Query {
    let columns = visible_columns(tree.query(subquery));

    let call = Expr::Func {
        func_id: reader,
        name: "read_intermediate_result".to_string(),
        args: vec![
            Expr::text_const(&result.to_string()),
            Expr::text_const(RESULT_FORMAT),
        ],
        result_type: ColumnType::new(crate::query::INVALID_OID),
        returns_set: true,
    };
    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let function_rte = RangeTableEntry {
        kind: RteKind::Function {
            functions: vec![RangeTableFunction {
                expr: call,
                column_names: column_names.clone(),
                column_types: columns.iter().map(|c| c.column_type).collect(),
            }],
        },
        alias: RESULT_ALIAS.to_string(),
        column_names,
        in_from_clause: true,
    };

    let mut query = Query::select();
    let index = query.add_range_table_entry(function_rte);
    query.join_tree = FromExpr {
        items: vec![JoinTreeNode::RangeTableRef(index)],
        quals: None,
    };
    query.target_list = columns
        .into_iter()
        .enumerate()
        .map(|(i, column)| {
            TargetEntry::new(
                Expr::var(index, i as i32 + 1, column.column_type),
                i as u32 + 1,
                &column.name,
            )
        })
        .collect();
    query
}
