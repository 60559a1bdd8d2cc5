//! SQL-like rendering of query trees for log messages.
//!
//! The output is meant for humans reading DEBUG logs. It is not guaranteed
//! to be valid SQL.

use super::{
    BoolOp, ColumnType, Expr, JoinTreeNode, QueryId, QueryTree, RangeTableEntry, RteKind,
    SetOperation, SetOperationTree, SubLinkKind, TEXTOID,
};
use crate::query::CommandType;

/// Render the query at `id`.
pub fn deparse_query(tree: &QueryTree, id: QueryId) -> String {
    Deparser {
        tree,
        scopes: Vec::new(),
    }
    .query(id)
}

struct Deparser<'a> {
    tree: &'a QueryTree,
    /// Enclosing queries, innermost last.
    scopes: Vec<QueryId>,
}

impl Deparser<'_> {
    fn query(&mut self, id: QueryId) -> String {
        self.scopes.push(id);
        let sql = self.query_body(id);
        self.scopes.pop();
        sql
    }

    fn query_body(&mut self, id: QueryId) -> String {
        let q = self.tree.query(id);
        let mut sql = String::new();

        if !q.cte_list.is_empty() {
            let ctes: Vec<String> = q
                .cte_list
                .iter()
                .map(|cte| format!("{} AS ({})", cte.name, self.query(cte.query)))
                .collect();
            sql.push_str(&format!("WITH {} ", ctes.join(", ")));
        }

        if let Some(setop) = &q.set_operations {
            sql.push_str(&self.set_operation(id, setop));
            return sql;
        }

        let from = self.from_clause(id);
        match q.command {
            CommandType::Select | CommandType::Utility => {
                sql.push_str("SELECT ");
                if q.has_distinct {
                    sql.push_str("DISTINCT ");
                }
                sql.push_str(&self.target_list(id));
                if !from.is_empty() {
                    sql.push_str(&format!(" FROM {from}"));
                }
            }
            CommandType::Insert => {
                sql.push_str(&format!("INSERT INTO {}", self.result_relation_name(id)));
                if !from.is_empty() {
                    sql.push_str(&format!(" SELECT {} FROM {from}", self.target_list(id)));
                }
            }
            CommandType::Update => {
                sql.push_str(&format!(
                    "UPDATE {} SET {}",
                    self.result_relation_name(id),
                    self.target_list(id)
                ));
                if !from.is_empty() {
                    sql.push_str(&format!(" FROM {from}"));
                }
            }
            CommandType::Delete => {
                sql.push_str(&format!("DELETE FROM {}", self.result_relation_name(id)));
                if !from.is_empty() {
                    sql.push_str(&format!(" USING {from}"));
                }
            }
        }

        if let Some(quals) = &q.join_tree.quals {
            sql.push_str(&format!(" WHERE {}", self.expr(quals)));
        }
        if let Some(having) = &q.having_qual {
            sql.push_str(&format!(" HAVING {}", self.expr(having)));
        }
        if let Some(limit) = &q.limit_count {
            sql.push_str(&format!(" LIMIT {}", self.expr(limit)));
        }
        if let Some(offset) = &q.limit_offset {
            sql.push_str(&format!(" OFFSET {}", self.expr(offset)));
        }
        sql
    }

    fn result_relation_name(&self, id: QueryId) -> String {
        let q = self.tree.query(id);
        q.result_relation
            .and_then(|index| q.rte(index))
            .map(|rte| rte.alias.clone())
            .unwrap_or_else(|| "?".to_string())
    }

    fn target_list(&mut self, id: QueryId) -> String {
        let q = self.tree.query(id);
        let items: Vec<String> = q
            .visible_targets()
            .map(|te| {
                let rendered = self.expr(&te.expr);
                match &te.name {
                    Some(name) if rendered != *name && !rendered.ends_with(&format!(".{name}")) => {
                        format!("{rendered} AS {name}")
                    }
                    _ => rendered,
                }
            })
            .collect();
        if items.is_empty() {
            "NULL".to_string()
        } else {
            items.join(", ")
        }
    }

    fn from_clause(&mut self, id: QueryId) -> String {
        let q = self.tree.query(id);
        let items: Vec<String> = q
            .join_tree
            .items
            .iter()
            .map(|item| self.join_node(id, item))
            .collect();
        items.join(", ")
    }

    fn join_node(&mut self, id: QueryId, node: &JoinTreeNode) -> String {
        match node {
            JoinTreeNode::RangeTableRef(index) => match self.tree.query(id).rte(*index) {
                Some(rte) => self.range_table_entry(rte),
                None => format!("<rte {index}>"),
            },
            JoinTreeNode::Join(join) => {
                let left = self.join_node(id, &join.left);
                let right = self.join_node(id, &join.right);
                match &join.quals {
                    Some(quals) => format!(
                        "({left} {} {right} ON {})",
                        join.join_type.as_str(),
                        self.expr(quals)
                    ),
                    None => format!("({left} {} {right} ON true)", join.join_type.as_str()),
                }
            }
        }
    }

    fn range_table_entry(&mut self, rte: &RangeTableEntry) -> String {
        match &rte.kind {
            RteKind::Relation(rel) => {
                if rte.alias.is_empty() {
                    format!("rel_{}", rel.relation_id.0)
                } else {
                    rte.alias.clone()
                }
            }
            RteKind::Subquery { query } => format!("({}) {}", self.query(*query), rte.alias),
            RteKind::Function { functions } => {
                let calls: Vec<String> = functions.iter().map(|f| self.expr(&f.expr)).collect();
                format!(
                    "{} {}({})",
                    calls.join(", "),
                    rte.alias,
                    rte.column_names.join(", ")
                )
            }
            RteKind::Values { lists } => {
                let rows: Vec<String> = lists
                    .iter()
                    .map(|row| {
                        let cells: Vec<String> = row.iter().map(|e| self.expr(e)).collect();
                        format!("({})", cells.join(", "))
                    })
                    .collect();
                format!("(VALUES {}) {}", rows.join(", "), rte.alias)
            }
            RteKind::Cte { name, .. } => {
                if *name == rte.alias {
                    name.clone()
                } else {
                    format!("{name} {}", rte.alias)
                }
            }
            RteKind::Join { .. } => rte.alias.clone(),
        }
    }

    fn set_operation(&mut self, id: QueryId, node: &SetOperationTree) -> String {
        match node {
            SetOperationTree::Leaf { rt_index } => {
                let sub = self
                    .tree
                    .query(id)
                    .rte(*rt_index)
                    .and_then(RangeTableEntry::subquery_id);
                match sub {
                    Some(sub) => format!("({})", self.query(sub)),
                    None => format!("<rte {rt_index}>"),
                }
            }
            SetOperationTree::Operation {
                op,
                all,
                left,
                right,
            } => {
                let keyword = match op {
                    SetOperation::Union => "UNION",
                    SetOperation::Intersect => "INTERSECT",
                    SetOperation::Except => "EXCEPT",
                };
                let all = if *all { " ALL" } else { "" };
                format!(
                    "{} {keyword}{all} {}",
                    self.set_operation(id, left),
                    self.set_operation(id, right)
                )
            }
        }
    }

    fn column_name(&self, rt_index: usize, attno: i32, levels_up: u32) -> String {
        let scope = self
            .scopes
            .len()
            .checked_sub(1 + levels_up as usize)
            .and_then(|i| self.scopes.get(i));
        let rte = scope.and_then(|qid| self.tree.query(*qid).rte(rt_index));
        match rte {
            Some(rte) => {
                let column = usize::try_from(attno)
                    .ok()
                    .and_then(|a| a.checked_sub(1))
                    .and_then(|a| rte.column_names.get(a));
                match column {
                    Some(column) => format!("{}.{column}", rte.alias),
                    None => format!("{}.col{attno}", rte.alias),
                }
            }
            None => format!("outer{levels_up}.col{attno}"),
        }
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Var(var) => self.column_name(var.rt_index, var.attno, var.levels_up),
            Expr::Const { column_type, value } => render_const(column_type, value.as_deref()),
            Expr::Param { id, .. } => format!("${id}"),
            Expr::PlaceHolderVar { expr, .. } => self.expr(expr),
            Expr::CurrentOf { cursor_name } => format!("CURRENT OF {cursor_name}"),
            Expr::Func { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                format!("{name}({})", args.join(", "))
            }
            Expr::Op { name, args, .. } => match args.as_slice() {
                [left, right] => format!("({} {name} {})", self.expr(left), self.expr(right)),
                [operand] => format!("({name} {})", self.expr(operand)),
                _ => {
                    let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                    format!("{name}({})", args.join(", "))
                }
            },
            Expr::Bool { op, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                match op {
                    BoolOp::And => format!("({})", args.join(" AND ")),
                    BoolOp::Or => format!("({})", args.join(" OR ")),
                    BoolOp::Not => format!("(NOT {})", args.join(", ")),
                }
            }
            Expr::SubLink {
                kind,
                test_expr,
                subquery,
                ..
            } => {
                let sub = self.query(*subquery);
                let test = test_expr.as_ref().map(|t| self.expr(t));
                match (kind, test) {
                    (SubLinkKind::Exists, _) => format!("(EXISTS ({sub}))"),
                    (SubLinkKind::Any, Some(test)) => format!("({test} IN ({sub}))"),
                    (SubLinkKind::All, Some(test)) => format!("({test} <> ALL ({sub}))"),
                    (SubLinkKind::Array, _) => format!("ARRAY({sub})"),
                    _ => format!("({sub})"),
                }
            }
        }
    }
}

fn render_const(column_type: &ColumnType, value: Option<&str>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(v) if column_type.type_oid == TEXTOID => format!("'{}'::text", v.replace('\'', "''")),
        Some(v) => v.to_string(),
    }
}
