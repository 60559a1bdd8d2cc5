//! Query tree model.
//!
//! A statement is held in a [`QueryTree`]: an arena of [`Query`] nodes
//! addressed by [`QueryId`]. Nested queries (FROM-clause subqueries, CTE
//! bodies, sublinks) refer to each other by id, so replacing a subquery is
//! a single slot overwrite and never requires rebuilding its parent.
//! Copying a tree is a plain `clone()`; every range-table entry keeps its
//! identity across the copy.
//!
//! Range-table indexes are 1-based, as in the host engine.

pub mod deparse;
pub mod expr;
#[cfg(test)]
pub(crate) mod test_helpers;
pub mod walker;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use expr::*;

/// Position of a [`Query`] in its [`QueryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub Oid);

/// Identity of a base-relation range-table entry within one planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RteIdentity(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Select,
    Insert,
    Update,
    Delete,
    /// Any other statement kind.
    Utility,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Select => "SELECT",
            CommandType::Insert => "INSERT",
            CommandType::Update => "UPDATE",
            CommandType::Delete => "DELETE",
            CommandType::Utility => "UTILITY",
        }
    }

    pub fn is_modification(&self) -> bool {
        matches!(
            self,
            CommandType::Insert | CommandType::Update | CommandType::Delete
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelKind {
    Table,
    PartitionedTable,
    View,
    MaterializedView,
    ForeignTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEntry {
    pub relation_id: RelationId,
    pub relkind: RelKind,
    /// Whether the host planner expands the relation into its children.
    pub inherit: bool,
    pub identity: Option<RteIdentity>,
}

/// One function call of a function range-table entry, with the column
/// definition list of its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTableFunction {
    pub expr: Expr,
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RteKind {
    Relation(RelationEntry),
    Subquery { query: QueryId },
    Join { join_type: JoinType },
    Function { functions: Vec<RangeTableFunction> },
    Values { lists: Vec<Vec<Expr>> },
    Cte { name: String, levels_up: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTableEntry {
    pub kind: RteKind,
    pub alias: String,
    pub column_names: Vec<String>,
    pub in_from_clause: bool,
}

impl RangeTableEntry {
    pub fn relation(alias: &str, relation_id: RelationId, columns: &[&str]) -> Self {
        RangeTableEntry {
            kind: RteKind::Relation(RelationEntry {
                relation_id,
                relkind: RelKind::Table,
                inherit: true,
                identity: None,
            }),
            alias: alias.to_string(),
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            in_from_clause: true,
        }
    }

    pub fn subquery(alias: &str, query: QueryId, columns: &[&str]) -> Self {
        RangeTableEntry {
            kind: RteKind::Subquery { query },
            alias: alias.to_string(),
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            in_from_clause: true,
        }
    }

    pub fn cte_reference(name: &str, levels_up: u32, columns: &[&str]) -> Self {
        RangeTableEntry {
            kind: RteKind::Cte {
                name: name.to_string(),
                levels_up,
            },
            alias: name.to_string(),
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            in_from_clause: true,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationEntry> {
        match &self.kind {
            RteKind::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn as_relation_mut(&mut self) -> Option<&mut RelationEntry> {
        match &mut self.kind {
            RteKind::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn subquery_id(&self) -> Option<QueryId> {
        match &self.kind {
            RteKind::Subquery { query } => Some(*query),
            _ => None,
        }
    }

    /// Expressions owned by the entry itself (function calls, VALUES rows).
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            RteKind::Function { functions } => functions.iter().map(|f| &f.expr).collect(),
            RteKind::Values { lists } => lists.iter().flatten().collect(),
            RteKind::Relation(_)
            | RteKind::Subquery { .. }
            | RteKind::Join { .. }
            | RteKind::Cte { .. } => Vec::new(),
        }
    }

    fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.kind {
            RteKind::Function { functions } => {
                for func in functions {
                    f(&mut func.expr);
                }
            }
            RteKind::Values { lists } => {
                for expr in lists.iter_mut().flatten() {
                    f(expr);
                }
            }
            RteKind::Relation(_)
            | RteKind::Subquery { .. }
            | RteKind::Join { .. }
            | RteKind::Cte { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Semi => "SEMI JOIN",
            JoinType::Anti => "ANTI JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinExpr {
    pub join_type: JoinType,
    pub left: JoinTreeNode,
    pub right: JoinTreeNode,
    pub quals: Option<Expr>,
    /// Range-table index of the matching join entry, if any.
    pub rt_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinTreeNode {
    RangeTableRef(usize),
    Join(Box<JoinExpr>),
}

impl JoinTreeNode {
    pub fn join(join_type: JoinType, left: JoinTreeNode, right: JoinTreeNode, quals: Option<Expr>) -> Self {
        JoinTreeNode::Join(Box::new(JoinExpr {
            join_type,
            left,
            right,
            quals,
            rt_index: None,
        }))
    }

    /// Range-table indexes of the leaves below this node, left to right.
    pub fn range_table_refs(&self) -> Vec<usize> {
        match self {
            JoinTreeNode::RangeTableRef(index) => vec![*index],
            JoinTreeNode::Join(join) => {
                let mut refs = join.left.range_table_refs();
                refs.extend(join.right.range_table_refs());
                refs
            }
        }
    }

    fn collect_quals<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        if let JoinTreeNode::Join(join) = self {
            join.left.collect_quals(out);
            join.right.collect_quals(out);
            if let Some(quals) = &join.quals {
                out.push(quals);
            }
        }
    }

    fn for_each_qual_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        if let JoinTreeNode::Join(join) = self {
            join.left.for_each_qual_mut(f);
            join.right.for_each_qual_mut(f);
            if let Some(quals) = &mut join.quals {
                f(quals);
            }
        }
    }
}

/// The FROM list and WHERE clause of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromExpr {
    pub items: Vec<JoinTreeNode>,
    pub quals: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperation {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetOperationTree {
    /// A branch, stored as a subquery entry of the owning query.
    Leaf { rt_index: usize },
    Operation {
        op: SetOperation,
        all: bool,
        left: Box<SetOperationTree>,
        right: Box<SetOperationTree>,
    },
}

impl SetOperationTree {
    pub fn operation(op: SetOperation, all: bool, left: SetOperationTree, right: SetOperationTree) -> Self {
        SetOperationTree::Operation {
            op,
            all,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The operator at the root, if the root is not a bare leaf.
    pub fn root_operation(&self) -> Option<SetOperation> {
        match self {
            SetOperationTree::Leaf { .. } => None,
            SetOperationTree::Operation { op, .. } => Some(*op),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub expr: Expr,
    /// 1-based output position.
    pub resno: u32,
    pub name: Option<String>,
    /// Helper column (sort key, row marker) not returned to the client.
    pub resjunk: bool,
}

impl TargetEntry {
    pub fn new(expr: Expr, resno: u32, name: &str) -> Self {
        TargetEntry {
            expr,
            resno,
            name: Some(name.to_string()),
            resjunk: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonTableExpr {
    pub name: String,
    pub query: QueryId,
}

/// One SELECT/INSERT/UPDATE/DELETE statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub command: CommandType,
    pub range_table: Vec<RangeTableEntry>,
    pub join_tree: FromExpr,
    pub target_list: Vec<TargetEntry>,
    /// Target relation of INSERT/UPDATE/DELETE.
    pub result_relation: Option<usize>,
    pub set_operations: Option<SetOperationTree>,
    pub cte_list: Vec<CommonTableExpr>,
    pub has_modifying_cte: bool,
    pub has_recursive: bool,
    pub has_aggregates: bool,
    pub has_window_functions: bool,
    pub has_distinct: bool,
    pub having_qual: Option<Expr>,
    pub limit_offset: Option<Expr>,
    pub limit_count: Option<Expr>,
    pub returning_list: Vec<TargetEntry>,
}

impl Query {
    pub fn new(command: CommandType) -> Self {
        Query {
            command,
            range_table: Vec::new(),
            join_tree: FromExpr::default(),
            target_list: Vec::new(),
            result_relation: None,
            set_operations: None,
            cte_list: Vec::new(),
            has_modifying_cte: false,
            has_recursive: false,
            has_aggregates: false,
            has_window_functions: false,
            has_distinct: false,
            having_qual: None,
            limit_offset: None,
            limit_count: None,
            returning_list: Vec::new(),
        }
    }

    pub fn select() -> Self {
        Query::new(CommandType::Select)
    }

    /// Append an entry and return its 1-based index.
    pub fn add_range_table_entry(&mut self, rte: RangeTableEntry) -> usize {
        self.range_table.push(rte);
        self.range_table.len()
    }

    pub fn rte(&self, rt_index: usize) -> Option<&RangeTableEntry> {
        rt_index
            .checked_sub(1)
            .and_then(|i| self.range_table.get(i))
    }

    pub fn rte_mut(&mut self, rt_index: usize) -> Option<&mut RangeTableEntry> {
        rt_index
            .checked_sub(1)
            .and_then(|i| self.range_table.get_mut(i))
    }

    /// Non-junk target entries, in output order.
    pub fn visible_targets(&self) -> impl Iterator<Item = &TargetEntry> {
        self.target_list.iter().filter(|te| !te.resjunk)
    }

    /// Whether any range-table entry is a subquery.
    pub fn has_subquery_entries(&self) -> bool {
        self.range_table
            .iter()
            .any(|rte| matches!(rte.kind, RteKind::Subquery { .. }))
    }

    /// Expressions in the query's own clauses, excluding range-table
    /// entries: target list, join quals, WHERE, HAVING, LIMIT/OFFSET,
    /// RETURNING.
    pub fn clause_expressions(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = self.target_list.iter().map(|te| &te.expr).collect();
        for item in &self.join_tree.items {
            item.collect_quals(&mut out);
        }
        out.extend(self.join_tree.quals.iter());
        out.extend(self.having_qual.iter());
        out.extend(self.limit_offset.iter());
        out.extend(self.limit_count.iter());
        out.extend(self.returning_list.iter().map(|te| &te.expr));
        out
    }

    /// Every expression owned by this query: clause expressions followed by
    /// range-table expressions.
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut out = self.clause_expressions();
        for rte in &self.range_table {
            out.extend(rte.expressions());
        }
        out
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for te in &mut self.target_list {
            f(&mut te.expr);
        }
        for item in &mut self.join_tree.items {
            item.for_each_qual_mut(f);
        }
        for expr in self
            .join_tree
            .quals
            .iter_mut()
            .chain(self.having_qual.iter_mut())
            .chain(self.limit_offset.iter_mut())
            .chain(self.limit_count.iter_mut())
        {
            f(expr);
        }
        for te in &mut self.returning_list {
            f(&mut te.expr);
        }
        for rte in &mut self.range_table {
            rte.for_each_expr_mut(f);
        }
    }

    /// Rewrite every reference to another query node.
    fn remap_query_ids(&mut self, map: &dyn Fn(QueryId) -> QueryId) {
        for rte in &mut self.range_table {
            if let RteKind::Subquery { query } = &mut rte.kind {
                *query = map(*query);
            }
        }
        for cte in &mut self.cte_list {
            cte.query = map(cte.query);
        }
        self.for_each_expr_mut(&mut |expr| {
            expr.walk_mut(&mut |node| {
                if let Expr::SubLink { subquery, .. } = node {
                    *subquery = map(*subquery);
                }
            })
        });
    }
}

/// Arena holding a statement and all of its nested queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTree {
    nodes: Vec<Query>,
    root: QueryId,
}

impl QueryTree {
    pub fn new(root: Query) -> Self {
        QueryTree {
            nodes: vec![root],
            root: QueryId(0),
        }
    }

    pub fn root(&self) -> QueryId {
        self.root
    }

    pub fn root_query(&self) -> &Query {
        self.query(self.root)
    }

    pub fn root_query_mut(&mut self) -> &mut Query {
        let root = self.root;
        self.query_mut(root)
    }

    /// Ids are only handed out by this arena, so indexing cannot miss.
    pub fn query(&self, id: QueryId) -> &Query {
        &self.nodes[id.0]
    }

    pub fn query_mut(&mut self, id: QueryId) -> &mut Query {
        &mut self.nodes[id.0]
    }

    /// Add a detached node and return its id.
    pub fn add(&mut self, query: Query) -> QueryId {
        self.nodes.push(query);
        QueryId(self.nodes.len() - 1)
    }

    /// Overwrite a node in place; every reference to `id` now sees `query`.
    pub fn replace(&mut self, id: QueryId, query: Query) -> Query {
        std::mem::replace(&mut self.nodes[id.0], query)
    }

    /// Number of arena slots, including detached nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy the query at `id` and everything reachable from it into a fresh
    /// tree rooted at that copy.
    pub fn extract(&self, id: QueryId) -> QueryTree {
        let order = walker::reachable_queries(self, id);
        let remap: HashMap<QueryId, QueryId> = order
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, QueryId(new)))
            .collect();
        let nodes = order
            .iter()
            .map(|old| {
                let mut query = self.query(*old).clone();
                query.remap_query_ids(&|qid| remap.get(&qid).copied().unwrap_or(qid));
                query
            })
            .collect();
        QueryTree {
            nodes,
            root: QueryId(0),
        }
    }
}
