//! Scalar expressions.
//!
//! Only the node kinds the distributed planner has to reason about are
//! modelled precisely: column references with their nesting depth, the
//! constructs that pin a subquery to its enclosing query (placeholders,
//! `CURRENT OF`), parameters, function calls and sublinks. Everything else
//! is an operator or boolean node with typed arguments.

use serde::{Deserialize, Serialize};

use super::QueryId;

pub type Oid = u32;

pub const INVALID_OID: Oid = 0;
pub const BOOLOID: Oid = 16;
pub const INT8OID: Oid = 20;
pub const INT4OID: Oid = 23;
pub const TEXTOID: Oid = 25;
pub const DEFAULT_COLLATION_OID: Oid = 100;

/// Type, type modifier and collation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Oid,
}

impl ColumnType {
    pub fn new(type_oid: Oid) -> Self {
        ColumnType {
            type_oid,
            typmod: -1,
            collation: INVALID_OID,
        }
    }

    pub fn int4() -> Self {
        ColumnType::new(INT4OID)
    }

    pub fn int8() -> Self {
        ColumnType::new(INT8OID)
    }

    pub fn boolean() -> Self {
        ColumnType::new(BOOLOID)
    }

    pub fn text() -> Self {
        ColumnType {
            type_oid: TEXTOID,
            typmod: -1,
            collation: DEFAULT_COLLATION_OID,
        }
    }
}

/// A function known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub Oid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// `$n` supplied by the client (prepared statements, SQL functions).
    Extern,
    /// Set by the executor at run time.
    Exec,
    /// Output of an initplan sublink.
    Sublink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLinkKind {
    Exists,
    Any,
    All,
    Expr,
    Array,
}

/// A column reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Var {
    /// 1-based range-table index in the query `levels_up` levels above.
    pub rt_index: usize,
    /// 1-based column number.
    pub attno: i32,
    pub column_type: ColumnType,
    /// 0 for the query the expression belongs to, 1 for its parent, ...
    pub levels_up: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Var(Var),
    Const {
        column_type: ColumnType,
        value: Option<String>,
    },
    Param {
        kind: ParamKind,
        /// 1-based for external parameters.
        id: i32,
        type_oid: Oid,
    },
    PlaceHolderVar {
        expr: Box<Expr>,
        levels_up: u32,
    },
    /// `WHERE CURRENT OF cursor`.
    CurrentOf {
        cursor_name: String,
    },
    Func {
        func_id: FunctionId,
        name: String,
        args: Vec<Expr>,
        result_type: ColumnType,
        returns_set: bool,
    },
    Op {
        name: String,
        args: Vec<Expr>,
        result_type: ColumnType,
    },
    Bool {
        op: BoolOp,
        args: Vec<Expr>,
    },
    SubLink {
        kind: SubLinkKind,
        test_expr: Option<Box<Expr>>,
        subquery: QueryId,
        result_type: ColumnType,
    },
}

impl Expr {
    pub fn var(rt_index: usize, attno: i32, column_type: ColumnType) -> Self {
        Expr::Var(Var {
            rt_index,
            attno,
            column_type,
            levels_up: 0,
        })
    }

    pub fn text_const(value: &str) -> Self {
        Expr::Const {
            column_type: ColumnType::text(),
            value: Some(value.to_string()),
        }
    }

    pub fn int_const(value: i64) -> Self {
        Expr::Const {
            column_type: ColumnType::int8(),
            value: Some(value.to_string()),
        }
    }

    /// `left = right` over two expressions.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Op {
            name: "=".to_string(),
            args: vec![left, right],
            result_type: ColumnType::boolean(),
        }
    }

    /// Type of the value this expression produces.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Expr::Var(var) => var.column_type,
            Expr::Const { column_type, .. } => *column_type,
            Expr::Param { type_oid, .. } => ColumnType::new(*type_oid),
            Expr::PlaceHolderVar { expr, .. } => expr.column_type(),
            Expr::CurrentOf { .. } | Expr::Bool { .. } => ColumnType::boolean(),
            Expr::Func { result_type, .. }
            | Expr::Op { result_type, .. }
            | Expr::SubLink { result_type, .. } => *result_type,
        }
    }

    /// Direct child expressions. A sublink's subquery is not an expression
    /// child; only its test expression is.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::PlaceHolderVar { expr, .. } => vec![expr.as_ref()],
            Expr::Func { args, .. } | Expr::Op { args, .. } | Expr::Bool { args, .. } => {
                args.iter().collect()
            }
            Expr::SubLink {
                test_expr: Some(test),
                ..
            } => vec![test.as_ref()],
            Expr::Var(_)
            | Expr::Const { .. }
            | Expr::Param { .. }
            | Expr::CurrentOf { .. }
            | Expr::SubLink { .. } => Vec::new(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::PlaceHolderVar { expr, .. } => vec![expr.as_mut()],
            Expr::Func { args, .. } | Expr::Op { args, .. } | Expr::Bool { args, .. } => {
                args.iter_mut().collect()
            }
            Expr::SubLink {
                test_expr: Some(test),
                ..
            } => vec![test.as_mut()],
            Expr::Var(_)
            | Expr::Const { .. }
            | Expr::Param { .. }
            | Expr::CurrentOf { .. }
            | Expr::SubLink { .. } => Vec::new(),
        }
    }

    /// Pre-order walk over this expression and its children.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        for child in self.children_mut() {
            child.walk_mut(f);
        }
    }

    /// Whether any node of this expression satisfies `pred`.
    pub fn any(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        for child in self.children() {
            if child.any(pred) {
                return true;
            }
        }
        false
    }

    /// Subqueries of the sublinks inside this expression, in walk order.
    pub fn sublink_queries(&self) -> Vec<QueryId> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::SubLink { subquery, .. } = e {
                out.push(*subquery);
            }
        });
        out
    }
}
