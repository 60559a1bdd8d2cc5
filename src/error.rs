//! Error types for pg_shardplan.
//!
//! Planning failures come in two flavours:
//!
//! - **Hard errors** ([`PlannerError`]) abort the planning attempt as soon as
//!   they are detected. They are propagated via `Result<T, PlannerError>` and
//!   converted to a PostgreSQL `ERROR` at the extension boundary.
//! - **Deferred errors** ([`DeferredError`]) are stored inside the
//!   distributed plan descriptor instead of being raised. The failure may be
//!   caused by prepared-statement parameters that are not bound yet, so the
//!   planner hands back a plan that raises the error at execution time and
//!   lets the host re-plan with concrete values.
//!
//! # Error Classification
//!
//! - **Feature**: the query uses something distributed planning does not
//!   support. Never retried.
//! - **User**: the query is supported, but not in the current session setup.
//! - **Internal**: bugs. Should not happen.

use std::fmt;

use serde::{Deserialize, Serialize};

/// PostgreSQL SQLSTATE codes raised by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlState {
    /// `0A000`
    FeatureNotSupported,
    /// `22023`
    InvalidParameterValue,
    /// `XX000`
    InternalError,
}

impl SqlState {
    /// The five-character SQLSTATE code.
    pub fn code(&self) -> &'static str {
        match self {
            SqlState::FeatureNotSupported => "0A000",
            SqlState::InvalidParameterValue => "22023",
            SqlState::InternalError => "XX000",
        }
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error recorded in a plan instead of being raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredError {
    pub code: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl DeferredError {
    pub fn new(code: SqlState, message: impl Into<String>) -> Self {
        DeferredError {
            code,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// The error stored when none of the plan builders produced a plan.
    pub fn could_not_create_plan() -> Self {
        DeferredError::new(
            SqlState::FeatureNotSupported,
            "could not create distributed plan",
        )
        .with_detail(
            "Possibly this is caused by the use of parameters in SQL functions, \
             which is not supported in Citus.",
        )
        .with_hint("Consider using PL/pgSQL functions instead.")
    }
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Primary error type for the planner.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    // ── Feature errors: the query shape is not supported ────────────────
    /// A statement references both local and distributed relations.
    #[error("cannot plan queries which join local and distributed relations")]
    MixedLocalAndDistributed,

    /// INSERT ... SELECT from distributed tables into a local table.
    #[error("cannot INSERT rows from a distributed query into a local table")]
    InsertIntoLocalTable,

    /// A CTE contains INSERT/UPDATE/DELETE.
    #[error("data-modifying statements are not supported in the WITH clauses of distributed queries")]
    ModifyingCte,

    /// `WITH RECURSIVE`.
    #[error("recursive CTEs are not supported in distributed queries")]
    RecursiveCte,

    /// A CTE body references a column of an enclosing query.
    #[error("CTEs that refer to other subqueries are not supported in multi-shard queries")]
    CorrelatedCte,

    /// The distributed need only became visible after the host planner
    /// inlined a SQL function.
    #[error(
        "cannot perform distributed planning on this query because parameterized queries \
         for SQL functions referencing distributed tables are not supported"
    )]
    ParameterizedSqlFunction,

    /// A deferred error that turned out not to be caused by unbound parameters.
    #[error("{0}")]
    Deferred(DeferredError),

    // ── User errors: depend on session settings ─────────────────────────
    /// Materialization needs the router executor, which is turned off.
    /// The payload names what was being materialized.
    #[error("cannot handle {0} when the router executor is disabled")]
    RouterExecutorDisabled(&'static str),

    /// A collaborator (host planner, plan builder) failed.
    #[error("{0}")]
    Collaborator(String),

    // ── Internal errors: should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerErrorKind {
    Feature,
    User,
    Internal,
}

impl fmt::Display for PlannerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerErrorKind::Feature => write!(f, "FEATURE"),
            PlannerErrorKind::User => write!(f, "USER"),
            PlannerErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl PlannerError {
    /// Classify the error.
    pub fn kind(&self) -> PlannerErrorKind {
        match self {
            PlannerError::MixedLocalAndDistributed
            | PlannerError::InsertIntoLocalTable
            | PlannerError::ModifyingCte
            | PlannerError::RecursiveCte
            | PlannerError::CorrelatedCte
            | PlannerError::ParameterizedSqlFunction
            | PlannerError::Deferred(_) => PlannerErrorKind::Feature,

            PlannerError::RouterExecutorDisabled(_) | PlannerError::Collaborator(_) => {
                PlannerErrorKind::User
            }

            PlannerError::InternalError(_) => PlannerErrorKind::Internal,
        }
    }

    pub fn sqlstate(&self) -> SqlState {
        match self {
            PlannerError::Deferred(err) => err.code,
            PlannerError::InternalError(_) => SqlState::InternalError,
            PlannerError::RouterExecutorDisabled(_) => SqlState::InvalidParameterValue,
            PlannerError::Collaborator(_) => SqlState::InternalError,
            _ => SqlState::FeatureNotSupported,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            PlannerError::Deferred(err) => err.detail.as_deref(),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            PlannerError::Deferred(err) => err.hint.as_deref(),
            PlannerError::ParameterizedSqlFunction => {
                Some("Consider using PL/pgSQL functions instead.")
            }
            _ => None,
        }
    }

    /// Raise this error as a PostgreSQL `ERROR`. Does not return.
    #[cfg(feature = "pg18")]
    pub fn report(self) -> ! {
        use pgrx::pg_sys::panic::ErrorReport;
        use pgrx::prelude::{PgLogLevel, PgSqlErrorCode};

        let code = match self.sqlstate() {
            SqlState::FeatureNotSupported => PgSqlErrorCode::ERRCODE_FEATURE_NOT_SUPPORTED,
            SqlState::InvalidParameterValue => PgSqlErrorCode::ERRCODE_INVALID_PARAMETER_VALUE,
            SqlState::InternalError => PgSqlErrorCode::ERRCODE_INTERNAL_ERROR,
        };
        let mut report = ErrorReport::new(code, self.to_string(), "distributed_planner");
        if let Some(detail) = self.detail() {
            report = report.set_detail(detail);
        }
        if let Some(hint) = self.hint() {
            report = report.set_hint(hint);
        }
        report.report(PgLogLevel::ERROR);
        unreachable!("ERROR-level reports do not return")
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(err: serde_json::Error) -> Self {
        PlannerError::InternalError(format!("plan serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            PlannerError::MixedLocalAndDistributed.kind(),
            PlannerErrorKind::Feature
        );
        assert_eq!(PlannerError::RecursiveCte.kind(), PlannerErrorKind::Feature);
        assert_eq!(
            PlannerError::RouterExecutorDisabled("CTEs").kind(),
            PlannerErrorKind::User
        );
        assert_eq!(
            PlannerError::InternalError("x".into()).kind(),
            PlannerErrorKind::Internal
        );
    }

    #[test]
    fn test_sqlstate_codes() {
        assert_eq!(PlannerError::RecursiveCte.sqlstate().code(), "0A000");
        assert_eq!(PlannerError::ModifyingCte.sqlstate().code(), "0A000");
        assert_eq!(
            PlannerError::InternalError("x".into()).sqlstate().code(),
            "XX000"
        );
        let deferred = DeferredError::new(SqlState::InvalidParameterValue, "bad");
        assert_eq!(
            PlannerError::Deferred(deferred).sqlstate(),
            SqlState::InvalidParameterValue
        );
    }

    #[test]
    fn test_router_disabled_message() {
        assert_eq!(
            PlannerError::RouterExecutorDisabled("CTEs").to_string(),
            "cannot handle CTEs when the router executor is disabled"
        );
        assert_eq!(
            PlannerError::RouterExecutorDisabled("complex subqueries").to_string(),
            "cannot handle complex subqueries when the router executor is disabled"
        );
    }

    #[test]
    fn test_deferred_error_carries_detail_and_hint() {
        let err = PlannerError::Deferred(DeferredError::could_not_create_plan());
        assert_eq!(err.to_string(), "could not create distributed plan");
        assert!(err.detail().unwrap().starts_with("Possibly this is caused"));
        assert_eq!(err.hint(), Some("Consider using PL/pgSQL functions instead."));
    }

    #[test]
    fn test_sql_function_error_has_hint() {
        let err = PlannerError::ParameterizedSqlFunction;
        assert!(err.to_string().contains("parameterized queries for SQL functions"));
        assert_eq!(err.hint(), Some("Consider using PL/pgSQL functions instead."));
        assert_eq!(err.detail(), None);
    }
}
