//! pg_shardplan: recursive planning of distributed queries for PostgreSQL 18.
//!
//! Queries over hash-, range- and append-distributed tables are split into
//! sub-plans wherever the statement cannot be pushed down to the shards as
//! written. CTEs, subqueries that need a merge step, set operations over
//! non-colocated relations and the non-recurring side of outer joins are
//! planned independently, their results are materialized on the
//! coordinator, and the rewritten statement reads them back while it runs
//! on the workers.
//!
//! The planning core ([`planner::DistributedPlanner`]) is plain Rust over an
//! arena query model ([`query::QueryTree`]). The host planner, the router
//! planner, distribution metadata and the multi-task plan builders are
//! collaborators behind the traits in [`interfaces`].
//!
//! # Safety
//! This extension uses `unsafe` code for PostgreSQL FFI calls via pgrx.
//! All unsafe blocks are documented with `// SAFETY:` comments.

#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "pg18")]
use pgrx::prelude::*;

#[cfg(feature = "pg18")]
mod api;
pub mod classifier;
pub mod config;
pub mod elog;
pub mod error;
pub mod finalize;
pub mod identity;
pub mod interfaces;
pub mod plan;
pub mod planner;
pub mod pullpush;
pub mod query;
pub mod restriction;
pub mod serialization_check;

#[cfg(feature = "pg18")]
::pgrx::pg_module_magic!();

// Declare the `pg_shardplan` schema so pgrx's SQL entity graph recognises it
// for `#[pg_extern(schema = "pg_shardplan")]` annotations.
#[cfg(feature = "pg18")]
#[pg_schema]
mod pg_shardplan {}

/// Extension initialization, called when the shared library is loaded.
///
/// Registers the GUC variables and routes `tracing` events to the server
/// log.
#[cfg(feature = "pg18")]
#[allow(non_snake_case)]
#[pg_guard]
pub extern "C-unwind" fn _PG_init() {
    config::register_gucs();
    elog::init();

    log!("pg_shardplan: initialized");
}
