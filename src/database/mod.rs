//! Warehouse support via DuckDB
//!
//! This module defines the warehouse boundary used to create destination
//! tables, load staged files into them and clear the stage afterwards.
//! DuckDB reads newline-delimited JSON directly from local or cloud stages.

mod engine;
mod warehouse;

pub use engine::{column_sql_type, DuckdbWarehouse, QualifiedName, MAX_FILES_PER_LOAD};
pub use warehouse::Warehouse;
