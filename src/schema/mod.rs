//! Schema inference module
//!
//! Discovers destination columns incrementally from the records routed to them.
//!
//! # Features
//!
//! - **Type Categories**: Every value falls in a closed set of categories
//! - **Numeric Unification**: Integer and float values widen to float
//! - **Conflict Policy**: Conflicting fields are either unresolved or widened
//! - **Predefined Columns**: Authoritative column sets skip inference entirely

mod inference;
mod tracker;
mod types;

pub use inference::{materialize, ColumnTypeInferer};
pub use tracker::SchemaTracker;
pub use types::{
    Column, ColumnType, ConflictPolicy, TableSchema, TypeDecision, ValueCategory,
};
