//! Per-destination schema tracking
//!
//! A destination either infers its columns from the records it receives or
//! uses a predefined column set, in which case no inference happens at all.

use super::inference::{materialize, ColumnTypeInferer};
use super::types::{ColumnType, ConflictPolicy, TableSchema, TypeDecision};
use crate::error::{Error, Result};
use crate::types::JsonObject;

/// Schema source for one destination
#[derive(Debug, Clone)]
pub enum SchemaTracker {
    /// Columns inferred from observed records
    Inferred(ColumnTypeInferer),
    /// Columns supplied up front
    Predefined {
        /// Authoritative columns
        schema: TableSchema,
        /// Whether fields outside the columns are ignored
        ignore_unexpected: bool,
        /// Fields seen outside the columns, in first-seen order
        unexpected: Vec<String>,
    },
}

impl SchemaTracker {
    /// Create an inferring tracker
    pub fn inferred(policy: ConflictPolicy) -> Self {
        SchemaTracker::Inferred(ColumnTypeInferer::new(policy))
    }

    /// Create a tracker backed by predefined columns
    pub fn predefined(schema: TableSchema, ignore_unexpected: bool) -> Self {
        SchemaTracker::Predefined {
            schema,
            ignore_unexpected,
            unexpected: Vec::new(),
        }
    }

    /// Check if the columns are predefined
    pub fn is_predefined(&self) -> bool {
        matches!(self, SchemaTracker::Predefined { .. })
    }

    /// Observe a record
    pub fn observe(&mut self, record: &JsonObject) {
        match self {
            SchemaTracker::Inferred(inferer) => inferer.observe(record),
            SchemaTracker::Predefined {
                schema,
                ignore_unexpected,
                unexpected,
            } => {
                if *ignore_unexpected {
                    return;
                }
                for name in record.keys() {
                    if !schema.contains(name) && !unexpected.contains(name) {
                        unexpected.push(name.clone());
                    }
                }
            }
        }
    }

    /// Inferred decisions, if this tracker infers
    pub fn decisions(&self) -> Option<Vec<(String, TypeDecision)>> {
        match self {
            SchemaTracker::Inferred(inferer) => Some(inferer.snapshot()),
            SchemaTracker::Predefined { .. } => None,
        }
    }

    /// Fields seen outside the predefined columns
    pub fn unexpected_fields(&self) -> &[String] {
        match self {
            SchemaTracker::Inferred(_) => &[],
            SchemaTracker::Predefined { unexpected, .. } => unexpected,
        }
    }

    /// Columns of `schema` whose inferred type no longer matches it
    ///
    /// A column drifts when its field became unresolved or widened, or when
    /// it resolved to another type (an integer column that later saw floats).
    /// Predefined columns never drift.
    pub fn drifted_columns(&self, schema: &TableSchema) -> Vec<String> {
        let SchemaTracker::Inferred(inferer) = self else {
            return Vec::new();
        };

        schema
            .columns()
            .iter()
            .filter(|column| {
                let current = match inferer.decision(&column.name) {
                    Some(TypeDecision::Resolved(category)) => ColumnType::from_category(*category),
                    Some(TypeDecision::Widened) => Some(ColumnType::Variant),
                    Some(TypeDecision::Unresolved(_)) | None => None,
                };
                current.as_ref() != Some(&column.column_type)
            })
            .map(|column| column.name.clone())
            .collect()
    }

    /// Materialize the current table schema
    pub fn materialize(&self, destination: &str, skip_unresolved: bool) -> Result<TableSchema> {
        match self {
            SchemaTracker::Inferred(inferer) => {
                materialize(destination, &inferer.snapshot(), skip_unresolved)
            }
            SchemaTracker::Predefined {
                schema, unexpected, ..
            } => {
                if !unexpected.is_empty() {
                    return Err(Error::UnexpectedFields {
                        destination: destination.to_string(),
                        fields: unexpected.clone(),
                    });
                }
                Ok(schema.clone())
            }
        }
    }
}
