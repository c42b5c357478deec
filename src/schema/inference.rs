//! Incremental column type inference

use super::types::{Column, ColumnType, ConflictPolicy, TableSchema, TypeDecision, ValueCategory};
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error};

/// Running per-field type decisions for one destination
#[derive(Debug, Clone, Default)]
pub struct ColumnTypeInferer {
    /// Conflict policy
    policy: ConflictPolicy,
    /// Field names in first-seen order
    order: Vec<String>,
    /// Current decision per field
    decisions: HashMap<String, TypeDecision>,
    /// Number of records observed
    records: u64,
}

impl ColumnTypeInferer {
    /// Create a new inferer with the given conflict policy
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Conflict policy in use
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Observe every field of a record
    pub fn observe(&mut self, record: &JsonObject) {
        self.records += 1;
        for (name, value) in record {
            self.observe_value(name, value);
        }
    }

    /// Observe a single field value
    pub fn observe_value(&mut self, name: &str, value: &JsonValue) {
        let category = ValueCategory::of(value);
        let policy = self.policy;

        match self.decisions.get_mut(name) {
            Some(decision) => {
                if let Some(next) = next_decision(decision, category, policy) {
                    *decision = next;
                }
            }
            None => {
                self.order.push(name.to_string());
                self.decisions
                    .insert(name.to_string(), TypeDecision::Resolved(category));
            }
        }
    }

    /// Current decision for a field
    pub fn decision(&self, name: &str) -> Option<&TypeDecision> {
        self.decisions.get(name)
    }

    /// All decisions in first-seen field order
    pub fn snapshot(&self) -> Vec<(String, TypeDecision)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.decisions
                    .get(name)
                    .map(|decision| (name.clone(), decision.clone()))
            })
            .collect()
    }

    /// Number of records observed
    pub fn records_observed(&self) -> u64 {
        self.records
    }

    /// Check if no field has been observed
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Compute the decision after observing `category`; None means unchanged
fn next_decision(
    current: &TypeDecision,
    category: ValueCategory,
    policy: ConflictPolicy,
) -> Option<TypeDecision> {
    match current {
        TypeDecision::Widened => None,
        TypeDecision::Resolved(seen) => match seen.unify(category) {
            Some(unified) if unified == *seen => None,
            Some(unified) => Some(TypeDecision::Resolved(unified)),
            None => Some(match policy {
                ConflictPolicy::Strict => {
                    TypeDecision::Unresolved(BTreeSet::from([*seen, category]))
                }
                ConflictPolicy::Widen => TypeDecision::Widened,
            }),
        },
        TypeDecision::Unresolved(seen) => {
            if category == ValueCategory::Null || seen.contains(&category) {
                None
            } else {
                let mut seen = seen.clone();
                seen.insert(category);
                Some(TypeDecision::Unresolved(seen))
            }
        }
    }
}

/// Turn inferred decisions into a table schema
///
/// Null-only fields carry no type evidence and are left out. Unresolved
/// fields are either skipped or reported as a [`Error::SchemaConflict`].
pub fn materialize(
    destination: &str,
    decisions: &[(String, TypeDecision)],
    skip_unresolved: bool,
) -> Result<TableSchema> {
    let mut columns = Vec::with_capacity(decisions.len());
    let mut conflicts = Vec::new();

    for (name, decision) in decisions {
        match decision {
            TypeDecision::Resolved(category) => match ColumnType::from_category(*category) {
                Some(column_type) => columns.push(Column::new(name, column_type)),
                None => debug!(
                    "Destination {destination:?}, field {name:?}: skipping, only null values seen"
                ),
            },
            TypeDecision::Widened => columns.push(Column::new(name, ColumnType::Variant)),
            TypeDecision::Unresolved(_) => {
                if skip_unresolved {
                    error!(
                        "Destination {destination:?}, field {name:?}: skipping. Multiple value types encountered: {decision}"
                    );
                } else {
                    conflicts.push(name.clone());
                }
            }
        }
    }

    if !conflicts.is_empty() {
        return Err(Error::SchemaConflict {
            destination: destination.to_string(),
            columns: conflicts,
        });
    }

    if columns.is_empty() {
        return Err(Error::NoColumns {
            destination: destination.to_string(),
        });
    }

    Ok(TableSchema::new(columns))
}
