//! Schema types

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Category of a single observed JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueCategory {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Object,
    Array,
}

impl ValueCategory {
    /// Categorize a JSON value
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ValueCategory::Null,
            serde_json::Value::Bool(_) => ValueCategory::Boolean,
            serde_json::Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ValueCategory::Integer
                } else {
                    ValueCategory::Float
                }
            }
            serde_json::Value::String(_) => ValueCategory::String,
            serde_json::Value::Object(_) => ValueCategory::Object,
            serde_json::Value::Array(_) => ValueCategory::Array,
        }
    }

    /// Check if this category is numeric
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueCategory::Integer | ValueCategory::Float)
    }

    /// Unify two non-null categories, returning None on conflict
    pub fn unify(self, other: ValueCategory) -> Option<ValueCategory> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ValueCategory::Null, other) | (other, ValueCategory::Null) => Some(other),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(ValueCategory::Float),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueCategory::Null => write!(f, "NULL"),
            ValueCategory::Boolean => write!(f, "BOOLEAN"),
            ValueCategory::Integer => write!(f, "INTEGER"),
            ValueCategory::Float => write!(f, "FLOAT"),
            ValueCategory::String => write!(f, "STRING"),
            ValueCategory::Object => write!(f, "OBJECT"),
            ValueCategory::Array => write!(f, "ARRAY"),
        }
    }
}

/// What to do when a field shows conflicting value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Mark the field unresolved
    #[default]
    Strict,
    /// Widen the field to a semi-structured type
    Widen,
}

impl ConflictPolicy {
    /// Policy matching the `allow_varying_value_types` flag
    pub fn from_allow_varying(allow: bool) -> Self {
        if allow {
            ConflictPolicy::Widen
        } else {
            ConflictPolicy::Strict
        }
    }
}

/// Inferred type decision for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "types", rename_all = "snake_case")]
pub enum TypeDecision {
    /// A single category (INTEGER and FLOAT unified to FLOAT)
    Resolved(ValueCategory),
    /// Conflicting categories under the strict policy
    Unresolved(BTreeSet<ValueCategory>),
    /// Conflicting categories widened to a semi-structured type
    Widened,
}

impl std::fmt::Display for TypeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDecision::Resolved(category) => write!(f, "{category}"),
            TypeDecision::Unresolved(categories) => {
                let names: Vec<String> = categories.iter().map(ToString::to_string).collect();
                write!(f, "UNRESOLVED({})", names.join(", "))
            }
            TypeDecision::Widened => write!(f, "VARIANT"),
        }
    }
}

/// Column type of a destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    String,
    Object,
    Array,
    /// Semi-structured value of any shape
    Variant,
    /// Warehouse-specific type text, passed through as-is
    Custom(String),
}

impl ColumnType {
    /// Column type for a resolved category
    pub fn from_category(category: ValueCategory) -> Option<Self> {
        match category {
            ValueCategory::Null => None,
            ValueCategory::Boolean => Some(ColumnType::Boolean),
            ValueCategory::Integer => Some(ColumnType::Integer),
            ValueCategory::Float => Some(ColumnType::Float),
            ValueCategory::String => Some(ColumnType::String),
            ValueCategory::Object => Some(ColumnType::Object),
            ValueCategory::Array => Some(ColumnType::Array),
        }
    }

    /// Parse a declared type name; unknown names are kept as custom types
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "INTEGER" | "INT" | "BIGINT" | "NUMBER" => ColumnType::Integer,
            "FLOAT" | "DOUBLE" | "REAL" => ColumnType::Float,
            "STRING" | "VARCHAR" | "TEXT" => ColumnType::String,
            "OBJECT" => ColumnType::Object,
            "ARRAY" => ColumnType::Array,
            "VARIANT" | "JSON" => ColumnType::Variant,
            _ => ColumnType::Custom(name.trim().to_string()),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::String => write!(f, "STRING"),
            ColumnType::Object => write!(f, "OBJECT"),
            ColumnType::Array => write!(f, "ARRAY"),
            ColumnType::Variant => write!(f, "VARIANT"),
            ColumnType::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ColumnType::parse(&name))
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column (and record field) name
    pub name: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    /// Create a column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column set of a destination table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Create a schema from columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Columns in order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if a column exists
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl<'de> Deserialize<'de> for TableSchema {
    /// Deserializes from a `name: TYPE` mapping, keeping document order
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ColumnsVisitor;

        impl<'de> serde::de::Visitor<'de> for ColumnsVisitor {
            type Value = TableSchema;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a mapping of column names to column types")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<TableSchema, A::Error> {
                let mut columns: Vec<Column> = Vec::new();
                while let Some((name, column_type)) = map.next_entry::<String, ColumnType>()? {
                    if columns.iter().any(|c| c.name == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate column '{name}'"
                        )));
                    }
                    columns.push(Column::new(name, column_type));
                }
                Ok(TableSchema { columns })
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}
