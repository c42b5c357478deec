//! Path templates
//!
//! Handles `{{ variable }}` interpolation in destination and stage paths.
//! Supports nested access like `{{ item.category }}` or `{{ item.tags.0 }}`
//! and fallbacks like `{{ item.kind | default("misc") }}`.

use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use regex::Regex;
use std::sync::LazyLock;

/// Regex for matching placeholders: {{ variable.path }} or {{ variable.path | default("x") }}
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_]+)*)\s*(?:\|\s*default\(\s*(?:"([^"]*)"|'([^']*)')\s*\)\s*)?\}\}"#,
    )
    .unwrap()
});

/// Source of root variables for template resolution
pub trait Variables {
    /// Look up a top-level variable by name
    fn lookup(&self, name: &str) -> Option<&JsonValue>;
}

impl Variables for JsonObject {
    fn lookup(&self, name: &str) -> Option<&JsonValue> {
        self.get(name)
    }
}

/// Variables visible while routing a record: the record itself as `item`,
/// plus the extra variables passed along with it.
#[derive(Debug, Clone, Copy)]
pub struct RecordVariables<'a> {
    item: &'a JsonValue,
    extra: &'a JsonObject,
}

impl<'a> RecordVariables<'a> {
    /// Create record variables
    pub fn new(item: &'a JsonValue, extra: &'a JsonObject) -> Self {
        Self { item, extra }
    }
}

impl Variables for RecordVariables<'_> {
    fn lookup(&self, name: &str) -> Option<&JsonValue> {
        if name == "item" {
            Some(self.item)
        } else {
            self.extra.get(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Placeholder {
        name: String,
        path: Vec<String>,
        default: Option<String>,
    },
}

/// A parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    parts: Vec<Part>,
}

impl PathTemplate {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut last = 0;

        for cap in PLACEHOLDER_REGEX.captures_iter(source) {
            let whole = cap.get(0).unwrap();
            if whole.start() > last {
                parts.push(Part::Literal(source[last..whole.start()].to_string()));
            }

            let name = cap.get(1).unwrap().as_str();
            let default = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string());

            parts.push(Part::Placeholder {
                name: name.to_string(),
                path: name.split('.').map(str::to_string).collect(),
                default,
            });
            last = whole.end();
        }

        if last < source.len() {
            parts.push(Part::Literal(source[last..].to_string()));
        }

        for part in &parts {
            if let Part::Literal(text) = part {
                if text.contains("{{") || text.contains("}}") {
                    return Err(Error::template(format!(
                        "malformed placeholder in '{source}'"
                    )));
                }
            }
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Resolve the template against a set of variables
    pub fn resolve<V: Variables + ?Sized>(&self, vars: &V) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());

        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder {
                    name,
                    path,
                    default,
                } => match lookup_path(vars, path) {
                    Some(value) => out.push_str(&value_to_string(value)),
                    None => match default {
                        Some(fallback) => out.push_str(fallback),
                        None => return Err(Error::unresolved(name, &self.source)),
                    },
                },
            }
        }

        Ok(out)
    }

    /// Names of all placeholders, in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Placeholder { name, .. } => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    /// Check if the template has no placeholders
    pub fn is_static(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Original template text
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and resolve a template in one step
pub fn render<V: Variables + ?Sized>(template: &str, vars: &V) -> Result<String> {
    PathTemplate::parse(template)?.resolve(vars)
}

/// Walk a dotted path from a root variable into nested mappings and sequences
fn lookup_path<'a, V: Variables + ?Sized>(vars: &'a V, path: &[String]) -> Option<&'a JsonValue> {
    let (root, rest) = path.split_first()?;
    let mut current = vars.lookup(root)?;
    for part in rest {
        current = match current {
            JsonValue::Object(map) => map.get(part)?,
            JsonValue::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convert a JSON value to a string for template substitution
fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        // For complex types, use JSON serialization
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
