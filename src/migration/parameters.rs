//! Module parameters: declared in the manifest, supplied by the caller,
//! substituted into changeset SQL.
//!
//! Placeholders are written `{NAME}`; `{{` and `}}` produce literal braces.
//! Values are rendered as SQL: text as a quoted literal, identifiers as a
//! quoted identifier, integers and booleans verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    Text,
    Integer,
    Boolean,
    /// Text rendered as a quoted SQL identifier
    Identifier,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::Text => "text",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Identifier => "identifier",
        };
        f.write_str(name)
    }
}

/// Tagged parameter value
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Boolean(b) => write!(f, "{b}"),
            ParameterValue::Integer(i) => write!(f, "{i}"),
            ParameterValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Boolean(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

impl ParameterValue {
    /// Convert to the declared type, accepting textual forms of integers and booleans
    pub fn coerce(&self, kind: ParameterType) -> Option<ParameterValue> {
        match (kind, self) {
            (ParameterType::Integer, ParameterValue::Integer(_))
            | (ParameterType::Boolean, ParameterValue::Boolean(_))
            | (ParameterType::Text, ParameterValue::Text(_)) => Some(self.clone()),
            (ParameterType::Identifier, ParameterValue::Text(s)) if !s.is_empty() => {
                Some(self.clone())
            }
            (ParameterType::Integer, ParameterValue::Text(s)) => {
                s.trim().parse().ok().map(ParameterValue::Integer)
            }
            (ParameterType::Boolean, ParameterValue::Text(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "on" | "1" => Some(ParameterValue::Boolean(true)),
                    "false" | "f" | "no" | "off" | "0" => Some(ParameterValue::Boolean(false)),
                    _ => None,
                }
            }
            (ParameterType::Text, other) => Some(ParameterValue::Text(other.to_string())),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::Boolean(b) => serde_json::Value::Bool(*b),
            ParameterValue::Integer(i) => serde_json::Value::from(*i),
            ParameterValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(ParameterValue::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(ParameterValue::Integer),
            serde_json::Value::String(s) => Some(ParameterValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// A parameter declared by the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterType,
    /// `None` makes the parameter required
    pub default: Option<ParameterValue>,
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<ParameterValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("required parameter '{name}' was not supplied")]
    Missing { name: String },
    #[error("parameter '{name}' is not declared by the module")]
    Unknown { name: String },
    #[error("parameter '{name}' expects a {expected} value, got '{value}'")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        value: String,
    },
    #[error("placeholder '{{{name}}}' in {context} does not name a declared parameter")]
    UndefinedPlaceholder { name: String, context: String },
    #[error("invalid parameter assignment '{0}': expected NAME=VALUE")]
    InvalidAssignment(String),
}

/// Values supplied by the caller, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterValues {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `NAME=VALUE` assignments (command-line form); values stay text
    /// until resolved against the declared types
    pub fn parse_assignments<'a>(
        assignments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ParameterError> {
        let mut values = Self::new();
        for assignment in assignments {
            let (name, value) = assignment
                .split_once('=')
                .filter(|(name, _)| !name.trim().is_empty())
                .ok_or_else(|| ParameterError::InvalidAssignment(assignment.to_string()))?;
            values.insert(name.trim(), value);
        }
        Ok(values)
    }

    /// Values recorded by a previous install (JSON object)
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut values = Self::new();
        if let Some(object) = value.as_object() {
            for (name, value) in object {
                if let Some(value) = ParameterValue::from_json(value) {
                    values.insert(name.clone(), value);
                }
            }
        }
        values
    }
}

/// Every declared parameter with its final, type-checked value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParameters {
    values: Vec<(String, ParameterValue, ParameterType)>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, value, _)| value)
    }

    fn lookup(&self, name: &str) -> Option<(&ParameterValue, ParameterType)> {
        self.values
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, value, kind)| (value, *kind))
    }

    /// JSON object stored alongside the baseline
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .values
            .iter()
            .map(|(name, value, _)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }

    /// Substitute `{NAME}` placeholders in a SQL template
    ///
    /// `context` names the template in errors (usually the changeset file).
    pub fn render(&self, template: &str, context: &str) -> Result<String, ParameterError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            match caps.get(1) {
                None => out.push_str(&whole.as_str()[..1]),
                Some(name) => {
                    let (value, kind) = self.lookup(name.as_str()).ok_or_else(|| {
                        ParameterError::UndefinedPlaceholder {
                            name: name.as_str().to_string(),
                            context: context.to_string(),
                        }
                    })?;
                    out.push_str(&sql_literal(value, kind));
                }
            }
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// Render a value as SQL text
pub fn sql_literal(value: &ParameterValue, kind: ParameterType) -> String {
    match (kind, value) {
        (ParameterType::Identifier, v) => quote_identifier(&v.to_string()),
        (_, ParameterValue::Integer(i)) => i.to_string(),
        (_, ParameterValue::Boolean(true)) => "TRUE".to_string(),
        (_, ParameterValue::Boolean(false)) => "FALSE".to_string(),
        (_, ParameterValue::Text(s)) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn coerce_for(spec: &ParameterSpec, candidate: &ParameterValue) -> Result<ParameterValue, ParameterError> {
    candidate
        .coerce(spec.kind)
        .ok_or_else(|| ParameterError::TypeMismatch {
            name: spec.name.clone(),
            expected: spec.kind,
            value: candidate.to_string(),
        })
}

/// Check the supplied values alone: every name declared, every value of its type
///
/// Runs before any database access; required parameters may still come from
/// recorded values later.
pub fn validate_supplied(
    specs: &[ParameterSpec],
    supplied: &ParameterValues,
) -> Result<(), ParameterError> {
    for (name, value) in &supplied.values {
        let spec = specs
            .iter()
            .find(|spec| &spec.name == name)
            .ok_or_else(|| ParameterError::Unknown { name: name.clone() })?;
        coerce_for(spec, value)?;
    }
    Ok(())
}

/// Validate supplied values against the declared parameters
///
/// Lookup order per parameter: `supplied`, then `recorded` (values stored by
/// the previous install), then the declared default.
///
/// # Errors
///
/// - `Unknown` for a supplied name the manifest does not declare
/// - `TypeMismatch` when a value cannot be read as the declared type
/// - `Missing` for a required parameter with no value from any source
pub fn resolve(
    specs: &[ParameterSpec],
    supplied: &ParameterValues,
    recorded: Option<&ParameterValues>,
) -> Result<ResolvedParameters, ParameterError> {
    validate_supplied(specs, supplied)?;

    let mut values = Vec::with_capacity(specs.len());
    for spec in specs {
        let candidate = supplied
            .get(&spec.name)
            .or_else(|| recorded.and_then(|r| r.get(&spec.name)))
            .or(spec.default.as_ref())
            .ok_or_else(|| ParameterError::Missing {
                name: spec.name.clone(),
            })?;
        values.push((spec.name.clone(), coerce_for(spec, candidate)?, spec.kind));
    }

    Ok(ResolvedParameters { values })
}
