use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use strata_core::types::{DataType, ParamClass};

use crate::error::{CastError, TemplateError};

/// Structural markers: `{{ name }}` (whitespace-tolerant).
static STRUCTURAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").unwrap());

/// Engine bind markers: `$name`.
static BIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([a-zA-Z_][a-zA-Z0-9_]*)").unwrap());

/// Simple identifiers — the default allow-list for structural values.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").unwrap());

/// Broader allow-list for values that look like connection strings.
static CONNECTION_STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.=;{}\\/:@, -]+$").unwrap());

/// A parameter discovered in a SQL template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedParameter {
    pub name: String,
    pub class: ParamClass,
}

/// Typed value produced by [`cast_value`] and bound by name at execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Bool(bool),
}

impl rusqlite::ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            // Bound as text — SQLite has no decimal affinity and text keeps
            // the full precision.
            Self::Decimal(d) => ToSqlOutput::Owned(Value::Text(d.to_string())),
            Self::Date(d) => ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string())),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
        })
    }
}

/// Extract all parameters from a SQL template.
///
/// Structural `{{ name }}` markers are scanned first, then `$name` bind
/// markers, de-duplicating by name and preserving first-seen order within
/// each pass. Malformed structural syntax simply produces no structural
/// matches — value-parameter extraction always runs.
pub fn extract_parameters(sql_template: &str) -> Vec<ExtractedParameter> {
    let mut params = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for cap in STRUCTURAL_RE.captures_iter(sql_template) {
        let name = &cap[1];
        if seen.insert(name.to_string()) {
            params.push(ExtractedParameter {
                name: name.to_string(),
                class: ParamClass::Structural,
            });
        }
    }

    for cap in BIND_RE.captures_iter(sql_template) {
        let name = &cap[1];
        if seen.insert(name.to_string()) {
            params.push(ExtractedParameter {
                name: name.to_string(),
                class: ParamClass::Value,
            });
        }
    }

    params
}

/// Validate a structural parameter value.
///
/// Returns `None` if valid, or an error message if invalid. Structural
/// values are spliced into the SQL text verbatim, so this allow-list is the
/// injection defense — there is no escaping step.
pub fn validate_structural_value(name: &str, value: &str) -> Option<String> {
    if value.is_empty() {
        return Some(format!("Structural parameter '{name}' cannot be empty"));
    }

    // Connection strings carry =, ;, { or } and get the broader allow-list.
    if value.contains(['=', ';', '{', '}']) {
        if !CONNECTION_STRING_RE.is_match(value) {
            return Some(format!(
                "Structural parameter '{name}' contains invalid characters for a connection string"
            ));
        }
        return None;
    }

    if !IDENTIFIER_RE.is_match(value) {
        return Some(format!(
            "Structural parameter '{name}' must contain only letters, digits, dots, and underscores"
        ));
    }
    None
}

/// Render structural parameters into the SQL template.
///
/// Only `{{ name }}` markers are substituted; `$name` bind markers are left
/// untouched for the query engine. A marker with no matching value, or
/// template syntax the substitution cannot resolve, is a [`TemplateError`].
pub fn render_structural(
    sql_template: &str,
    structural_values: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let rendered = STRUCTURAL_RE.replace_all(sql_template, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        match structural_values.get(name) {
            Some(value) => value.clone(),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(TemplateError::UndefinedParameter(name));
    }

    // Anything brace-flavoured left over is syntax the renderer does not
    // understand (unterminated marker, block tags, bad identifiers).
    for token in ["{{", "}}", "{%", "%}"] {
        if let Some(pos) = rendered.find(token) {
            let snippet: String = rendered[pos..].chars().take(24).collect();
            return Err(TemplateError::UnresolvedSyntax(snippet));
        }
    }

    Ok(rendered.into_owned())
}

/// Cast a raw string to the typed value bound to the query engine.
///
/// Empty input is an error for every type except `string`.
pub fn cast_value(value: &str, data_type: DataType) -> Result<ParamValue, CastError> {
    if value.is_empty() && data_type != DataType::String {
        return Err(CastError::new(format!(
            "Empty value cannot be cast to {data_type}"
        )));
    }

    match data_type {
        DataType::String => Ok(ParamValue::Text(value.to_string())),
        DataType::Integer => value
            .trim()
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|_| CastError::new(format!("invalid integer value {value:?}"))),
        DataType::Float => value
            .trim()
            .parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|_| CastError::new(format!("invalid float value {value:?}"))),
        DataType::Decimal => value
            .trim()
            .parse::<Decimal>()
            .map(ParamValue::Decimal)
            .map_err(|_| CastError::new(format!("invalid decimal value {value:?}"))),
        DataType::Date => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(ParamValue::Date)
            .map_err(|_| CastError::new(format!("invalid ISO date {value:?} (expected YYYY-MM-DD)"))),
        DataType::Boolean => {
            let truthy = matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            );
            Ok(ParamValue::Bool(truthy))
        }
    }
}
