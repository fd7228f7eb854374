use std::collections::BTreeMap;
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use strata_core::types::{DataType, Row};
use tracing::debug;

use crate::error::QueryError;
use crate::template::{cast_value, render_structural, validate_structural_value, ParamValue};

/// Outcome of a report execution. `error` and data are mutually exclusive:
/// a populated error always comes with empty columns/rows.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub duration_ms: u64,
    pub rendered_sql: String,
    pub error: Option<String>,
}

impl QueryResult {
    fn failed(mut self, err: QueryError) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

/// Execute a report's SQL template with the given parameters.
///
/// 1. Validate structural parameters.
/// 2. Render the structural template.
/// 3. Cast value parameters to typed bind values.
/// 4. Execute against a fresh in-memory engine session with values bound
///    by `$name`.
///
/// Never returns an error — every failure mode populates
/// [`QueryResult::error`] and leaves the data fields empty. Each call opens
/// its own engine session, so concurrent executions never interfere.
pub fn execute_report(
    sql_template: &str,
    structural_params: &BTreeMap<String, String>,
    value_params: &BTreeMap<String, String>,
    param_types: &BTreeMap<String, DataType>,
) -> QueryResult {
    let mut result = QueryResult::default();

    for (name, value) in structural_params {
        if let Some(message) = validate_structural_value(name, value) {
            return result.failed(QueryError::Validation(message));
        }
    }

    let rendered_sql = match render_structural(sql_template, structural_params) {
        Ok(sql) => sql,
        Err(e) => return result.failed(QueryError::Template(e)),
    };
    result.rendered_sql = rendered_sql.clone();

    let mut bind_params: Vec<(String, ParamValue)> = Vec::with_capacity(value_params.len());
    for (name, value) in value_params {
        let data_type = param_types.get(name).copied().unwrap_or(DataType::String);
        match cast_value(value, data_type) {
            Ok(typed) => bind_params.push((format!("${name}"), typed)),
            Err(e) => {
                return result.failed(QueryError::Cast {
                    name: name.clone(),
                    source: e,
                })
            }
        }
    }

    let start = Instant::now();
    match run_query(&rendered_sql, &bind_params) {
        Ok((columns, types, rows)) => {
            result.duration_ms = start.elapsed().as_millis() as u64;
            result.row_count = rows.len();
            result.columns = columns;
            result.types = types;
            result.rows = rows;
            debug!(
                rows = result.row_count,
                duration_ms = result.duration_ms,
                "report query executed"
            );
            result
        }
        Err(e) => {
            result.duration_ms = start.elapsed().as_millis() as u64;
            result.failed(QueryError::Engine(e))
        }
    }
}

/// Run the rendered SQL on a private in-memory session.
///
/// Only bind names actually present in the statement are bound — a report
/// may declare parameters that a given template revision no longer uses.
fn run_query(
    sql: &str,
    bind_params: &[(String, ParamValue)],
) -> Result<(Vec<String>, Vec<String>, Vec<Row>), rusqlite::Error> {
    let conn = Connection::open_in_memory()?;
    let mut stmt = conn.prepare(sql)?;

    let columns: Vec<String> = stmt
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let types: Vec<String> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().unwrap_or("").to_string())
        .collect();

    let mut binds: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
    for (name, value) in bind_params {
        if stmt.parameter_index(name)?.is_some() {
            binds.push((name.as_str(), value));
        }
    }

    let col_count = columns.len();
    let mut out: Vec<Row> = Vec::new();
    let mut rows = stmt.query(&binds[..])?;
    while let Some(row) = rows.next()? {
        let mut cells: Row = Vec::with_capacity(col_count);
        for i in 0..col_count {
            cells.push(match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::from(v),
                ValueRef::Real(v) => {
                    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
                }
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(hex::encode(b)),
            });
        }
        out.push(cells);
    }

    Ok((columns, types, out))
}
