use serde::{Deserialize, Serialize};

/// A single result row. Cells are JSON values so that integers, floats,
/// text and NULLs survive the trip from the engine to the cache and the
/// export renderer without a per-column type map.
pub type Row = Vec<serde_json::Value>;

/// Declared data type of a value parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Decimal,
    Date,
    Boolean,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Boolean => "boolean",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "decimal" => Ok(Self::Decimal),
            "date" => Ok(Self::Date),
            "boolean" => Ok(Self::Boolean),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// How a parameter enters the query.
///
/// Structural parameters are spliced into the SQL text before execution
/// (table names, schema names) and are validated against an allow-list.
/// Value parameters are bound to the engine by name and never touch the
/// query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamClass {
    Structural,
    Value,
}

impl std::fmt::Display for ParamClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural => write!(f, "structural"),
            Self::Value => write!(f, "value"),
        }
    }
}

impl std::str::FromStr for ParamClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structural" => Ok(Self::Structural),
            "value" => Ok(Self::Value),
            other => Err(format!("unknown parameter class: {other}")),
        }
    }
}

/// Declared parameter of a report. Name is unique within a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub class: ParamClass,
    pub data_type: DataType,
    pub default_value: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default = "bool_true")]
    pub required: bool,
}

fn bool_true() -> bool {
    true
}

/// Column name + declared engine type, persisted on completed run records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}
