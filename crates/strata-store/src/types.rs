use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_scheduler::ScheduleDefinition;

/// A stored report definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub sql_template: String,
    pub created_by: String,
    pub created_at: String,
    pub modified_at: String,
}

/// Lifecycle state of a report run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other:?}")),
        }
    }
}

/// One execution of a report, manual or scheduled.
///
/// A run is created in `Running` state before execution starts and moved to
/// `Completed` or `Failed` exactly once; `result_hash` is set only on
/// completion and is what keeps a cache entry alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub uuid: String,
    pub report_id: i64,
    /// Raw parameter values as submitted, name -> string.
    pub parameters: Option<BTreeMap<String, String>>,
    pub status: RunStatus,
    pub row_count: Option<i64>,
    pub column_info: Option<Vec<strata_core::ColumnInfo>>,
    pub result_hash: Option<String>,
    pub error_message: Option<String>,
    pub run_by: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
}

/// A recurring execution of a report with fixed parameter values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub uuid: String,
    pub report_id: i64,
    pub name: String,
    pub enabled: bool,
    pub definition: ScheduleDefinition,
    /// Fixed parameter values applied on every scheduled run.
    pub parameters: BTreeMap<String, String>,
    /// Delivery addresses; empty means execute-and-cache only.
    pub recipients: Vec<String>,
    pub max_inline_rows: i64,
    pub created_by: String,
    pub created_at: String,
    pub modified_at: String,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("pending".parse::<RunStatus>().is_err());
    }
}
