use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use strata_core::{ColumnInfo, ParameterDefinition};
use strata_scheduler::{next_run, ScheduleDefinition};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, StoreError};
use crate::types::{Report, RunRecord, RunStatus, Schedule};

/// Metadata store for reports, parameters, schedules and runs.
///
/// Thread-safe: wraps the SQLite connection in a Mutex. Every public
/// method takes the lock once and releases it before returning.
pub struct MetadataStore {
    db: Mutex<Connection>,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl MetadataStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // ---- reports ----------------------------------------------------

    pub fn create_report(
        &self,
        name: &str,
        description: &str,
        sql_template: &str,
        created_by: &str,
    ) -> Result<Report> {
        let db = self.db.lock().unwrap();
        let now = now_iso();
        let uuid = Uuid::new_v4().to_string();
        db.execute(
            "INSERT INTO report (uuid, name, description, sql_template, created_by,
             created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![uuid, name, description, sql_template, created_by, now],
        )?;
        let id = db.last_insert_rowid();
        debug!(report_id = id, name, "created report");
        Ok(Report {
            id,
            uuid,
            name: name.to_string(),
            description: description.to_string(),
            sql_template: sql_template.to_string(),
            created_by: created_by.to_string(),
            created_at: now.clone(),
            modified_at: now,
        })
    }

    pub fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let db = self.db.lock().unwrap();
        let report = db
            .query_row(
                "SELECT id, uuid, name, description, sql_template, created_by,
                 created_at, modified_at FROM report WHERE id = ?1",
                [id],
                |row| {
                    Ok(Report {
                        id: row.get(0)?,
                        uuid: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        sql_template: row.get(4)?,
                        created_by: row.get(5)?,
                        created_at: row.get(6)?,
                        modified_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(report)
    }

    /// Delete a report. Schedules pointing at it are skipped by the worker
    /// until they are cleaned up or repointed.
    pub fn delete_report(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let removed = db.execute("DELETE FROM report WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    pub fn update_report_template(&self, id: i64, sql_template: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE report SET sql_template = ?1, modified_at = ?2 WHERE id = ?3",
            rusqlite::params![sql_template, now_iso(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "report",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ---- parameters -------------------------------------------------

    pub fn add_parameter(&self, report_id: i64, def: &ParameterDefinition) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO report_parameter (report_id, name, param_type, data_type,
             default_value, description, display_order, required)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                report_id,
                def.name,
                def.class.to_string(),
                def.data_type.to_string(),
                def.default_value,
                def.description,
                def.display_order,
                def.required as i64,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Declared parameters of a report, in display order.
    pub fn parameters_for_report(&self, report_id: i64) -> Result<Vec<ParameterDefinition>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT name, param_type, data_type, default_value, description,
             display_order, required
             FROM report_parameter WHERE report_id = ?1
             ORDER BY display_order, name",
        )?;
        let raw: Vec<(String, String, String, Option<String>, String, i64, i64)> = stmt
            .query_map([report_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        raw.into_iter()
            .map(
                |(name, class, data_type, default_value, description, display_order, required)| {
                    let class = class.parse().map_err(|reason| StoreError::Corrupt {
                        entity: "report_parameter",
                        id: name.clone(),
                        reason,
                    })?;
                    let data_type = data_type.parse().map_err(|reason| StoreError::Corrupt {
                        entity: "report_parameter",
                        id: name.clone(),
                        reason,
                    })?;
                    Ok(ParameterDefinition {
                        name,
                        class,
                        data_type,
                        default_value,
                        description,
                        display_order,
                        required: required != 0,
                    })
                },
            )
            .collect()
    }

    // ---- schedules --------------------------------------------------

    /// Create a schedule. The definition is validated and the first
    /// `next_run_at` is computed from the current instant; a definition
    /// that can never fire again (a past `one_time`) is stored disabled.
    #[allow(clippy::too_many_arguments)]
    pub fn create_schedule(
        &self,
        report_id: i64,
        name: &str,
        definition: &ScheduleDefinition,
        parameters: &BTreeMap<String, String>,
        recipients: &[String],
        max_inline_rows: i64,
        created_by: &str,
    ) -> Result<Schedule> {
        definition.validate()?;
        let next = next_run(definition, Utc::now());
        let next_iso = next.map(|t| t.to_rfc3339());
        let enabled = next.is_some();

        let db = self.db.lock().unwrap();
        let now = now_iso();
        let uuid = Uuid::new_v4().to_string();
        db.execute(
            "INSERT INTO schedule (uuid, report_id, name, enabled, definition_json,
             parameters_json, recipients_json, max_inline_rows, created_by,
             created_at, modified_at, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11)",
            rusqlite::params![
                uuid,
                report_id,
                name,
                enabled as i64,
                serde_json::to_string(definition)?,
                serde_json::to_string(parameters)?,
                serde_json::to_string(recipients)?,
                max_inline_rows,
                created_by,
                now,
                next_iso,
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!(schedule_id = id, name, next_run_at = ?next_iso, "created schedule");
        Ok(Schedule {
            id,
            uuid,
            report_id,
            name: name.to_string(),
            enabled,
            definition: definition.clone(),
            parameters: parameters.clone(),
            recipients: recipients.to_vec(),
            max_inline_rows,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            modified_at: now,
            last_run_at: None,
            next_run_at: next_iso,
        })
    }

    pub fn get_schedule(&self, id: i64) -> Result<Option<Schedule>> {
        let db = self.db.lock().unwrap();
        let raw = db
            .query_row(
                &format!("{SCHEDULE_SELECT} WHERE id = ?1"),
                [id],
                raw_schedule_from_row,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(schedule_from_raw(raw)?)),
            None => Ok(None),
        }
    }

    /// Enabled schedules whose `next_run_at` is at or before `now`.
    ///
    /// Rows whose stored definition no longer parses are skipped with a
    /// warning so one corrupt schedule never halts the polling loop.
    pub fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SCHEDULE_SELECT}
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at"
        ))?;
        let raw: Vec<RawSchedule> = stmt
            .query_map([now.to_rfc3339()], raw_schedule_from_row)?
            .collect::<std::result::Result<_, _>>()?;

        let mut due = Vec::with_capacity(raw.len());
        for row in raw {
            let id = row.id;
            match schedule_from_raw(row) {
                Ok(schedule) => due.push(schedule),
                Err(e) => warn!(schedule_id = id, error = %e, "skipping corrupt schedule"),
            }
        }
        Ok(due)
    }

    /// Record a dispatch: stamp `last_run_at`, advance (or clear)
    /// `next_run_at` and disable the schedule when it is exhausted.
    pub fn update_schedule_after_run(
        &self,
        id: i64,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE schedule SET last_run_at = ?1, next_run_at = ?2, enabled = ?3
             WHERE id = ?4",
            rusqlite::params![
                now_iso(),
                next_run_at.map(|t| t.to_rfc3339()),
                next_run_at.is_some() as i64,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Replace a schedule's definition and recompute `next_run_at` from
    /// the current instant.
    pub fn update_schedule_definition(
        &self,
        id: i64,
        definition: &ScheduleDefinition,
    ) -> Result<()> {
        definition.validate()?;
        let next = next_run(definition, Utc::now());

        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE schedule SET definition_json = ?1, next_run_at = ?2,
             enabled = ?3, modified_at = ?4 WHERE id = ?5",
            rusqlite::params![
                serde_json::to_string(definition)?,
                next.map(|t| t.to_rfc3339()),
                next.is_some() as i64,
                now_iso(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ---- runs -------------------------------------------------------

    /// Record the start of an execution.
    pub fn create_running_run(
        &self,
        report_id: i64,
        run_by: &str,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> Result<RunRecord> {
        let db = self.db.lock().unwrap();
        let now = now_iso();
        let uuid = Uuid::new_v4().to_string();
        let params_json = parameters.map(serde_json::to_string).transpose()?;
        db.execute(
            "INSERT INTO report_run (uuid, report_id, parameters_json, status,
             run_by, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
            rusqlite::params![uuid, report_id, params_json, run_by, now],
        )?;
        Ok(RunRecord {
            id: db.last_insert_rowid(),
            uuid,
            report_id,
            parameters: parameters.cloned(),
            status: RunStatus::Running,
            row_count: None,
            column_info: None,
            result_hash: None,
            error_message: None,
            run_by: run_by.to_string(),
            started_at: now,
            completed_at: None,
            duration_ms: None,
        })
    }

    pub fn mark_run_completed(
        &self,
        run_id: i64,
        row_count: i64,
        columns: &[ColumnInfo],
        result_hash: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE report_run SET status = 'completed', row_count = ?1,
             column_info_json = ?2, result_hash = ?3, completed_at = ?4,
             duration_ms = ?5
             WHERE id = ?6 AND status = 'running'",
            rusqlite::params![
                row_count,
                serde_json::to_string(columns)?,
                result_hash,
                now_iso(),
                duration_ms,
                run_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "report_run",
                id: run_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn mark_run_failed(&self, run_id: i64, error_message: &str, duration_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE report_run SET status = 'failed', error_message = ?1,
             completed_at = ?2, duration_ms = ?3
             WHERE id = ?4 AND status = 'running'",
            rusqlite::params![error_message, now_iso(), duration_ms, run_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "report_run",
                id: run_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_run(&self, id: i64) -> Result<Option<RunRecord>> {
        let db = self.db.lock().unwrap();
        let raw = db
            .query_row(
                &format!("{RUN_SELECT} WHERE id = ?1"),
                [id],
                raw_run_from_row,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(run_from_raw(raw)?)),
            None => Ok(None),
        }
    }

    /// Most recent runs of a report, newest first.
    pub fn runs_for_report(&self, report_id: i64, limit: i64) -> Result<Vec<RunRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{RUN_SELECT} WHERE report_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let raw: Vec<RawRun> = stmt
            .query_map(rusqlite::params![report_id, limit], raw_run_from_row)?
            .collect::<std::result::Result<_, _>>()?;
        raw.into_iter().map(run_from_raw).collect()
    }

    /// Every result hash some run record still points at. Cache entries
    /// outside this set are orphans and safe to purge.
    pub fn referenced_hashes(&self) -> Result<HashSet<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT result_hash FROM report_run WHERE result_hash IS NOT NULL",
        )?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(hashes)
    }

    /// Delete run records started more than `days` days ago. Returns the
    /// number of rows removed.
    pub fn purge_runs_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM report_run WHERE started_at < ?1",
            [cutoff.as_str()],
        )?;
        if removed > 0 {
            debug!(removed, days, "purged old run records");
        }
        Ok(removed)
    }
}

// ---- row mapping ----------------------------------------------------

const SCHEDULE_SELECT: &str = "SELECT id, uuid, report_id, name, enabled,
    definition_json, parameters_json, recipients_json, max_inline_rows,
    created_by, created_at, modified_at, last_run_at, next_run_at
    FROM schedule";

struct RawSchedule {
    id: i64,
    uuid: String,
    report_id: i64,
    name: String,
    enabled: i64,
    definition_json: String,
    parameters_json: Option<String>,
    recipients_json: String,
    max_inline_rows: i64,
    created_by: String,
    created_at: String,
    modified_at: String,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
}

fn raw_schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSchedule> {
    Ok(RawSchedule {
        id: row.get(0)?,
        uuid: row.get(1)?,
        report_id: row.get(2)?,
        name: row.get(3)?,
        enabled: row.get(4)?,
        definition_json: row.get(5)?,
        parameters_json: row.get(6)?,
        recipients_json: row.get(7)?,
        max_inline_rows: row.get(8)?,
        created_by: row.get(9)?,
        created_at: row.get(10)?,
        modified_at: row.get(11)?,
        last_run_at: row.get(12)?,
        next_run_at: row.get(13)?,
    })
}

fn schedule_from_raw(raw: RawSchedule) -> Result<Schedule> {
    let definition = ScheduleDefinition::parse(&raw.definition_json)?;
    let parameters = match raw.parameters_json {
        Some(json) => serde_json::from_str(&json)?,
        None => BTreeMap::new(),
    };
    let recipients = serde_json::from_str(&raw.recipients_json)?;
    Ok(Schedule {
        id: raw.id,
        uuid: raw.uuid,
        report_id: raw.report_id,
        name: raw.name,
        enabled: raw.enabled != 0,
        definition,
        parameters,
        recipients,
        max_inline_rows: raw.max_inline_rows,
        created_by: raw.created_by,
        created_at: raw.created_at,
        modified_at: raw.modified_at,
        last_run_at: raw.last_run_at,
        next_run_at: raw.next_run_at,
    })
}

const RUN_SELECT: &str = "SELECT id, uuid, report_id, parameters_json, status,
    row_count, column_info_json, result_hash, error_message, run_by,
    started_at, completed_at, duration_ms
    FROM report_run";

struct RawRun {
    id: i64,
    uuid: String,
    report_id: i64,
    parameters_json: Option<String>,
    status: String,
    row_count: Option<i64>,
    column_info_json: Option<String>,
    result_hash: Option<String>,
    error_message: Option<String>,
    run_by: String,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
}

fn raw_run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        id: row.get(0)?,
        uuid: row.get(1)?,
        report_id: row.get(2)?,
        parameters_json: row.get(3)?,
        status: row.get(4)?,
        row_count: row.get(5)?,
        column_info_json: row.get(6)?,
        result_hash: row.get(7)?,
        error_message: row.get(8)?,
        run_by: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        duration_ms: row.get(12)?,
    })
}

fn run_from_raw(raw: RawRun) -> Result<RunRecord> {
    let status: RunStatus = raw.status.parse().map_err(|reason| StoreError::Corrupt {
        entity: "report_run",
        id: raw.id.to_string(),
        reason,
    })?;
    let parameters = raw
        .parameters_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let column_info = raw
        .column_info_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(RunRecord {
        id: raw.id,
        uuid: raw.uuid,
        report_id: raw.report_id,
        parameters,
        status,
        row_count: raw.row_count,
        column_info,
        result_hash: raw.result_hash,
        error_message: raw.error_message,
        run_by: raw.run_by,
        started_at: raw.started_at,
        completed_at: raw.completed_at,
        duration_ms: raw.duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{DataType, ParamClass};

    fn store() -> MetadataStore {
        MetadataStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample_report(store: &MetadataStore) -> Report {
        store
            .create_report(
                "Daily Sales",
                "Sales by region",
                "SELECT * FROM sales WHERE region = $region",
                "alice",
            )
            .unwrap()
    }

    #[test]
    fn report_round_trip() {
        let store = store();
        let created = sample_report(&store);
        let fetched = store.get_report(created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Daily Sales");
        assert_eq!(fetched.sql_template, created.sql_template);
        assert!(store.get_report(9999).unwrap().is_none());
    }

    #[test]
    fn parameters_come_back_in_display_order() {
        let store = store();
        let report = sample_report(&store);
        for (name, order) in [("zeta", 2), ("alpha", 1)] {
            store
                .add_parameter(
                    report.id,
                    &ParameterDefinition {
                        name: name.to_string(),
                        class: ParamClass::Value,
                        data_type: DataType::String,
                        default_value: None,
                        description: String::new(),
                        display_order: order,
                        required: true,
                    },
                )
                .unwrap();
        }
        let params = store.parameters_for_report(report.id).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "alpha");
        assert_eq!(params[1].name, "zeta");
    }

    #[test]
    fn duplicate_parameter_name_is_rejected() {
        let store = store();
        let report = sample_report(&store);
        let def = ParameterDefinition {
            name: "region".to_string(),
            class: ParamClass::Value,
            data_type: DataType::String,
            default_value: Some("EMEA".to_string()),
            description: String::new(),
            display_order: 0,
            required: true,
        };
        store.add_parameter(report.id, &def).unwrap();
        assert!(store.add_parameter(report.id, &def).is_err());
    }

    #[test]
    fn schedule_due_polling() {
        let store = store();
        let report = sample_report(&store);
        let future = Utc::now() + Duration::hours(1);
        let schedule = store
            .create_schedule(
                report.id,
                "hourly",
                &ScheduleDefinition::OneTime { datetime: future },
                &BTreeMap::new(),
                &[],
                100,
                "alice",
            )
            .unwrap();
        assert!(schedule.enabled);
        assert_eq!(schedule.next_run_at, Some(future.to_rfc3339()));

        assert!(store.due_schedules(Utc::now()).unwrap().is_empty());
        let due = store.due_schedules(future + Duration::seconds(1)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, schedule.id);
    }

    #[test]
    fn exhausted_schedule_is_created_disabled() {
        let store = store();
        let report = sample_report(&store);
        let past = Utc::now() - Duration::hours(1);
        let schedule = store
            .create_schedule(
                report.id,
                "once",
                &ScheduleDefinition::OneTime { datetime: past },
                &BTreeMap::new(),
                &[],
                100,
                "alice",
            )
            .unwrap();
        assert!(!schedule.enabled);
        assert!(schedule.next_run_at.is_none());
        assert!(store
            .due_schedules(Utc::now() + Duration::days(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn after_run_update_advances_or_disables() {
        let store = store();
        let report = sample_report(&store);
        let future = Utc::now() + Duration::minutes(5);
        let schedule = store
            .create_schedule(
                report.id,
                "soon",
                &ScheduleDefinition::OneTime { datetime: future },
                &BTreeMap::new(),
                &[],
                100,
                "alice",
            )
            .unwrap();

        store
            .update_schedule_after_run(schedule.id, None)
            .unwrap();
        let updated = store.get_schedule(schedule.id).unwrap().unwrap();
        assert!(!updated.enabled);
        assert!(updated.next_run_at.is_none());
        assert!(updated.last_run_at.is_some());

        let later = Utc::now() + Duration::hours(2);
        store
            .update_schedule_after_run(schedule.id, Some(later))
            .unwrap();
        let updated = store.get_schedule(schedule.id).unwrap().unwrap();
        assert!(updated.enabled);
        assert_eq!(updated.next_run_at, Some(later.to_rfc3339()));
    }

    #[test]
    fn schedule_stores_parameters_and_recipients() {
        let store = store();
        let report = sample_report(&store);
        let mut params = BTreeMap::new();
        params.insert("region".to_string(), "EMEA".to_string());
        let schedule = store
            .create_schedule(
                report.id,
                "emea daily",
                &ScheduleDefinition::OneTime {
                    datetime: Utc::now() + Duration::hours(1),
                },
                &params,
                &["ops@example.com".to_string()],
                25,
                "alice",
            )
            .unwrap();
        let fetched = store.get_schedule(schedule.id).unwrap().unwrap();
        assert_eq!(fetched.parameters.get("region").unwrap(), "EMEA");
        assert_eq!(fetched.recipients, vec!["ops@example.com".to_string()]);
        assert_eq!(fetched.max_inline_rows, 25);
    }

    #[test]
    fn run_lifecycle_completed() {
        let store = store();
        let report = sample_report(&store);
        let mut params = BTreeMap::new();
        params.insert("region".to_string(), "EMEA".to_string());
        let run = store
            .create_running_run(report.id, "alice", Some(&params))
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let columns = vec![ColumnInfo {
            name: "total".to_string(),
            type_name: "INTEGER".to_string(),
        }];
        store
            .mark_run_completed(run.id, 42, &columns, "abc123", 17)
            .unwrap();
        let fetched = store.get_run(run.id).unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert_eq!(fetched.row_count, Some(42));
        assert_eq!(fetched.result_hash.as_deref(), Some("abc123"));
        assert_eq!(fetched.column_info.as_deref(), Some(columns.as_slice()));
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.parameters, Some(params));

        // Terminal states are final.
        assert!(store.mark_run_failed(run.id, "boom", 1).is_err());
    }

    #[test]
    fn run_lifecycle_failed() {
        let store = store();
        let report = sample_report(&store);
        let run = store.create_running_run(report.id, "bob", None).unwrap();
        store.mark_run_failed(run.id, "no such table", 3).unwrap();
        let fetched = store.get_run(run.id).unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Failed);
        assert_eq!(fetched.error_message.as_deref(), Some("no such table"));
        assert!(fetched.result_hash.is_none());
    }

    #[test]
    fn referenced_hashes_collects_completed_runs() {
        let store = store();
        let report = sample_report(&store);
        for hash in ["aaa", "bbb", "aaa"] {
            let run = store.create_running_run(report.id, "alice", None).unwrap();
            store.mark_run_completed(run.id, 1, &[], hash, 1).unwrap();
        }
        let failed = store.create_running_run(report.id, "alice", None).unwrap();
        store.mark_run_failed(failed.id, "boom", 1).unwrap();

        let hashes = store.referenced_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains("aaa") && hashes.contains("bbb"));
    }

    #[test]
    fn purge_removes_only_old_runs() {
        let store = store();
        let report = sample_report(&store);
        let old = store.create_running_run(report.id, "alice", None).unwrap();
        let recent = store.create_running_run(report.id, "alice", None).unwrap();
        {
            let db = store.db.lock().unwrap();
            let long_ago = (Utc::now() - Duration::days(120)).to_rfc3339();
            db.execute(
                "UPDATE report_run SET started_at = ?1 WHERE id = ?2",
                rusqlite::params![long_ago, old.id],
            )
            .unwrap();
        }
        let removed = store.purge_runs_older_than(90).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_run(old.id).unwrap().is_none());
        assert!(store.get_run(recent.id).unwrap().is_some());
    }

    #[test]
    fn runs_for_report_newest_first() {
        let store = store();
        let report = sample_report(&store);
        let a = store.create_running_run(report.id, "alice", None).unwrap();
        let b = store.create_running_run(report.id, "alice", None).unwrap();
        {
            let db = store.db.lock().unwrap();
            let earlier = (Utc::now() - Duration::hours(1)).to_rfc3339();
            db.execute(
                "UPDATE report_run SET started_at = ?1 WHERE id = ?2",
                rusqlite::params![earlier, a.id],
            )
            .unwrap();
        }
        let runs = store.runs_for_report(report.id, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, b.id);
        assert_eq!(runs[1].id, a.id);
    }
}
