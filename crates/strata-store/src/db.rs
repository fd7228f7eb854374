use rusqlite::Connection;

use crate::error::Result;

/// Initialise the metadata schema in `conn`. Idempotent.
///
/// Four tables: report definitions, their declared parameters, run history
/// and schedules. Timestamps are ISO-8601 TEXT throughout so the due-poll
/// (`next_run_at <= now`) compares lexicographically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS report (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid          TEXT    NOT NULL UNIQUE,
            name          TEXT    NOT NULL,
            description   TEXT    NOT NULL DEFAULT '',
            sql_template  TEXT    NOT NULL,
            created_by    TEXT    NOT NULL,
            created_at    TEXT    NOT NULL,
            modified_at   TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS report_parameter (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id      INTEGER NOT NULL REFERENCES report(id),
            name           TEXT    NOT NULL,
            param_type     TEXT    NOT NULL,   -- 'structural' | 'value'
            data_type      TEXT    NOT NULL,
            default_value  TEXT,
            description    TEXT    NOT NULL DEFAULT '',
            display_order  INTEGER NOT NULL DEFAULT 0,
            required       INTEGER NOT NULL DEFAULT 1,
            UNIQUE (report_id, name)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS report_run (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid             TEXT    NOT NULL UNIQUE,
            report_id        INTEGER NOT NULL REFERENCES report(id),
            parameters_json  TEXT,               -- name -> raw string value
            status           TEXT    NOT NULL DEFAULT 'running',
            row_count        INTEGER,
            column_info_json TEXT,               -- [{name, type}] on success
            result_hash      TEXT,               -- cache key on success
            error_message    TEXT,
            run_by           TEXT    NOT NULL,
            started_at       TEXT    NOT NULL,
            completed_at     TEXT,
            duration_ms      INTEGER
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_report_run_report
            ON report_run (report_id, started_at);

        CREATE TABLE IF NOT EXISTS schedule (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid             TEXT    NOT NULL UNIQUE,
            report_id        INTEGER NOT NULL REFERENCES report(id),
            name             TEXT    NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 1,
            definition_json  TEXT    NOT NULL,   -- tagged ScheduleDefinition
            parameters_json  TEXT,               -- fixed parameter values
            recipients_json  TEXT    NOT NULL DEFAULT '[]',
            max_inline_rows  INTEGER NOT NULL DEFAULT 100,
            created_by       TEXT    NOT NULL,
            created_at       TEXT    NOT NULL,
            modified_at      TEXT    NOT NULL,
            last_run_at      TEXT,
            next_run_at      TEXT
        ) STRICT;

        -- Efficient polling: SELECT … WHERE enabled = 1 AND next_run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_schedule_due
            ON schedule (enabled, next_run_at);
        ",
    )?;
    Ok(())
}
