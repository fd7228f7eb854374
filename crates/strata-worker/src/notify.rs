use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use strata_core::Row;
use tracing::info;
use uuid::Uuid;

use crate::export::cell_text;

/// A rendered report delivery: HTML summary plus the full CSV attachment.
#[derive(Debug, Clone)]
pub struct ReportMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body_html: String,
    pub attachment_name: String,
    pub attachment_csv: Vec<u8>,
}

/// Delivery sink for completed scheduled reports.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &ReportMessage) -> anyhow::Result<()>;
}

/// Build the delivery message for a completed run.
///
/// The body inlines at most `max_inline_rows` rows as an HTML table; the
/// full result always rides along as the CSV attachment.
pub fn build_message(
    report_name: &str,
    recipients: &[String],
    columns: &[String],
    rows: &[Row],
    total_rows: usize,
    max_inline_rows: i64,
    attachment_csv: Vec<u8>,
) -> ReportMessage {
    let inline_limit = max_inline_rows.max(0) as usize;
    let shown = rows.len().min(inline_limit);

    let mut body = String::new();
    body.push_str(&format!(
        "<p><strong>{}</strong> — {} row{}, generated {}.</p>\n",
        escape_html(report_name),
        total_rows,
        if total_rows == 1 { "" } else { "s" },
        Utc::now().format("%Y-%m-%d %H:%M UTC"),
    ));

    if shown > 0 {
        body.push_str("<table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\n<tr>");
        for column in columns {
            body.push_str(&format!("<th>{}</th>", escape_html(column)));
        }
        body.push_str("</tr>\n");
        for row in &rows[..shown] {
            body.push_str("<tr>");
            for cell in row {
                body.push_str(&format!("<td>{}</td>", escape_html(&cell_text(cell))));
            }
            body.push_str("</tr>\n");
        }
        body.push_str("</table>\n");
    }

    if total_rows > shown {
        body.push_str(&format!(
            "<p>Showing first {shown} of {total_rows} rows. The full result is attached.</p>\n"
        ));
    }

    ReportMessage {
        recipients: recipients.to_vec(),
        subject: format!("Strata report: {report_name}"),
        body_html: body,
        attachment_name: format!("{}.csv", safe_filename(report_name)),
        attachment_csv,
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "report".to_string()
    } else {
        cleaned
    }
}

/// Queues messages into an outbox SQLite database for an external relay
/// to pick up and actually send.
pub struct OutboxNotifier {
    db: Mutex<Connection>,
    sender: String,
}

impl OutboxNotifier {
    pub fn open(path: &str, sender: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outbox (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid            TEXT    NOT NULL UNIQUE,
                sender          TEXT    NOT NULL,
                recipients      TEXT    NOT NULL,   -- JSON array
                subject         TEXT    NOT NULL,
                body_html       TEXT    NOT NULL,
                attachment_name TEXT    NOT NULL,
                attachment      BLOB    NOT NULL,
                status          TEXT    NOT NULL DEFAULT 'queued',
                queued_at       TEXT    NOT NULL
            ) STRICT;",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
            sender: sender.to_string(),
        })
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, message: &ReportMessage) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO outbox (uuid, sender, recipients, subject, body_html,
             attachment_name, attachment, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                self.sender,
                serde_json::to_string(&message.recipients)?,
                message.subject,
                message.body_html,
                message.attachment_name,
                message.attachment_csv,
                Utc::now().to_rfc3339(),
            ],
        )?;
        info!(
            subject = %message.subject,
            recipients = message.recipients.len(),
            "report message queued to outbox"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inlines_up_to_the_row_limit() {
        let columns = vec!["n".to_string()];
        let rows: Vec<Row> = (1..=5).map(|i| vec![json!(i)]).collect();
        let message = build_message(
            "Counts",
            &["ops@example.com".to_string()],
            &columns,
            &rows,
            5,
            3,
            Vec::new(),
        );
        assert_eq!(message.subject, "Strata report: Counts");
        assert_eq!(message.body_html.matches("<tr>").count(), 4); // header + 3 rows
        assert!(message.body_html.contains("Showing first 3 of 5 rows"));
        assert_eq!(message.attachment_name, "Counts.csv");
    }

    #[test]
    fn small_results_have_no_truncation_note() {
        let columns = vec!["n".to_string()];
        let rows = vec![vec![json!(1)]];
        let message = build_message("Tiny", &[], &columns, &rows, 1, 100, Vec::new());
        assert!(!message.body_html.contains("Showing first"));
        assert!(message.body_html.contains("1 row,"));
    }

    #[test]
    fn escapes_html_in_cells_and_names() {
        let columns = vec!["<tag>".to_string()];
        let rows = vec![vec![json!("a & b")]];
        let message = build_message("R&D <x>", &[], &columns, &rows, 1, 10, Vec::new());
        assert!(message.body_html.contains("&lt;tag&gt;"));
        assert!(message.body_html.contains("a &amp; b"));
        assert!(message.body_html.contains("R&amp;D &lt;x&gt;"));
        assert_eq!(message.attachment_name, "R_D__x_.csv");
    }

    #[test]
    fn outbox_notifier_queues_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        let notifier = OutboxNotifier::open(path.to_str().unwrap(), "strata@localhost").unwrap();
        let message = ReportMessage {
            recipients: vec!["a@example.com".to_string()],
            subject: "Strata report: T".to_string(),
            body_html: "<p>hi</p>".to_string(),
            attachment_name: "T.csv".to_string(),
            attachment_csv: b"x\n1\n".to_vec(),
        };
        notifier.send(&message).unwrap();
        notifier.send(&message).unwrap();

        let db = notifier.db.lock().unwrap();
        let count: i64 = db
            .query_row("SELECT COUNT(*) FROM outbox WHERE status = 'queued'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
