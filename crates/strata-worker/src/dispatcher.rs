use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_cache::{canonical_hash, ResultCache};
use strata_core::{ColumnInfo, DataType, ParamClass};
use strata_query::execute_report;
use strata_scheduler::next_run;
use strata_store::{MetadataStore, Schedule};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::export::render_csv;
use crate::notify::{build_message, Notifier};

/// Polls the metadata store for due schedules and executes them.
///
/// Each cycle is sequential: schedules run one at a time, and every
/// schedule is rescheduled from the instant its run finished, never from
/// its original due time, so a slow report does not queue up catch-up
/// runs behind itself.
pub struct Dispatcher {
    store: Arc<MetadataStore>,
    cache: ResultCache,
    notifier: Option<Arc<dyn Notifier>>,
    poll_interval: std::time::Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<MetadataStore>,
        cache: ResultCache,
        notifier: Option<Arc<dyn Notifier>>,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            poll_interval,
        }
    }

    /// Main worker loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "dispatcher started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.process_due(Utc::now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute every schedule due at `now`. Returns the number dispatched.
    ///
    /// Failures are contained per schedule: a failed run is recorded and
    /// the schedule still advances, so one broken report never stalls the
    /// rest of the cycle.
    pub fn process_due(&self, now: DateTime<Utc>) -> usize {
        let due = match self.store.due_schedules(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-schedule poll failed");
                return 0;
            }
        };

        let mut dispatched = 0;
        for schedule in due {
            if let Err(e) = self.dispatch(&schedule) {
                error!(schedule_id = schedule.id, error = %e, "schedule dispatch failed");
            } else {
                dispatched += 1;
            }

            // Reschedule from completion time, not the original due time.
            let next = next_run(&schedule.definition, Utc::now());
            if next.is_none() {
                info!(schedule_id = schedule.id, name = %schedule.name, "schedule exhausted, disabling");
            }
            if let Err(e) = self.store.update_schedule_after_run(schedule.id, next) {
                error!(schedule_id = schedule.id, error = %e, "schedule update failed");
            }
        }
        dispatched
    }

    /// Run one schedule end to end: resolve parameters, execute, cache the
    /// result, record the run and deliver to recipients.
    fn dispatch(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let report = match self.store.get_report(schedule.report_id)? {
            Some(report) => report,
            None => {
                warn!(
                    schedule_id = schedule.id,
                    report_id = schedule.report_id,
                    "schedule references a missing report, skipping"
                );
                return Ok(());
            }
        };

        let definitions = self.store.parameters_for_report(report.id)?;
        let mut structural: BTreeMap<String, String> = BTreeMap::new();
        let mut values: BTreeMap<String, String> = BTreeMap::new();
        let mut types: BTreeMap<String, DataType> = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();

        for def in &definitions {
            let resolved = schedule
                .parameters
                .get(&def.name)
                .cloned()
                .or_else(|| def.default_value.clone());
            match resolved {
                Some(value) => {
                    match def.class {
                        ParamClass::Structural => structural.insert(def.name.clone(), value),
                        ParamClass::Value => {
                            types.insert(def.name.clone(), def.data_type);
                            values.insert(def.name.clone(), value)
                        }
                    };
                }
                None if def.required => missing.push(def.name.clone()),
                None => {}
            }
        }

        let mut all_params = structural.clone();
        all_params.extend(values.clone());
        let run_by = format!("schedule:{}", schedule.name);
        let run = self
            .store
            .create_running_run(report.id, &run_by, Some(&all_params))?;

        if !missing.is_empty() {
            let message = format!("Missing required parameter(s): {}", missing.join(", "));
            warn!(run_id = run.id, report_id = report.id, %message, "run failed");
            self.store.mark_run_failed(run.id, &message, 0)?;
            return Ok(());
        }

        let result = execute_report(&report.sql_template, &structural, &values, &types);
        let duration_ms = result.duration_ms as i64;

        if let Some(message) = result.error {
            warn!(run_id = run.id, report_id = report.id, %message, "run failed");
            self.store.mark_run_failed(run.id, &message, duration_ms)?;
            return Ok(());
        }

        let hash = canonical_hash(report.id, &result.rendered_sql, &values);
        self.cache
            .write(&hash, &result.columns, &result.types, &result.rows)?;

        let columns: Vec<ColumnInfo> = result
            .columns
            .iter()
            .zip(&result.types)
            .map(|(name, type_name)| ColumnInfo {
                name: name.clone(),
                type_name: type_name.clone(),
            })
            .collect();
        self.store.mark_run_completed(
            run.id,
            result.row_count as i64,
            &columns,
            &hash,
            duration_ms,
        )?;
        info!(
            run_id = run.id,
            report_id = report.id,
            rows = result.row_count,
            duration_ms,
            "run completed"
        );

        if schedule.recipients.is_empty() {
            return Ok(());
        }
        let Some(ref notifier) = self.notifier else {
            warn!(
                schedule_id = schedule.id,
                "schedule has recipients but no outbox is configured, delivery skipped"
            );
            return Ok(());
        };
        let attachment = render_csv(&result.columns, &result.rows)?;
        let message = build_message(
            &report.name,
            &schedule.recipients,
            &result.columns,
            &result.rows,
            result.row_count,
            schedule.max_inline_rows,
            attachment,
        );
        if let Err(e) = notifier.send(&message) {
            warn!(schedule_id = schedule.id, error = %e, "delivery failed");
        }
        Ok(())
    }
}
