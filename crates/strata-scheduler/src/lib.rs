//! `strata-scheduler` — pure recurrence arithmetic for report schedules.
//!
//! # Schedule variants
//!
//! | Variant           | Behaviour                                              |
//! |-------------------|--------------------------------------------------------|
//! | `interval`        | Every N minutes/hours/days, optionally snapped to a time of day |
//! | `daily`           | One or more times of day, every day                    |
//! | `weekly`          | A set of weekdays at one time of day                   |
//! | `monthly_day`     | A day of month (`-1` = last day), clamped to month length |
//! | `monthly_pattern` | First/last day or first/last working day of the month  |
//! | `one_time`        | A single fixed instant, exhausted once it passes       |
//!
//! [`schedule::next_run`] is a pure function: the caller supplies the
//! reference instant, and a computed candidate is always *strictly after*
//! it — "now" never counts as due again immediately. All arithmetic is UTC.

pub mod error;
pub mod schedule;
pub mod types;

pub use error::{Result, ScheduleError};
pub use schedule::{next_n_runs, next_run};
pub use types::{IntervalUnit, MonthPattern, ScheduleDefinition, TimeOfDay, WeekdayName};
