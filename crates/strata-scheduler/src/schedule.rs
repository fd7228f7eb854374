use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::types::{IntervalUnit, MonthPattern, ScheduleDefinition, TimeOfDay, WeekdayName};

/// Compute the next UTC occurrence of `definition` strictly after `after`.
///
/// Returns `None` when the schedule is exhausted (a `one_time` whose
/// instant has passed) or when no candidate exists within the bounded
/// month scan.
pub fn next_run(definition: &ScheduleDefinition, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match definition {
        ScheduleDefinition::Interval { every, unit, at } => {
            next_interval(*every, *unit, *at, after)
        }
        ScheduleDefinition::Daily { at } => next_daily(at, after),
        ScheduleDefinition::Weekly { days, at } => next_weekly(days, *at, after),
        ScheduleDefinition::MonthlyDay { day, at } => next_monthly(after, *at, |year, month| {
            let last = days_in_month(year, month)?;
            if *day == -1 {
                Some(last)
            } else {
                Some((*day as u32).min(last))
            }
        }),
        ScheduleDefinition::MonthlyPattern { pattern, at } => {
            next_monthly(after, *at, |year, month| match pattern {
                MonthPattern::FirstWorkingDay => first_working_day(year, month),
                MonthPattern::LastWorkingDay => last_working_day(year, month),
                MonthPattern::FirstDay => Some(1),
                MonthPattern::LastDay => days_in_month(year, month),
            })
        }
        ScheduleDefinition::OneTime { datetime } => {
            if *datetime > after {
                Some(*datetime)
            } else {
                None
            }
        }
    }
}

/// Compute the next `n` occurrences starting after `from`.
///
/// Each step advances the reference instant to result + 1 second, so every
/// returned instant is strictly later than the previous. Stops early when
/// the schedule is exhausted.
pub fn next_n_runs(
    definition: &ScheduleDefinition,
    from: DateTime<Utc>,
    n: usize,
) -> Vec<DateTime<Utc>> {
    let mut results = Vec::with_capacity(n);
    let mut current = from;

    for _ in 0..n {
        let Some(next) = next_run(definition, current) else {
            break;
        };
        results.push(next);
        current = next + Duration::seconds(1);
    }

    results
}

/// Candidate instant on the same calendar day as `dt`, at `t`.
fn at_time(dt: DateTime<Utc>, t: TimeOfDay) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        dt.year(),
        dt.month(),
        dt.day(),
        t.hour as u32,
        t.minute as u32,
        0,
    )
    .single()
}

fn next_interval(
    every: u32,
    unit: IntervalUnit,
    at: Option<TimeOfDay>,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let delta = match unit {
        IntervalUnit::Minutes => Duration::minutes(every as i64),
        IntervalUnit::Hours => Duration::hours(every as i64),
        IntervalUnit::Days => Duration::days(every as i64),
    };
    let mut candidate = after + delta;

    // Day-granularity intervals with an anchor snap to that time of day,
    // advancing a day if the snap landed at or before the reference.
    if unit == IntervalUnit::Days {
        if let Some(t) = at {
            candidate = at_time(candidate, t)?;
            if candidate <= after {
                candidate += Duration::days(1);
            }
        }
    }

    Some(candidate)
}

fn next_daily(times: &[TimeOfDay], after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    times
        .iter()
        .filter_map(|t| {
            let candidate = at_time(after, *t)?;
            if candidate <= after {
                Some(candidate + Duration::days(1))
            } else {
                Some(candidate)
            }
        })
        .min()
}

fn next_weekly(
    days: &[WeekdayName],
    at: TimeOfDay,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // Scan today plus the next 7 days for the first matching weekday whose
    // candidate instant is strictly after the reference.
    for day_offset in 0..8 {
        let date = after + Duration::days(day_offset);
        let dow = date.weekday().num_days_from_monday();
        if days.iter().any(|d| d.num_days_from_monday() == dow) {
            let candidate = at_time(date, at)?;
            if candidate > after {
                return Some(candidate);
            }
        }
    }
    None
}

/// Forward month scan, bounded to 13 iterations so pathological inputs
/// always terminate. `target_day` picks the day within a candidate month.
fn next_monthly(
    after: DateTime<Utc>,
    at: TimeOfDay,
    target_day: impl Fn(i32, u32) -> Option<u32>,
) -> Option<DateTime<Utc>> {
    let mut year = after.year();
    let mut month = after.month();

    for _ in 0..13 {
        if let Some(day) = target_day(year, month) {
            let candidate = Utc
                .with_ymd_and_hms(year, month, day, at.hour as u32, at.minute as u32, 0)
                .single()?;
            if candidate > after {
                return Some(candidate);
            }
        }

        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    None
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

fn first_working_day(year: i32, month: u32) -> Option<u32> {
    let last = days_in_month(year, month)?;
    (1..=last).find(|&day| is_working_day(year, month, day))
}

fn last_working_day(year: i32, month: u32) -> Option<u32> {
    let last = days_in_month(year, month)?;
    (1..=last).rev().find(|&day| is_working_day(year, month, day))
}

fn is_working_day(year: i32, month: u32, day: u32) -> bool {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.weekday().num_days_from_monday() < 5)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn at(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    // --- interval ---

    #[test]
    fn interval_hourly_advances_one_hour() {
        let def = ScheduleDefinition::Interval {
            every: 1,
            unit: IntervalUnit::Hours,
            at: None,
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 10, 0)),
            Some(utc(2026, 1, 1, 11, 0))
        );
    }

    #[test]
    fn interval_minutes() {
        let def = ScheduleDefinition::Interval {
            every: 15,
            unit: IntervalUnit::Minutes,
            at: None,
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 10, 50)),
            Some(utc(2026, 1, 1, 11, 5))
        );
    }

    #[test]
    fn interval_days_snaps_to_anchor_time() {
        let def = ScheduleDefinition::Interval {
            every: 1,
            unit: IntervalUnit::Days,
            at: Some(at("06:00")),
        };
        // after + 1 day lands on Jan 2, snapped to 06:00 — strictly after.
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 10, 0)),
            Some(utc(2026, 1, 2, 6, 0))
        );
    }

    #[test]
    fn interval_days_snap_at_or_before_reference_advances_a_day() {
        let def = ScheduleDefinition::Interval {
            every: 1,
            unit: IntervalUnit::Days,
            at: Some(at("06:00")),
        };
        let reference = utc(2026, 1, 1, 6, 0);
        let next = next_run(&def, reference).unwrap();
        assert!(next > reference);
        assert_eq!(next, utc(2026, 1, 2, 6, 0));
    }

    // --- daily ---

    #[test]
    fn daily_past_time_rolls_to_tomorrow() {
        let def = ScheduleDefinition::Daily { at: vec![at("08:00")] };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 9, 0)),
            Some(utc(2026, 1, 2, 8, 0))
        );
    }

    #[test]
    fn daily_future_time_fires_today() {
        let def = ScheduleDefinition::Daily { at: vec![at("08:00")] };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 7, 0)),
            Some(utc(2026, 1, 1, 8, 0))
        );
    }

    #[test]
    fn daily_exact_time_is_not_due_again() {
        let def = ScheduleDefinition::Daily { at: vec![at("08:00")] };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 8, 0)),
            Some(utc(2026, 1, 2, 8, 0))
        );
    }

    #[test]
    fn daily_multiple_times_picks_earliest_candidate() {
        let def = ScheduleDefinition::Daily {
            at: vec![at("08:00"), at("16:00")],
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 9, 0)),
            Some(utc(2026, 1, 1, 16, 0))
        );
        assert_eq!(
            next_run(&def, utc(2026, 1, 1, 17, 0)),
            Some(utc(2026, 1, 2, 8, 0))
        );
    }

    // --- weekly ---

    #[test]
    fn weekly_after_tuesday_finds_following_monday() {
        // 2026-01-06 is a Tuesday.
        let def = ScheduleDefinition::Weekly {
            days: vec![WeekdayName::Monday],
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 6, 9, 0)),
            Some(utc(2026, 1, 12, 8, 0))
        );
    }

    #[test]
    fn weekly_same_day_later_time_fires_today() {
        // 2026-01-05 is a Monday.
        let def = ScheduleDefinition::Weekly {
            days: vec![WeekdayName::Monday],
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 5, 7, 0)),
            Some(utc(2026, 1, 5, 8, 0))
        );
        // At or past the time, roll a full week.
        assert_eq!(
            next_run(&def, utc(2026, 1, 5, 8, 0)),
            Some(utc(2026, 1, 12, 8, 0))
        );
    }

    #[test]
    fn weekly_multiple_days_picks_nearest() {
        let def = ScheduleDefinition::Weekly {
            days: vec![WeekdayName::Monday, WeekdayName::Thursday],
            at: at("12:00"),
        };
        // Tuesday → Thursday the same week.
        assert_eq!(
            next_run(&def, utc(2026, 1, 6, 9, 0)),
            Some(utc(2026, 1, 8, 12, 0))
        );
    }

    // --- monthly day ---

    #[test]
    fn monthly_day_clamps_to_month_length() {
        let def = ScheduleDefinition::MonthlyDay {
            day: 31,
            at: at("08:00"),
        };
        // April has 30 days.
        assert_eq!(
            next_run(&def, utc(2026, 4, 1, 0, 0)),
            Some(utc(2026, 4, 30, 8, 0))
        );
        // February 2026 has 28 days.
        assert_eq!(
            next_run(&def, utc(2026, 2, 1, 0, 0)),
            Some(utc(2026, 2, 28, 8, 0))
        );
    }

    #[test]
    fn monthly_day_sentinel_means_last_day() {
        let def = ScheduleDefinition::MonthlyDay {
            day: -1,
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 2, 10, 0, 0)),
            Some(utc(2026, 2, 28, 8, 0))
        );
    }

    #[test]
    fn monthly_day_rolls_to_next_month_when_passed() {
        let def = ScheduleDefinition::MonthlyDay {
            day: 5,
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 1, 5, 8, 0)),
            Some(utc(2026, 2, 5, 8, 0))
        );
    }

    // --- monthly pattern ---

    #[test]
    fn first_working_day_skips_a_weekend_start() {
        // 2026-08-01 is a Saturday; the first working day is Monday the 3rd.
        let def = ScheduleDefinition::MonthlyPattern {
            pattern: MonthPattern::FirstWorkingDay,
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 7, 31, 12, 0)),
            Some(utc(2026, 8, 3, 8, 0))
        );
    }

    #[test]
    fn last_working_day_backs_off_a_weekend_end() {
        // 2026-05-31 is a Sunday; the last working day is Friday the 29th.
        let def = ScheduleDefinition::MonthlyPattern {
            pattern: MonthPattern::LastWorkingDay,
            at: at("17:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 5, 10, 0, 0)),
            Some(utc(2026, 5, 29, 17, 0))
        );
    }

    #[test]
    fn first_and_last_day_patterns() {
        let first = ScheduleDefinition::MonthlyPattern {
            pattern: MonthPattern::FirstDay,
            at: at("00:30"),
        };
        assert_eq!(
            next_run(&first, utc(2026, 1, 15, 0, 0)),
            Some(utc(2026, 2, 1, 0, 30))
        );

        let last = ScheduleDefinition::MonthlyPattern {
            pattern: MonthPattern::LastDay,
            at: at("23:00"),
        };
        assert_eq!(
            next_run(&last, utc(2026, 2, 1, 0, 0)),
            Some(utc(2026, 2, 28, 23, 0))
        );
    }

    #[test]
    fn monthly_scan_crosses_year_boundary() {
        let def = ScheduleDefinition::MonthlyDay {
            day: 1,
            at: at("08:00"),
        };
        assert_eq!(
            next_run(&def, utc(2026, 12, 15, 0, 0)),
            Some(utc(2027, 1, 1, 8, 0))
        );
    }

    // --- one time ---

    #[test]
    fn one_time_past_is_exhausted() {
        let def = ScheduleDefinition::OneTime {
            datetime: utc(2025, 6, 1, 9, 0),
        };
        assert_eq!(next_run(&def, utc(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn one_time_future_fires_once() {
        let when = utc(2026, 6, 1, 9, 0);
        let def = ScheduleDefinition::OneTime { datetime: when };
        assert_eq!(next_run(&def, utc(2026, 1, 1, 0, 0)), Some(when));
        // The instant itself does not count as strictly after.
        assert_eq!(next_run(&def, when), None);
    }

    // --- next_n_runs ---

    #[test]
    fn next_n_runs_advances_past_each_result() {
        let def = ScheduleDefinition::Daily { at: vec![at("08:00")] };
        let runs = next_n_runs(&def, utc(2026, 1, 1, 9, 0), 3);
        assert_eq!(
            runs,
            vec![
                utc(2026, 1, 2, 8, 0),
                utc(2026, 1, 3, 8, 0),
                utc(2026, 1, 4, 8, 0),
            ]
        );
    }

    #[test]
    fn next_n_runs_stops_when_exhausted() {
        let def = ScheduleDefinition::OneTime {
            datetime: utc(2026, 6, 1, 9, 0),
        };
        let runs = next_n_runs(&def, utc(2026, 1, 1, 0, 0), 5);
        assert_eq!(runs, vec![utc(2026, 6, 1, 9, 0)]);
    }
}
