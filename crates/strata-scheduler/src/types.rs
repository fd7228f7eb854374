use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ScheduleError;

/// A wall-clock time of day ("HH:MM"), minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid time of day: {s:?} (expected HH:MM)"))?;
        let hour: u8 = h
            .parse()
            .map_err(|_| format!("invalid hour in time of day: {s:?}"))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| format!("invalid minute in time of day: {s:?}"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("time of day out of range: {s:?}"));
        }
        Ok(Self { hour, minute })
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Unit for `interval` schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

/// Weekday names as they appear in schedule documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekdayName {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl WeekdayName {
    /// 0 = Monday … 6 = Sunday, matching chrono's `num_days_from_monday`.
    pub fn num_days_from_monday(self) -> u32 {
        match self {
            Self::Monday => 0,
            Self::Tuesday => 1,
            Self::Wednesday => 2,
            Self::Thursday => 3,
            Self::Friday => 4,
            Self::Saturday => 5,
            Self::Sunday => 6,
        }
    }
}

/// Monthly pattern anchors. A "working day" excludes Saturday and Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthPattern {
    FirstWorkingDay,
    LastWorkingDay,
    FirstDay,
    LastDay,
}

/// Recurrence definition — a closed tagged union, one case per kind.
///
/// Stored as a JSON document (`{"type": "daily", "at": "08:00"}`); parsed
/// and validated at the metadata-store boundary so the core never handles
/// a raw dynamic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleDefinition {
    /// Every `every` units. Day-granularity intervals may carry an anchor
    /// time of day the candidate snaps to.
    Interval {
        every: u32,
        unit: IntervalUnit,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<TimeOfDay>,
    },

    /// One or more times of day, every day. Accepts a single "HH:MM"
    /// string or a list of them.
    Daily {
        #[serde(deserialize_with = "one_or_many_times")]
        at: Vec<TimeOfDay>,
    },

    /// A set of weekdays at one time of day.
    Weekly {
        days: Vec<WeekdayName>,
        at: TimeOfDay,
    },

    /// A fixed day of month (1–31, or `-1` for the last day), clamped to
    /// the actual length of each candidate month.
    MonthlyDay { day: i32, at: TimeOfDay },

    /// A positional anchor within the month.
    MonthlyPattern { pattern: MonthPattern, at: TimeOfDay },

    /// A single fixed instant.
    OneTime { datetime: DateTime<Utc> },
}

fn one_or_many_times<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<TimeOfDay>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(TimeOfDay),
        Many(Vec<TimeOfDay>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(t) => vec![t],
        OneOrMany::Many(v) => v,
    })
}

impl ScheduleDefinition {
    /// Parse and validate a JSON schedule document.
    pub fn parse(json: &str) -> crate::error::Result<Self> {
        let definition: Self = serde_json::from_str(json)
            .map_err(|e| ScheduleError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Reject documents that parse but can never fire sensibly.
    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            Self::Interval { every, .. } if *every == 0 => Err(ScheduleError::InvalidDefinition(
                "interval 'every' must be at least 1".to_string(),
            )),
            Self::Daily { at } if at.is_empty() => Err(ScheduleError::InvalidDefinition(
                "daily schedule needs at least one time of day".to_string(),
            )),
            Self::Weekly { days, .. } if days.is_empty() => Err(
                ScheduleError::InvalidDefinition("weekly schedule needs at least one day".to_string()),
            ),
            Self::MonthlyDay { day, .. } if *day != -1 && !(1..=31).contains(day) => {
                Err(ScheduleError::InvalidDefinition(format!(
                    "monthly day must be 1-31 or -1 for the last day, got {day}"
                )))
            }
            _ => Ok(()),
        }
    }
}
