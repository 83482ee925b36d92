//! # Scheduling Pattern
//!
//! A crontab-like firing pattern: one or more `|`-separated sub-patterns,
//! each made of five whitespace-separated fields
//! (`minute hour day-of-month month day-of-week`). An instant matches the
//! pattern when it matches any sub-pattern.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use taskforge_core::scheduling::SchedulingPattern;
//!
//! let pattern = SchedulingPattern::parse("0 5 * * *|8 10 * * *").unwrap();
//! let instant = Utc.with_ymd_and_hms(2024, 3, 1, 10, 8, 0).unwrap();
//! assert!(pattern.matches(&Utc, instant));
//! ```

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::fields::{parse_field, FieldError, FieldKind, FieldMatcher};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("scheduling pattern is empty")]
    Empty,

    #[error("sub-pattern {index} has {found} fields, expected 5")]
    FieldCount { index: usize, found: usize },

    #[error("invalid {field} field in sub-pattern {index}: {reason}")]
    InvalidField {
        index: usize,
        field: FieldKind,
        reason: FieldError,
    },
}

/// One five-field expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPattern {
    minute: FieldMatcher,
    hour: FieldMatcher,
    day_of_month: FieldMatcher,
    month: FieldMatcher,
    day_of_week: FieldMatcher,
}

impl SubPattern {
    fn parse(index: usize, source: &str) -> Result<Self, PatternError> {
        let fields: Vec<&str> = source.split_whitespace().collect();
        if fields.len() != FieldKind::ORDER.len() {
            return Err(PatternError::FieldCount {
                index,
                found: fields.len(),
            });
        }

        let parse = |kind: FieldKind| {
            parse_field(kind, fields[kind as usize]).map_err(|reason| PatternError::InvalidField {
                index,
                field: kind,
                reason,
            })
        };

        Ok(Self {
            minute: parse(FieldKind::Minute)?,
            hour: parse(FieldKind::Hour)?,
            day_of_month: parse(FieldKind::DayOfMonth)?,
            month: parse(FieldKind::Month)?,
            day_of_week: parse(FieldKind::DayOfWeek)?,
        })
    }

    /// Match broken-down local time. `day_of_week` counts from Sunday = 0.
    pub fn matches_parts(
        &self,
        minute: u32,
        hour: u32,
        day: u32,
        month: u32,
        day_of_week: u32,
        year: i32,
    ) -> bool {
        self.minute.matches(minute)
            && self.hour.matches(hour)
            && self.month.matches(month)
            && self.day_of_week.matches(day_of_week)
            && self.matches_day_of_month(day, month, year)
    }

    fn matches_day_of_month(&self, day: u32, month: u32, year: i32) -> bool {
        self.day_of_month.matches(day)
            || (self.day_of_month.last_day_of_month && day == last_day_of_month(year, month))
    }
}

/// Parsed scheduling pattern. Keeps its source text for display and serde.
#[derive(Debug, Clone)]
pub struct SchedulingPattern {
    source: String,
    sub_patterns: Vec<SubPattern>,
}

impl SchedulingPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        let sub_patterns = pattern
            .split('|')
            .enumerate()
            .map(|(index, source)| SubPattern::parse(index, source))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: pattern.to_string(),
            sub_patterns,
        })
    }

    /// Whether `pattern` parses.
    pub fn validate(pattern: &str) -> bool {
        Self::parse(pattern).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn sub_patterns(&self) -> &[SubPattern] {
        &self.sub_patterns
    }

    /// Evaluate `instant` in time zone `tz`.
    pub fn matches<Tz: TimeZone>(&self, tz: &Tz, instant: DateTime<Utc>) -> bool {
        self.matches_local(&instant.with_timezone(tz))
    }

    /// Evaluate an instant that already carries its time zone.
    pub fn matches_local<Tz: TimeZone>(&self, local: &DateTime<Tz>) -> bool {
        let minute = local.minute();
        let hour = local.hour();
        let day = local.day();
        let month = local.month();
        let day_of_week = local.weekday().num_days_from_sunday();
        let year = local.year();

        self.sub_patterns
            .iter()
            .any(|sub| sub.matches_parts(minute, hour, day, month, day_of_week, year))
    }
}

impl PartialEq for SchedulingPattern {
    fn eq(&self, other: &Self) -> bool {
        self.sub_patterns == other.sub_patterns
    }
}

impl Eq for SchedulingPattern {}

impl fmt::Display for SchedulingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for SchedulingPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SchedulingPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for SchedulingPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

/// Last calendar day of `month` in `year`.
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}
