//! Field parsers for the five positions of a scheduling sub-pattern.
//!
//! Every field is expanded to a [`FieldSet`] at parse time, so matching is a
//! plain bit test. Value parsing is a table of pure functions indexed by
//! position ([`FIELD_SPECS`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MONTH_ALIASES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const DAY_OF_WEEK_ALIASES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Literal accepted in the day-of-month field for "last day of the month"
pub const LAST_DAY_OF_MONTH: &str = "L";

/// Position of a field inside a sub-pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    pub const ORDER: [FieldKind; 5] = [
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
    ];

    pub fn spec(&self) -> &'static FieldSpec {
        &FIELD_SPECS[*self as usize]
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        };
        f.write_str(name)
    }
}

/// Why a single field failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("empty element list")]
    EmptyList,

    #[error("empty list element")]
    EmptyElement,

    #[error("invalid value '{0}'")]
    InvalidValue(String),

    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },

    #[error("invalid divisor '{0}', expected an integer >= 1")]
    InvalidDivisor(String),

    #[error("malformed element '{0}'")]
    Malformed(String),
}

/// Value parser for one field position
pub type ValueParser = fn(&str) -> Result<u32, FieldError>;

/// Domain and value parser of one field position
#[derive(Debug)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub min: u32,
    pub max: u32,
    pub parse_value: ValueParser,
}

/// Indexed by `FieldKind as usize`
pub static FIELD_SPECS: [FieldSpec; 5] = [
    FieldSpec {
        kind: FieldKind::Minute,
        min: 0,
        max: 59,
        parse_value: parse_minute,
    },
    FieldSpec {
        kind: FieldKind::Hour,
        min: 0,
        max: 23,
        parse_value: parse_hour,
    },
    FieldSpec {
        kind: FieldKind::DayOfMonth,
        min: 1,
        max: 31,
        parse_value: parse_day_of_month,
    },
    FieldSpec {
        kind: FieldKind::Month,
        min: 1,
        max: 12,
        parse_value: parse_month,
    },
    FieldSpec {
        kind: FieldKind::DayOfWeek,
        min: 0,
        max: 6,
        parse_value: parse_day_of_week,
    },
];

fn parse_numeric(value: &str, min: u32, max: u32) -> Result<u32, FieldError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::InvalidValue(value.to_string()));
    }
    let parsed: u32 = value
        .parse()
        .map_err(|_| FieldError::InvalidValue(value.to_string()))?;
    if parsed < min || parsed > max {
        return Err(FieldError::OutOfRange {
            value: parsed,
            min,
            max,
        });
    }
    Ok(parsed)
}

fn parse_alias(value: &str, aliases: &[&str], offset: u32) -> Option<u32> {
    aliases
        .iter()
        .position(|alias| alias.eq_ignore_ascii_case(value))
        .map(|index| index as u32 + offset)
}

fn parse_minute(value: &str) -> Result<u32, FieldError> {
    parse_numeric(value, 0, 59)
}

fn parse_hour(value: &str) -> Result<u32, FieldError> {
    parse_numeric(value, 0, 23)
}

fn parse_day_of_month(value: &str) -> Result<u32, FieldError> {
    parse_numeric(value, 1, 31)
}

fn parse_month(value: &str) -> Result<u32, FieldError> {
    match parse_alias(value, &MONTH_ALIASES, 1) {
        Some(month) => Ok(month),
        None => parse_numeric(value, 1, 12),
    }
}

// 7 is accepted as a second spelling of Sunday and folded into 0.
fn parse_day_of_week(value: &str) -> Result<u32, FieldError> {
    match parse_alias(value, &DAY_OF_WEEK_ALIASES, 0) {
        Some(day) => Ok(day),
        None => parse_numeric(value, 0, 7).map(|day| day % 7),
    }
}

/// Set of integers in `[0, 63]` stored as a bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u64);

impl FieldSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, value: u32) {
        debug_assert!(value < 64);
        self.0 |= 1 << value;
    }

    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(move |value| self.contains(*value))
    }
}

impl FromIterator<u32> for FieldSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// A parsed field: the expanded value set plus the last-day marker, which
/// only the day-of-month field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMatcher {
    pub values: FieldSet,
    pub last_day_of_month: bool,
}

impl FieldMatcher {
    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(value)
    }
}

/// Parse one comma-separated field for the given position.
pub fn parse_field(kind: FieldKind, field: &str) -> Result<FieldMatcher, FieldError> {
    if field.is_empty() {
        return Err(FieldError::EmptyList);
    }

    let spec = kind.spec();
    let mut values = FieldSet::empty();
    let mut last_day_of_month = false;

    for element in field.split(',') {
        if element.is_empty() {
            return Err(FieldError::EmptyElement);
        }
        if kind == FieldKind::DayOfMonth && element.eq_ignore_ascii_case(LAST_DAY_OF_MONTH) {
            last_day_of_month = true;
            continue;
        }
        for value in parse_element(spec, element)? {
            values.insert(value);
        }
    }

    Ok(FieldMatcher {
        values,
        last_day_of_month,
    })
}

/// Expand one list element (`*`, `v`, `a-b`, optionally `/c`) in order.
fn parse_element(spec: &FieldSpec, element: &str) -> Result<Vec<u32>, FieldError> {
    let (range, divisor) = match element.split_once('/') {
        Some((range, divisor)) => (range, Some(parse_divisor(divisor)?)),
        None => (element, None),
    };
    if range.is_empty() || range.contains('/') {
        return Err(FieldError::Malformed(element.to_string()));
    }

    let expanded = expand_range(spec, range)?;
    Ok(match divisor {
        Some(step) => expanded.into_iter().step_by(step).collect(),
        None => expanded,
    })
}

fn parse_divisor(divisor: &str) -> Result<usize, FieldError> {
    if divisor.is_empty() || !divisor.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::InvalidDivisor(divisor.to_string()));
    }
    match divisor.parse::<usize>() {
        Ok(step) if step >= 1 => Ok(step),
        _ => Err(FieldError::InvalidDivisor(divisor.to_string())),
    }
}

fn expand_range(spec: &FieldSpec, range: &str) -> Result<Vec<u32>, FieldError> {
    if range == "*" {
        return Ok((spec.min..=spec.max).collect());
    }

    let Some((start, end)) = range.split_once('-') else {
        return Ok(vec![(spec.parse_value)(range)?]);
    };
    if start.is_empty() || end.is_empty() {
        return Err(FieldError::Malformed(range.to_string()));
    }

    let start = (spec.parse_value)(start)?;
    // "5-7" and "0-7" end on Sunday; expand before folding 7 to 0.
    let end = match (spec.kind, end) {
        (FieldKind::DayOfWeek, "7") => 7,
        _ => (spec.parse_value)(end)?,
    };

    let values = if start <= end {
        (start..=end).map(|value| value % (spec.max + 1)).collect()
    } else {
        // Descending ranges wrap around the domain.
        (start..=spec.max).chain(spec.min..=end).collect()
    };
    Ok(values)
}
