use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

/// Any instant between 2000-01-01 and 2099-12-31, minute aligned.
pub fn minute_instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    let start = Utc
        .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .expect("valid start")
        .timestamp()
        / 60;
    let end = Utc
        .with_ymd_and_hms(2099, 12, 31, 23, 59, 0)
        .single()
        .expect("valid end")
        .timestamp()
        / 60;
    (start..=end).prop_map(|minutes| {
        DateTime::from_timestamp(minutes * 60, 0).expect("timestamp in range")
    })
}

/// Step values that divide evenly into an hour or not.
pub fn minute_step_strategy() -> impl Strategy<Value = u32> {
    1u32..=59
}

/// A single-value field for each of the five positions.
pub fn literal_pattern_strategy() -> impl Strategy<Value = (u32, u32, u32, u32, u32)> {
    (0u32..60, 0u32..24, 1u32..=28, 1u32..=12, 0u32..7)
}
