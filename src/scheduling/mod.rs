//! Cron-like scheduling patterns used by recurring job definitions.

pub mod fields;
pub mod pattern;

pub use fields::{FieldError, FieldKind, FieldMatcher, FieldSet};
pub use pattern::{last_day_of_month, PatternError, SchedulingPattern, SubPattern};
