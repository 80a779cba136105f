//! Cron-5 schedule parsing (spec.md §9 design note): "adopt a standard
//! 5-field semantics... keep the parser total with explicit validation
//! errors." No step/list extensions; every field is `*` or a literal
//! integer in range.
//!
//! `examples/original_source/core/task_manager.py`'s `_schedule_task`
//! instead hands the five fields to the `schedule` library one at a
//! time (converting month/weekday numbers to names as it goes); this
//! parses the whole expression up front into a value the scheduler loop
//! can just compare a timestamp against.

use chrono::{DateTime, Datelike, Timelike, Utc};
use wiseflow_core::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    Value(u32),
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, name: &str) -> EngineResult<Self> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        let value: u32 = raw.parse().map_err(|_| EngineError::Validation {
            message: format!("cron {name} field {raw:?} is not '*' or an integer"),
        })?;
        if value < min || value > max {
            return Err(EngineError::Validation {
                message: format!("cron {name} field {value} out of range {min}..={max}"),
            });
        }
        Ok(Field::Value(value))
    }

    fn matches(self, actual: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Value(v) => v == actual,
        }
    }
}

/// A parsed `minute hour dom month dow` expression. Day-of-week follows
/// the common cron convention: `0` is Sunday, `6` is Saturday.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
    source: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> EngineResult<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(EngineError::Validation {
                message: format!("cron expression {expr:?} must have 5 fields, got {}", parts.len()),
            });
        }

        Ok(Self {
            minute: Field::parse(parts[0], 0, 59, "minute")?,
            hour: Field::parse(parts[1], 0, 23, "hour")?,
            day_of_month: Field::parse(parts[2], 1, 31, "day-of-month")?,
            month: Field::parse(parts[3], 1, 12, "month")?,
            day_of_week: Field::parse(parts[4], 0, 6, "day-of-week")?,
            source: expr.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("* * * * * *").is_err());
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range_fields() {
        assert!(CronSchedule::parse("sixty * * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("0 24 * * *").is_err());
        assert!(CronSchedule::parse("0 0 32 * *").is_err());
        assert!(CronSchedule::parse("0 0 1 13 *").is_err());
        assert!(CronSchedule::parse("0 0 1 1 7").is_err());
    }

    #[test]
    fn every_minute_matches_any_timestamp() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 13, 45, 0).unwrap();
        assert!(schedule.matches(at));
    }

    #[test]
    fn literal_fields_match_only_the_exact_time() {
        let schedule = CronSchedule::parse("30 9 * * *").unwrap();
        let hit = Utc.with_ymd_and_hms(2026, 7, 28, 9, 30, 0).unwrap();
        let miss = Utc.with_ymd_and_hms(2026, 7, 28, 9, 31, 0).unwrap();
        assert!(schedule.matches(hit));
        assert!(!schedule.matches(miss));
    }
}
