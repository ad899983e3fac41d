//! Cron schedules evaluated in an IANA timezone.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::TriggerError;

/// A compiled cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
    tz: Tz,
}

impl CronSchedule {
    /// Compile `expression` for evaluation in `timezone`.
    ///
    /// Classic five-field expressions (`min hour dom mon dow`) get a zero
    /// seconds field prepended; six- and seven-field expressions are used
    /// as written.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, TriggerError> {
        let normalized = normalize(expression);
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| TriggerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| TriggerError::InvalidTimezone(timezone.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            tz,
        })
    }

    /// The expression as written in the descriptor.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next matching instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.schedule
            .after(&local)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

fn normalize(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Time left until `target`, zero if it already passed.
pub fn delay_until(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn five_field_daily_in_utc() {
        let s = CronSchedule::parse("0 9 * * *", "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap())
        );

        // Exactly at the match: the next one is tomorrow.
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        assert_eq!(
            s.next_after(at),
            Some(Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn evaluated_in_named_timezone() {
        let s = CronSchedule::parse("0 9 * * *", "America/New_York").unwrap();
        // 2026-10-19 is daylight time in New York (UTC-4).
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn six_field_passes_through() {
        let s = CronSchedule::parse("*/5 * * * * *", "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(
            s.next_after(now),
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 5).unwrap())
        );
        assert_eq!(s.expression(), "*/5 * * * * *");
    }

    #[test]
    fn invalid_expression() {
        let err = CronSchedule::parse("not a cron", "UTC").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidCron { .. }));
    }

    #[test]
    fn invalid_timezone() {
        let err = CronSchedule::parse("0 9 * * *", "Mars/Olympus").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidTimezone(_)));
    }

    #[test]
    fn delay_never_negative() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 10).unwrap();
        let past = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(delay_until(past, now), Duration::ZERO);
        assert_eq!(delay_until(now, past), Duration::from_secs(10));
    }
}
