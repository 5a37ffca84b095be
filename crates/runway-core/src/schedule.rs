use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use cron::Schedule;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("cron expression '{0}' has no future fire time")]
    NeverFires(String),
}

/// Accepts classic 5-field expressions by prepending a seconds field.
pub fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleZone {
    Local,
    Named(Tz),
}

impl ScheduleZone {
    pub fn parse(timezone: Option<&str>) -> Result<Self, ScheduleError> {
        match timezone {
            None => Ok(ScheduleZone::Local),
            Some(name) if name.eq_ignore_ascii_case("local") => Ok(ScheduleZone::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(ScheduleZone::Named)
                .map_err(|_| ScheduleError::UnknownTimezone(name.to_string())),
        }
    }
}

/// Parsed cron trigger evaluated in the zone it was declared for.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    zone: ScheduleZone,
}

impl CronSchedule {
    pub fn parse(expression: &str, timezone: Option<&str>) -> Result<Self, ScheduleError> {
        let normalized = normalize_cron(expression);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            expression: normalized,
            schedule,
            zone: ScheduleZone::parse(timezone)?,
        })
    }

    /// Six-field form handed to the job scheduler.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn zone(&self) -> ScheduleZone {
        self.zone
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.iter_after(after).next()
    }

    /// Fire times in `(start, end]`.
    pub fn fire_times_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.iter_after(start).take_while(|t| *t <= end).collect()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.iter_after(from).take(count).collect()
    }

    /// Fails with `NeverFires` when nothing is scheduled after `now`.
    pub fn ensure_fires_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(now)
            .ok_or_else(|| ScheduleError::NeverFires(self.expression.clone()))
    }

    fn iter_after(&self, after: DateTime<Utc>) -> Box<dyn Iterator<Item = DateTime<Utc>> + '_> {
        match self.zone {
            ScheduleZone::Local => Box::new(
                self.schedule
                    .after(&after.with_timezone(&Local))
                    .map(|t| t.with_timezone(&Utc)),
            ),
            ScheduleZone::Named(tz) => Box::new(
                self.schedule
                    .after(&after.with_timezone(&tz))
                    .map(|t| t.with_timezone(&Utc)),
            ),
        }
    }
}
