//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Each field: *, */N, N, A-B, A-B/N, and comma lists of those.
//! Day-of-week: 0-6 with 0 = Sunday (7 is accepted as Sunday too).
//! When both DOM and DOW are restricted, either one matching is enough.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use taskmesh_core::error::{Result, TaskMeshError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TaskMeshError::Config(format!(
                "Invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |i: usize, min: u32, max: u32| {
            parse_field(parts[i], min, max).ok_or_else(|| {
                TaskMeshError::Config(format!(
                    "Invalid cron field '{}' in '{expression}'",
                    parts[i]
                ))
            })
        };

        let mut days_of_week = field(4, 0, 7)?;
        if days_of_week.contains(&7) {
            days_of_week.retain(|d| *d != 7);
            if !days_of_week.contains(&0) {
                days_of_week.push(0);
            }
        }

        Ok(Self {
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            days_of_month: field(2, 1, 31)?,
            months: field(3, 1, 12)?,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(&t.day());
        let dow = self.days_of_week.contains(&t.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`, searching up to a year ahead.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after + Duration::minutes(1);
        let mut candidate = start.with_second(0)?.with_nanosecond(0)?;
        let limit = after + Duration::days(366);

        while candidate <= limit {
            if !self.months.contains(&candidate.month()) || !self.day_matches(&candidate) {
                // skip to the next midnight
                candidate = (candidate + Duration::days(1))
                    .with_hour(0)?
                    .with_minute(0)?;
                continue;
            }
            if !self.hours.contains(&candidate.hour()) {
                candidate = (candidate + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if self.minutes.contains(&candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse a cron expression and compute the next run time.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part.trim(), min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() { None } else { Some(values) }
}

/// One list element: `*`, `N`, `A-B`, optionally followed by `/STEP`.
fn parse_part(part: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (part, 1),
    };
    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse().ok()?, b.parse().ok()?)
    } else {
        let n: u32 = range.parse().ok()?;
        // "N/STEP" runs from N to the field max
        if part.contains('/') { (n, max) } else { (n, n) }
    };
    if lo < min || hi > max || lo > hi {
        return None;
    }
    Some((lo..=hi).step_by(step).collect())
}
