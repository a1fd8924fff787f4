//! Integrity and completeness checks for cached calendars.
//!
//! Everything here is a pure function over a calendar. The checksum guards
//! against corruption and schema drift, not against an adversary.

use chrono::{Duration, NaiveDate};
use sha2::{Digest, Sha256};

use crate::calendar::{ContributionCalendar, Week};
use crate::error::IntegrityViolation;

/// Share of the expected day count a year needs to count as complete.
pub const COMPLETENESS_THRESHOLD: f64 = 0.95;

/// Days in `year`: 366 for leap years, else 365.
pub fn expected_days(year: i32) -> u32 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

/// A calendar is complete when it holds at least 95% of the year's days.
pub fn is_complete(year: i32, calendar: &ContributionCalendar) -> bool {
    calendar.day_count() as f64 >= f64::from(expected_days(year)) * COMPLETENESS_THRESHOLD
}

/// Canonical summary the checksum is computed over.
fn checksum_input(calendar: &ContributionCalendar) -> String {
    let fmt_date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
    format!(
        "{}|{}|{}|{}",
        calendar.total_contributions,
        calendar.weeks.len(),
        fmt_date(calendar.first_week_start()),
        fmt_date(calendar.last_week_start()),
    )
}

/// Hex SHA-256 of the calendar's structural summary.
pub fn compute_checksum(calendar: &ContributionCalendar) -> String {
    let mut hasher = Sha256::new();
    hasher.update(checksum_input(calendar).as_bytes());
    hex::encode(hasher.finalize())
}

fn malformed(reason: impl Into<String>) -> IntegrityViolation {
    IntegrityViolation::MalformedCalendar {
        reason: reason.into(),
    }
}

fn validate_week(week: &Week) -> Result<(), IntegrityViolation> {
    if week.contribution_days.is_empty() || week.contribution_days.len() > 7 {
        return Err(malformed(format!(
            "week {} has {} days",
            week.first_day,
            week.contribution_days.len()
        )));
    }

    let week_end = week.first_day + Duration::days(7);
    let mut previous: Option<NaiveDate> = None;
    for day in &week.contribution_days {
        if day.date < week.first_day || day.date >= week_end {
            return Err(malformed(format!(
                "day {} outside week starting {}",
                day.date, week.first_day
            )));
        }
        if previous.is_some_and(|p| p >= day.date) {
            return Err(malformed(format!("days out of order at {}", day.date)));
        }
        if !day.level_matches_count() {
            return Err(malformed(format!(
                "level {} disagrees with count {} on {}",
                day.level, day.count, day.date
            )));
        }
        previous = Some(day.date);
    }
    Ok(())
}

/// Structural sanity of a calendar's weeks, months and total.
pub fn validate_calendar(calendar: &ContributionCalendar) -> Result<(), IntegrityViolation> {
    let mut previous_end: Option<NaiveDate> = None;
    for week in &calendar.weeks {
        validate_week(week)?;
        if previous_end.is_some_and(|end| week.first_day < end) {
            return Err(malformed(format!("week {} overlaps or is out of order", week.first_day)));
        }
        previous_end = Some(week.first_day + Duration::days(7));
    }

    for month in &calendar.months {
        if month.name.trim().is_empty() || month.total_weeks == 0 {
            return Err(malformed(format!("invalid month summary for {}", month.first_day)));
        }
    }

    let sum = calendar.sum_of_counts();
    if sum != calendar.total_contributions {
        return Err(malformed(format!(
            "total {} does not match day sum {}",
            calendar.total_contributions, sum
        )));
    }
    Ok(())
}

/// Compare a stored checksum against a fresh one.
pub fn verify_checksum(
    calendar: &ContributionCalendar,
    stored: &str,
) -> Result<(), IntegrityViolation> {
    let computed = compute_checksum(calendar);
    if computed == stored {
        Ok(())
    } else {
        Err(IntegrityViolation::ChecksumMismatch {
            stored: stored.to_string(),
            computed,
        })
    }
}
