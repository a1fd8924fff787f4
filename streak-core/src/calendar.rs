//! Contribution calendar entity types.
//!
//! A calendar is a year of per-day activity counts grouped into weeks that
//! start on Sunday, plus the month summaries the origin reports alongside.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Highest bucket a day can land in.
pub const MAX_LEVEL: u8 = 4;

/// Bucket a raw contribution count into a display level (0-4).
///
/// 0 → 0, 1-3 → 1, 4-6 → 2, 7-10 → 3, anything above → 4.
pub fn level_for_count(count: u32) -> u8 {
    match count {
        0 => 0,
        1..=3 => 1,
        4..=6 => 2,
        7..=10 => 3,
        _ => MAX_LEVEL,
    }
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// A single day of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    pub date: NaiveDate,
    #[serde(alias = "contributionCount")]
    pub count: u32,
    pub level: u8,
}

impl ContributionDay {
    /// Create a day with its level derived from `count`.
    pub fn new(date: NaiveDate, count: u32) -> Self {
        Self {
            date,
            count,
            level: level_for_count(count),
        }
    }

    /// Returns true if the stored level agrees with the count.
    pub fn level_matches_count(&self) -> bool {
        self.level == level_for_count(self.count)
    }
}

/// Seven (or fewer, at the edges of a year) chronological days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Week {
    pub first_day: NaiveDate,
    pub contribution_days: Vec<ContributionDay>,
}

impl Week {
    /// Returns true if `date` falls inside the seven days starting at `first_day`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.first_day && date < self.first_day + Duration::days(7)
    }
}

/// Per-month summary record as reported by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub name: String,
    pub year: i32,
    pub first_day: NaiveDate,
    pub total_weeks: u32,
}

/// A year of contribution activity.
///
/// `total_contributions` always equals the sum of `count` over all days;
/// anything that changes days must call [`ContributionCalendar::recompute_total`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    pub total_contributions: u64,
    pub weeks: Vec<Week>,
    #[serde(default)]
    pub months: Vec<MonthSummary>,
}

impl ContributionCalendar {
    /// Build a calendar from loose days, grouping them into Sunday-start weeks.
    ///
    /// Later duplicates of a date replace earlier ones. The total is computed
    /// from the days, never supplied.
    pub fn from_days<I>(days: I, months: Vec<MonthSummary>) -> Self
    where
        I: IntoIterator<Item = ContributionDay>,
    {
        let mut by_week: BTreeMap<NaiveDate, BTreeMap<NaiveDate, ContributionDay>> =
            BTreeMap::new();
        for day in days {
            by_week
                .entry(week_start(day.date))
                .or_default()
                .insert(day.date, day);
        }

        let weeks = by_week
            .into_iter()
            .map(|(first_day, days)| Week {
                first_day,
                contribution_days: days.into_values().collect(),
            })
            .collect();

        let mut calendar = Self {
            total_contributions: 0,
            weeks,
            months,
        };
        calendar.recompute_total();
        calendar
    }

    /// Iterate over every day in week order.
    pub fn days(&self) -> impl Iterator<Item = &ContributionDay> {
        self.weeks.iter().flat_map(|w| w.contribution_days.iter())
    }

    /// Number of days present.
    pub fn day_count(&self) -> usize {
        self.weeks.iter().map(|w| w.contribution_days.len()).sum()
    }

    /// Sum of all day counts.
    pub fn sum_of_counts(&self) -> u64 {
        self.days().map(|d| u64::from(d.count)).sum()
    }

    /// Reset `total_contributions` from the days.
    pub fn recompute_total(&mut self) {
        self.total_contributions = self.sum_of_counts();
    }

    pub fn first_week_start(&self) -> Option<NaiveDate> {
        self.weeks.first().map(|w| w.first_day)
    }

    pub fn last_week_start(&self) -> Option<NaiveDate> {
        self.weeks.last().map(|w| w.first_day)
    }

    /// Look up a single day by date.
    pub fn day(&self, date: NaiveDate) -> Option<&ContributionDay> {
        self.weeks
            .iter()
            .find(|w| w.covers(date))
            .and_then(|w| w.contribution_days.iter().find(|d| d.date == date))
    }
}
