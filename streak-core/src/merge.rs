//! Reconciliation of a cached calendar with a freshly fetched one.
//!
//! The incoming calendar is authoritative for every date it covers and
//! dictates the week structure; the existing calendar only fills dates the
//! incoming one does not carry. The total is always recomputed.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate};

use crate::calendar::{ContributionCalendar, ContributionDay, Week};

type WeekFrames = BTreeMap<NaiveDate, BTreeMap<NaiveDate, ContributionDay>>;

/// Find the frame whose seven-day span contains `date`.
fn frame_containing(frames: &WeekFrames, date: NaiveDate) -> Option<NaiveDate> {
    frames
        .range(..=date)
        .next_back()
        .map(|(start, _)| *start)
        .filter(|start| date < *start + Duration::days(7))
}

/// Merge `incoming` over `existing`.
///
/// Inputs are expected to be well formed (chronological, non-empty weeks).
/// For such inputs `merge(x, x) == x`.
pub fn merge(existing: &ContributionCalendar, incoming: &ContributionCalendar) -> ContributionCalendar {
    let mut frames: WeekFrames = BTreeMap::new();
    let mut covered: HashSet<NaiveDate> = HashSet::new();

    for week in &incoming.weeks {
        let frame = frames.entry(week.first_day).or_default();
        for day in &week.contribution_days {
            // Incoming carries the count; the level is re-derived from it.
            covered.insert(day.date);
            frame.insert(day.date, ContributionDay::new(day.date, day.count));
        }
    }

    // Dates only the cache knows about keep their cached value.
    for week in &existing.weeks {
        for day in &week.contribution_days {
            if covered.contains(&day.date) {
                continue;
            }
            let start = frame_containing(&frames, day.date).unwrap_or(week.first_day);
            frames
                .entry(start)
                .or_default()
                .insert(day.date, ContributionDay::new(day.date, day.count));
        }
    }

    let weeks = frames
        .into_iter()
        .filter(|(_, days)| !days.is_empty())
        .map(|(first_day, days)| Week {
            first_day,
            contribution_days: days.into_values().collect(),
        })
        .collect();

    let months = if incoming.months.is_empty() {
        existing.months.clone()
    } else {
        incoming.months.clone()
    };

    let mut merged = ContributionCalendar {
        total_contributions: 0,
        weeks,
        months,
    };
    merged.recompute_total();
    merged
}
