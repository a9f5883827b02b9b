//! Bulk scheduling of the provider's personal activities.
//!
//! A bulk request places one activity at the same time on many dates, either
//! listed explicitly or picked from a date range by weekday. The planner only
//! classifies; nothing is written.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::availability::{BlockedDaySet, OccupancyMap};
use crate::conflict::{classify, BlockReason, Classification};
use crate::error::{BookingError, Result};
use crate::temporal;

/// Longest date range a bulk request may span.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Allowed length of a personal activity, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ActivityDuration(u32);

impl ActivityDuration {
    pub const ALLOWED: [u32; 4] = [30, 60, 90, 120];

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl Default for ActivityDuration {
    fn default() -> Self {
        ActivityDuration(30)
    }
}

impl TryFrom<u32> for ActivityDuration {
    type Error = BookingError;

    fn try_from(minutes: u32) -> Result<Self> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(ActivityDuration(minutes))
        } else {
            Err(BookingError::Validation(format!(
                "activity duration must be one of 30, 60, 90 or 120 minutes, got {minutes}"
            )))
        }
    }
}

impl From<ActivityDuration> for u32 {
    fn from(d: ActivityDuration) -> Self {
        d.0
    }
}

/// A personal activity (study, supervision, break).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalActivity {
    pub name: String,
    #[serde(default)]
    pub duration_minutes: ActivityDuration,
}

/// How the dates of a bulk request are chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BulkDates {
    Explicit {
        dates: Vec<NaiveDate>,
    },
    /// Every date in `start..=end` falling on one of `weekdays`.
    Range {
        start: NaiveDate,
        end: NaiveDate,
        weekdays: Vec<Weekday>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub activity: PersonalActivity,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    pub dates: BulkDates,
}

/// One classified date of a bulk plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkCandidate {
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
}

impl BulkCandidate {
    pub fn is_available(&self) -> bool {
        self.classification.is_available()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkPlan {
    /// Candidates in date order, at most the cap.
    pub candidates: Vec<BulkCandidate>,
    /// Future dates dropped by the cap.
    pub truncated: usize,
    pub past_excluded: usize,
    pub duplicates_dropped: usize,
}

impl BulkPlan {
    pub fn available(&self) -> impl Iterator<Item = &BulkCandidate> {
        self.candidates.iter().filter(|c| c.is_available())
    }

    pub fn blocked(&self) -> impl Iterator<Item = &BulkCandidate> {
        self.candidates.iter().filter(|c| !c.is_available())
    }
}

/// Expand, filter and classify a bulk request.
///
/// Dates are deduplicated and sorted, dates before `today` are dropped, at
/// most `cap` remain, and each is classified with the same overlap test as
/// recurring occurrences.
///
/// # Errors
///
/// [`BookingError::Validation`] for an empty activity name, an inverted or
/// overlong range, a range without weekdays, or an empty date list.
pub fn plan_bulk(
    request: &BulkRequest,
    occupancy: &OccupancyMap,
    blocked: &BlockedDaySet,
    today: NaiveDate,
    cap: usize,
) -> Result<BulkPlan> {
    if request.activity.name.trim().is_empty() {
        return Err(BookingError::Validation("activity name is required".into()));
    }

    let (requested, dates) = expand_dates(&request.dates)?;
    let duplicates_dropped = requested - dates.len();
    let (past, future): (Vec<_>, Vec<_>) = dates.into_iter().partition(|d| *d < today);
    let truncated = future.len().saturating_sub(cap);

    let duration = request.activity.duration_minutes.minutes();
    let candidates: Vec<BulkCandidate> = future
        .into_iter()
        .take(cap)
        .map(|date| {
            let classification = classify(date, request.time, duration, occupancy, blocked);
            BulkCandidate {
                date,
                time: request.time,
                duration_minutes: duration,
                classification,
                reason: classification.reason(),
            }
        })
        .collect();

    debug!(
        activity = %request.activity.name,
        candidates = candidates.len(),
        truncated,
        past = past.len(),
        duplicates_dropped,
        "bulk plan built"
    );

    Ok(BulkPlan {
        candidates,
        truncated,
        past_excluded: past.len(),
        duplicates_dropped,
    })
}

/// Requested date count and the distinct dates in order.
fn expand_dates(dates: &BulkDates) -> Result<(usize, BTreeSet<NaiveDate>)> {
    match dates {
        BulkDates::Explicit { dates } => {
            if dates.is_empty() {
                return Err(BookingError::Validation("no dates requested".into()));
            }
            Ok((dates.len(), dates.iter().copied().collect()))
        }
        BulkDates::Range {
            start,
            end,
            weekdays,
        } => {
            if end < start {
                return Err(BookingError::Validation(format!(
                    "range end {end} precedes start {start}"
                )));
            }
            if (*end - *start).num_days() >= MAX_RANGE_DAYS {
                return Err(BookingError::Validation(format!(
                    "range may span at most {MAX_RANGE_DAYS} days"
                )));
            }
            if weekdays.is_empty() {
                return Err(BookingError::Validation(
                    "a range needs at least one weekday".into(),
                ));
            }
            let picked: BTreeSet<NaiveDate> = start
                .iter_days()
                .take_while(|d| d <= end)
                .filter(|d| weekdays.contains(&d.weekday()))
                .collect();
            Ok((picked.len(), picked))
        }
    }
}
