//! Contract renewal.
//!
//! A renewal continues an existing series: the new pattern starts in the first
//! repetition of the old series that comes after the last materialized
//! occurrence, so weekday and (for monthly contracts) day of month are kept.

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{BookingError, Result};
use crate::recurrence::{date_for_index, Frequency, RecurrencePattern};
use crate::session::RecurrenceSession;
use crate::temporal::{week_start, WeekStartDay};

/// Upper bound on how far a series is walked looking for the next repetition.
const MAX_SERIES_INDEX: u32 = 10_000;

/// Pattern for the contract that follows `previous`.
///
/// `last_date` is the date of the last occurrence actually materialized, which
/// may differ from the generated one if it was rescheduled. The new anchor is
/// the first repetition of the old series that is after `last_date`, outside
/// its week, and not before `today`. `time` defaults to the old anchor time.
///
/// # Errors
///
/// [`BookingError::InvalidPattern`] for individual contracts, which have no
/// series to continue, or for a zero `count`.
pub fn renewal_pattern(
    previous: &RecurrencePattern,
    last_date: NaiveDate,
    time: Option<NaiveTime>,
    count: u32,
    today: NaiveDate,
) -> Result<RecurrencePattern> {
    if !previous.frequency.is_recurring() {
        return Err(BookingError::InvalidPattern(
            "an individual session has no series to renew".into(),
        ));
    }

    let anchor = next_in_series(previous.anchor_date, previous.frequency, last_date, today)
        .ok_or_else(|| {
            BookingError::InvalidPattern(format!(
                "no repetition of the series after {last_date}"
            ))
        })?;
    debug!(
        frequency = ?previous.frequency,
        %last_date,
        %anchor,
        "renewal anchored"
    );

    RecurrencePattern::new(
        previous.frequency,
        anchor,
        time.unwrap_or(previous.anchor_time),
        count,
    )
}

/// Open a session for the renewal. The patient is known to have a contract,
/// so the session never allows an inaugural occurrence.
pub fn open_renewal(
    previous: &RecurrencePattern,
    last_date: NaiveDate,
    count: u32,
    today: NaiveDate,
    config: EngineConfig,
) -> Result<RecurrenceSession> {
    let pattern = renewal_pattern(previous, last_date, None, count, today)?;
    Ok(RecurrenceSession::new(pattern, today, config)?.with_previous_contracts(true))
}

fn next_in_series(
    anchor: NaiveDate,
    frequency: Frequency,
    last_date: NaiveDate,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let last_week = week_start(last_date, WeekStartDay::Sunday);
    (0..=MAX_SERIES_INDEX)
        .map_while(|i| date_for_index(anchor, frequency, i))
        .find(|&date| {
            date > last_date
                && week_start(date, WeekStartDay::Sunday) != last_week
                && date >= today
        })
}
