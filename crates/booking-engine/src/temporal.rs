//! Practice-local date and time handling.
//!
//! The practice runs on a single fixed local offset. Stored timestamps are UTC;
//! everything the engine computes on is a local [`NaiveDate`] / [`NaiveTime`]
//! pair. Conversion happens once, at the availability boundary, through
//! [`PracticeClock`].
//!
//! Nothing here reads the system clock. Callers pass "now" explicitly, which
//! keeps generation and classification deterministic under test.
//!
//! # Wire format
//!
//! Dates travel as `YYYY-MM-DD`, times as `HH:mm`. The [`wire_date`] and
//! [`wire_time`] serde modules enforce this on every wire struct.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;

use crate::error::BookingError;

/// Wire format for dates.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format for times.
pub const WIRE_TIME_FORMAT: &str = "%H:%M";

// ── Week boundaries ─────────────────────────────────────────────────────────

/// Which day begins a week for repetition-window computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeekStartDay {
    /// Sunday-to-Saturday weeks, as shown on the practice calendar.
    #[default]
    Sunday,
    /// ISO 8601 weeks.
    Monday,
}

/// How many days `weekday` is from the week-start day.
fn days_from_week_start(weekday: Weekday, week_start: WeekStartDay) -> i64 {
    match week_start {
        WeekStartDay::Monday => weekday.num_days_from_monday() as i64,
        WeekStartDay::Sunday => weekday.num_days_from_sunday() as i64,
    }
}

/// First day of the week containing `date`.
pub fn week_start(date: NaiveDate, week_start: WeekStartDay) -> NaiveDate {
    date - Duration::days(days_from_week_start(date.weekday(), week_start))
}

/// Inclusive `(first, last)` days of the week containing `date`.
pub fn week_bounds(date: NaiveDate, ws: WeekStartDay) -> (NaiveDate, NaiveDate) {
    let first = week_start(date, ws);
    (first, first + Duration::days(6))
}

// ── Month arithmetic ────────────────────────────────────────────────────────

/// Add `months` calendar months to `date`, clamping the day to the last valid
/// day of the target month (Jan 31 + 1 month = Feb 28 or 29).
pub fn add_months_clamped(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = date.year() * 12 + date.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (y, m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(y, m, 1)?;
    Some(first_next.pred_opt()?.day())
}

// ── Minutes of day ──────────────────────────────────────────────────────────

/// Minutes since local midnight.
pub fn minutes_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Inverse of [`minutes_of_day`]; `None` past the end of the day.
pub fn time_from_minutes(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

// ── Practice clock ──────────────────────────────────────────────────────────

/// Converts between stored UTC instants and practice-local date/time pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PracticeClock {
    tz: Tz,
}

impl PracticeClock {
    /// Build a clock for an IANA timezone name.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidTimezone`] if the name is not a valid
    /// IANA timezone.
    pub fn new(timezone: &str) -> Result<Self, BookingError> {
        Ok(Self {
            tz: parse_timezone(timezone)?,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Local date and time of a stored UTC instant.
    pub fn to_local(&self, instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
        let local = instant.with_timezone(&self.tz);
        (local.date_naive(), local.time())
    }

    /// The UTC instant of a local date and time.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidDate`] when the wall-clock time does not
    /// exist or is ambiguous in the practice timezone.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, BookingError> {
        self.tz
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                BookingError::InvalidDate(format!(
                    "'{} {}' is ambiguous or nonexistent in {}",
                    format_wire_date(date),
                    format_wire_time(time),
                    self.tz.name()
                ))
            })
    }

    /// The practice-local calendar date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }
}

impl Default for PracticeClock {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::Sao_Paulo,
        }
    }
}

// ── Wire parsing ────────────────────────────────────────────────────────────

/// Parse a `YYYY-MM-DD` wire date.
pub fn parse_wire_date(s: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(s.trim(), WIRE_DATE_FORMAT)
        .map_err(|e| BookingError::InvalidDate(format!("'{}': {}", s, e)))
}

/// Parse an `HH:mm` wire time. A trailing `:ss` is tolerated for records
/// coming straight out of the store.
pub fn parse_wire_time(s: &str) -> Result<NaiveTime, BookingError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, WIRE_TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| BookingError::InvalidTime(format!("'{}': {}", s, e)))
}

pub fn format_wire_date(date: NaiveDate) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

pub fn format_wire_time(time: NaiveTime) -> String {
    time.format(WIRE_TIME_FORMAT).to_string()
}

/// Parse an IANA timezone string into `Tz`.
pub(crate) fn parse_timezone(s: &str) -> Result<Tz, BookingError> {
    s.parse::<Tz>()
        .map_err(|_| BookingError::InvalidTimezone(format!("'{}'", s)))
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod wire_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_wire_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_wire_date(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `HH:mm` times.
pub mod wire_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_wire_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_wire_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    // ── week tests ──────────────────────────────────────────────────────

    #[test]
    fn test_week_start_sunday() {
        // 2024-03-06 is a Wednesday
        assert_eq!(week_start(d(2024, 3, 6), WeekStartDay::Sunday), d(2024, 3, 3));
        assert_eq!(week_start(d(2024, 3, 3), WeekStartDay::Sunday), d(2024, 3, 3));
        assert_eq!(week_start(d(2024, 3, 9), WeekStartDay::Sunday), d(2024, 3, 3));
    }

    #[test]
    fn test_week_start_monday() {
        assert_eq!(week_start(d(2024, 3, 3), WeekStartDay::Monday), d(2024, 2, 26));
    }

    #[test]
    fn test_week_bounds() {
        let (first, last) = week_bounds(d(2024, 3, 4), WeekStartDay::Sunday);
        assert_eq!(first, d(2024, 3, 3));
        assert_eq!(last, d(2024, 3, 9));
    }

    // ── month tests ─────────────────────────────────────────────────────

    #[test]
    fn test_add_months_clamps_leap_february() {
        assert_eq!(add_months_clamped(d(2024, 1, 31), 1), Some(d(2024, 2, 29)));
        assert_eq!(add_months_clamped(d(2023, 1, 31), 1), Some(d(2023, 2, 28)));
    }

    #[test]
    fn test_add_months_crosses_year() {
        assert_eq!(add_months_clamped(d(2024, 11, 30), 3), Some(d(2025, 2, 28)));
        assert_eq!(add_months_clamped(d(2024, 12, 15), 1), Some(d(2025, 1, 15)));
    }

    #[test]
    fn test_add_zero_months() {
        assert_eq!(add_months_clamped(d(2024, 1, 31), 0), Some(d(2024, 1, 31)));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 4), Some(30));
    }

    // ── clock tests ─────────────────────────────────────────────────────

    #[test]
    fn test_clock_converts_utc_to_practice_time() {
        let clock = PracticeClock::default();
        let instant = Utc.with_ymd_and_hms(2024, 3, 11, 13, 0, 0).unwrap();
        let (date, time) = clock.to_local(instant);
        assert_eq!(date, d(2024, 3, 11));
        assert_eq!(time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn test_clock_local_midnight_crossing() {
        let clock = PracticeClock::default();
        // 01:30 UTC is still the previous evening locally
        let instant = Utc.with_ymd_and_hms(2024, 3, 12, 1, 30, 0).unwrap();
        let (date, time) = clock.to_local(instant);
        assert_eq!(date, d(2024, 3, 11));
        assert_eq!(time, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
        assert_eq!(clock.today(instant), d(2024, 3, 11));
    }

    #[test]
    fn test_clock_round_trip() {
        let clock = PracticeClock::default();
        let time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let utc = clock.to_utc(d(2024, 3, 11), time).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 3, 11, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_clock_rejects_unknown_timezone() {
        let err = PracticeClock::new("Mars/Olympus").unwrap_err();
        assert!(matches!(err, BookingError::InvalidTimezone(_)));
    }

    // ── wire tests ──────────────────────────────────────────────────────

    #[test]
    fn test_parse_wire_time_accepts_seconds() {
        assert_eq!(
            parse_wire_time("10:00:00").unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
        assert_eq!(format_wire_time(parse_wire_time("09:30").unwrap()), "09:30");
    }

    #[test]
    fn test_parse_wire_date_rejects_other_formats() {
        assert!(parse_wire_date("04/03/2024").is_err());
        let err = parse_wire_date("2024-02-30").unwrap_err().to_string();
        assert!(err.contains("Invalid date"), "got: {err}");
    }

    #[test]
    fn test_minutes_of_day() {
        let t = NaiveTime::from_hms_opt(13, 30, 0).unwrap();
        assert_eq!(minutes_of_day(t), 810);
        assert_eq!(time_from_minutes(810), Some(t));
        assert_eq!(time_from_minutes(24 * 60), None);
    }
}
