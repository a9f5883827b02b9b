//! Overlap testing and occurrence classification.
//!
//! [`overlaps`] is the only interval test in the crate. Occupancy maps, session
//! classification, bulk planning and reschedule validation all go through it.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::availability::{BlockedDaySet, OccupancyMap};
use crate::temporal::{minutes_of_day, time_from_minutes};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Whether `[t, t + d)` and `[s, s + e)` intersect. All values are minutes.
///
/// Symmetric: `overlaps(t, d, s, e) == overlaps(s, e, t, d)`.
pub fn overlaps(t: u32, d: u32, s: u32, e: u32) -> bool {
    t < s + e && t + d > s
}

/// A half-open time-of-day interval on one local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    #[serde(with = "crate::temporal::wire_time")]
    pub start: NaiveTime,
    pub duration_minutes: u32,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            start,
            duration_minutes,
        }
    }

    pub fn start_minutes(&self) -> u32 {
        minutes_of_day(self.start)
    }

    /// End in minutes, clipped to midnight.
    pub fn end_minutes(&self) -> u32 {
        (self.start_minutes() + self.duration_minutes).min(MINUTES_PER_DAY)
    }

    /// Minutes that spill past midnight onto the next date.
    pub fn overflow_minutes(&self) -> u32 {
        (self.start_minutes() + self.duration_minutes).saturating_sub(MINUTES_PER_DAY)
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        overlaps(
            self.start_minutes(),
            self.end_minutes() - self.start_minutes(),
            other.start_minutes(),
            other.end_minutes() - other.start_minutes(),
        )
    }

    /// Start times of the `step`-minute increments covering this window.
    pub fn increments(&self, step: u32) -> impl Iterator<Item = NaiveTime> {
        let end = self.end_minutes();
        let step = step.max(1);
        (self.start_minutes()..end)
            .step_by(step as usize)
            .filter_map(time_from_minutes)
    }
}

/// Why a date/time cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The whole day is closed. Only a date change resolves it.
    DayBlocked,
    /// An existing booking overlaps the requested window.
    TimeOccupied,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::DayBlocked => write!(f, "day blocked"),
            BlockReason::TimeOccupied => write!(f, "time occupied"),
        }
    }
}

/// Availability of one candidate date/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Available,
    /// The day is closed. A new time on the same day cannot fix it.
    Occupied,
    /// Some increment of the window collides with an existing booking.
    Conflict,
}

impl Classification {
    pub fn is_available(&self) -> bool {
        matches!(self, Classification::Available)
    }

    /// Only a different date can clear this classification.
    pub fn requires_date_change(&self) -> bool {
        matches!(self, Classification::Occupied)
    }

    /// Why the candidate cannot be booked, if it cannot.
    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            Classification::Available => None,
            Classification::Occupied => Some(BlockReason::DayBlocked),
            Classification::Conflict => Some(BlockReason::TimeOccupied),
        }
    }
}

/// Classify a candidate of `duration_minutes` starting at `date`/`time`.
///
/// A blocked day wins over everything else. Otherwise the window is walked in
/// occupancy-step increments and any increment that meets an existing booking
/// makes it a [`Classification::Conflict`].
pub fn classify(
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: u32,
    occupancy: &OccupancyMap,
    blocked: &BlockedDaySet,
) -> Classification {
    if blocked.contains(date) {
        return Classification::Occupied;
    }

    let bookings = occupancy.bookings_on(date);
    if bookings.is_empty() {
        return Classification::Available;
    }

    let step = occupancy.step_minutes();
    let window = TimeWindow::new(time, duration_minutes);
    let hit = window.increments(step).any(|increment| {
        let slice_start = minutes_of_day(increment);
        let slice_len = step.min(window.end_minutes() - slice_start);
        bookings.iter().any(|b| {
            overlaps(
                slice_start,
                slice_len,
                b.start_minutes(),
                b.end_minutes() - b.start_minutes(),
            )
        })
    });
    if hit {
        Classification::Conflict
    } else {
        Classification::Available
    }
}

/// Existing bookings on `date` that collide with the candidate window.
pub fn conflicting_bookings<'a>(
    date: NaiveDate,
    window: &TimeWindow,
    occupancy: &'a OccupancyMap,
) -> Vec<&'a TimeWindow> {
    occupancy
        .bookings_on(date)
        .iter()
        .filter(|b| b.overlaps(window))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::OccupancyMap;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn occupancy_with(date: NaiveDate, start: NaiveTime, minutes: u32) -> OccupancyMap {
        let mut map = OccupancyMap::new(30);
        map.insert_booking(date, TimeWindow::new(start, minutes));
        map
    }

    // ── overlap tests ───────────────────────────────────────────────────

    #[test]
    fn test_overlap_touching_is_not_overlap() {
        // 10:00-11:00 vs 11:00-12:00
        assert!(!overlaps(600, 60, 660, 60));
        assert!(!overlaps(660, 60, 600, 60));
    }

    #[test]
    fn test_overlap_containment() {
        assert!(overlaps(600, 120, 630, 30));
        assert!(overlaps(630, 30, 600, 120));
    }

    #[test]
    fn test_window_increments() {
        let w = TimeWindow::new(t(10, 0), 90);
        let got: Vec<_> = w.increments(30).collect();
        assert_eq!(got, vec![t(10, 0), t(10, 30), t(11, 0)]);
    }

    #[test]
    fn test_window_clipped_at_midnight() {
        let w = TimeWindow::new(t(23, 30), 60);
        assert_eq!(w.end_minutes(), 1440);
        assert_eq!(w.increments(30).count(), 1);
        assert_eq!(w.overflow_minutes(), 30);
        assert_eq!(TimeWindow::new(t(22, 0), 60).overflow_minutes(), 0);
    }

    // ── classify tests ──────────────────────────────────────────────────

    #[test]
    fn test_classify_free_day() {
        let map = OccupancyMap::new(30);
        let c = classify(d(2024, 3, 11), t(10, 0), 60, &map, &BlockedDaySet::default());
        assert_eq!(c, Classification::Available);
    }

    #[test]
    fn test_classify_same_start_is_conflict() {
        let map = occupancy_with(d(2024, 3, 11), t(10, 0), 60);
        let c = classify(d(2024, 3, 11), t(10, 0), 60, &map, &BlockedDaySet::default());
        assert_eq!(c, Classification::Conflict);
        assert_eq!(c.reason(), Some(BlockReason::TimeOccupied));
        assert!(!c.requires_date_change());
    }

    #[test]
    fn test_classify_partial_overlap_is_conflict() {
        // booking 10:30-11:30 collides with the second half of 10:00-11:00
        let map = occupancy_with(d(2024, 3, 11), t(10, 30), 60);
        let c = classify(d(2024, 3, 11), t(10, 0), 60, &map, &BlockedDaySet::default());
        assert_eq!(c, Classification::Conflict);
    }

    #[test]
    fn test_classify_back_to_back_is_available() {
        let map = occupancy_with(d(2024, 3, 11), t(10, 0), 60);
        let c = classify(d(2024, 3, 11), t(11, 0), 60, &map, &BlockedDaySet::default());
        assert!(c.is_available());
        let c = classify(d(2024, 3, 11), t(9, 0), 60, &map, &BlockedDaySet::default());
        assert!(c.is_available());
    }

    #[test]
    fn test_classify_off_grid_booking() {
        // 10:15-10:45 still hits the 10:00 increment
        let map = occupancy_with(d(2024, 3, 11), t(10, 15), 30);
        let c = classify(d(2024, 3, 11), t(10, 0), 60, &map, &BlockedDaySet::default());
        assert!(!c.is_available());
    }

    #[test]
    fn test_classify_blocked_day_wins() {
        let map = OccupancyMap::new(30);
        let blocked: BlockedDaySet = [d(2024, 3, 11)].into_iter().collect();
        let c = classify(d(2024, 3, 11), t(14, 0), 60, &map, &blocked);
        assert_eq!(c, Classification::Occupied);
        assert!(c.requires_date_change());
        assert_eq!(c.reason().unwrap().to_string(), "day blocked");
    }

    #[test]
    fn test_blocked_day_wins_over_free_time() {
        let map = occupancy_with(d(2024, 3, 11), t(8, 0), 60);
        let blocked: BlockedDaySet = [d(2024, 3, 11)].into_iter().collect();
        assert_eq!(
            classify(d(2024, 3, 11), t(14, 0), 60, &map, &blocked),
            Classification::Occupied
        );
    }

    #[test]
    fn test_classification_serializes_snake_case() {
        let json = serde_json::to_value(Classification::Conflict).unwrap();
        assert_eq!(json, "conflict");
    }

    #[test]
    fn test_conflicting_bookings_lists_hits() {
        let mut map = OccupancyMap::new(30);
        map.insert_booking(d(2024, 3, 11), TimeWindow::new(t(9, 0), 60));
        map.insert_booking(d(2024, 3, 11), TimeWindow::new(t(10, 30), 30));
        let hits = conflicting_bookings(d(2024, 3, 11), &TimeWindow::new(t(10, 0), 60), &map);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start, t(10, 30));
    }

    // ── properties ──────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_overlap_symmetric(t0 in 0u32..1440, d0 in 1u32..240, s0 in 0u32..1440, e0 in 1u32..240) {
            prop_assert_eq!(overlaps(t0, d0, s0, e0), overlaps(s0, e0, t0, d0));
        }

        #[test]
        fn prop_window_overlap_symmetric(a in 0u32..47, da in 1u32..5, b in 0u32..47, db in 1u32..5) {
            let wa = TimeWindow::new(time_from_minutes(a * 30).unwrap(), da * 30);
            let wb = TimeWindow::new(time_from_minutes(b * 30).unwrap(), db * 30);
            prop_assert_eq!(wa.overlaps(&wb), wb.overlaps(&wa));
        }
    }
}
