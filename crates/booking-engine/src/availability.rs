//! The availability oracle boundary.
//!
//! Raw occupied intervals come from the slot store as UTC instants. They are
//! converted to practice-local time exactly once, here, when an
//! [`OccupancyMap`] is built. Everything downstream works on local dates.
//!
//! Fetches are tagged with a [`RequestId`] so a session can discard responses
//! for a pattern it no longer shows.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::conflict::{overlaps, TimeWindow};
use crate::error::{BookingError, CollaboratorError};
use crate::recurrence::Frequency;
use crate::temporal::{self, minutes_of_day, time_from_minutes, PracticeClock};

// ── Slot records ────────────────────────────────────────────────────────────

/// What an existing slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Online,
    Presential,
    /// Provider's own activity (study, supervision, break).
    Personal,
}

impl SlotKind {
    pub fn is_commercial(self) -> bool {
        matches!(self, SlotKind::Online | SlotKind::Presential)
    }
}

/// Lifecycle status of an existing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Open slot offered for booking.
    Available,
    Reserved,
    Confirmed,
    Completed,
    Cancelled,
}

impl SlotStatus {
    /// Whether a slot in this status prevents another booking at the same time.
    pub fn blocks(self) -> bool {
        matches!(
            self,
            SlotStatus::Reserved | SlotStatus::Confirmed | SlotStatus::Completed
        )
    }
}

/// One record as returned by the store's occupancy query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupiedInterval {
    #[serde(default)]
    pub slot_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    /// Absent on legacy rows; the slot kind's default applies.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub kind: SlotKind,
    pub status: SlotStatus,
}

impl OccupiedInterval {
    pub fn effective_duration(&self, config: &EngineConfig) -> u32 {
        self.duration_minutes.unwrap_or(if self.kind.is_commercial() {
            config.commercial_duration_minutes
        } else {
            config.personal_duration_minutes
        })
    }
}

/// Inclusive local date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(with = "temporal::wire_date")]
    pub start: NaiveDate,
    #[serde(with = "temporal::wire_date")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if end < start {
            return Err(BookingError::Validation(format!(
                "range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

// ── Occupancy map ───────────────────────────────────────────────────────────

/// Per-date view of blocking bookings, in practice-local time.
///
/// Holds both the bookings themselves (for the overlap test) and the
/// occupancy-step increments they cover (for display and quick lookups).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyMap {
    step_minutes: u32,
    bookings: BTreeMap<NaiveDate, Vec<TimeWindow>>,
    occupied: BTreeMap<NaiveDate, BTreeSet<NaiveTime>>,
}

impl Default for OccupancyMap {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SLOT_STEP_MINUTES)
    }
}

impl OccupancyMap {
    pub fn new(step_minutes: u32) -> Self {
        Self {
            step_minutes: step_minutes.max(1),
            bookings: BTreeMap::new(),
            occupied: BTreeMap::new(),
        }
    }

    /// Build the map from raw oracle records.
    ///
    /// Non-blocking statuses are ignored, as is the slot named by
    /// `exclude_slot` (the anchor slot a contract is being built from).
    pub fn from_intervals(
        intervals: &[OccupiedInterval],
        clock: &PracticeClock,
        config: &EngineConfig,
        exclude_slot: Option<&str>,
    ) -> Self {
        let mut map = Self::new(config.slot_step_minutes);
        for interval in intervals {
            if !interval.status.blocks() {
                continue;
            }
            if exclude_slot.is_some() && interval.slot_id.as_deref() == exclude_slot {
                continue;
            }
            let (date, start) = clock.to_local(interval.starts_at);
            map.insert_booking(date, TimeWindow::new(start, interval.effective_duration(config)));
        }
        debug!(
            records = intervals.len(),
            dates = map.bookings.len(),
            "built occupancy map"
        );
        map
    }

    /// Record a blocking booking. A booking running past midnight is split
    /// and its remainder recorded at 00:00 on the next date.
    pub fn insert_booking(&mut self, date: NaiveDate, window: TimeWindow) {
        let overflow = window.overflow_minutes();
        if overflow > 0 {
            if let (Some(next), Some(midnight)) = (date.succ_opt(), time_from_minutes(0)) {
                self.insert_booking(next, TimeWindow::new(midnight, overflow));
            }
        }

        let start = window.start_minutes();
        let len = window.end_minutes() - start;
        let grid_start = start - start % self.step_minutes;
        let covered = self.occupied.entry(date).or_default();
        for g in (grid_start..window.end_minutes()).step_by(self.step_minutes as usize) {
            if overlaps(g, self.step_minutes, start, len) {
                if let Some(t) = time_from_minutes(g) {
                    covered.insert(t);
                }
            }
        }
        self.bookings.entry(date).or_default().push(window);
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[TimeWindow] {
        self.bookings.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Occupied increment start times on `date`.
    pub fn occupied_times(&self, date: NaiveDate) -> impl Iterator<Item = NaiveTime> + '_ {
        self.occupied.get(&date).into_iter().flatten().copied()
    }

    /// Whether the increment containing `time` is occupied.
    pub fn is_time_occupied(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let m = minutes_of_day(time);
        let slot = m - m % self.step_minutes;
        time_from_minutes(slot)
            .map(|t| self.occupied.get(&date).is_some_and(|s| s.contains(&t)))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Number of per-date booking windows. A booking split at midnight
    /// counts once on each date.
    pub fn len(&self) -> usize {
        self.bookings.values().map(Vec::len).sum()
    }
}

// ── Blocked days ────────────────────────────────────────────────────────────

/// Dates fully closed to new bookings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockedDaySet(BTreeSet<NaiveDate>);

impl BlockedDaySet {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.0.contains(&date)
    }

    pub fn insert(&mut self, date: NaiveDate) -> bool {
        self.0.insert(date)
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<NaiveDate> for BlockedDaySet {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Preview ─────────────────────────────────────────────────────────────────

/// Server-side status of one previewed date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Available,
    Occupied,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEntry {
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    pub status: PreviewStatus,
}

/// Response of the store's occurrence preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrencePreview {
    pub dates: Vec<PreviewEntry>,
    /// Gates inaugural eligibility.
    pub has_previous_contracts: bool,
}

// ── Oracle ──────────────────────────────────────────────────────────────────

/// Read side of the remote slot store.
#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    async fn occupied_intervals(
        &self,
        range: DateRange,
    ) -> Result<Vec<OccupiedInterval>, CollaboratorError>;

    async fn blocked_days(&self, range: DateRange) -> Result<Vec<NaiveDate>, CollaboratorError>;

    async fn preview_occurrences(
        &self,
        anchor_slot_id: &str,
        frequency: Frequency,
        occurrence_count: u32,
    ) -> Result<OccurrencePreview, CollaboratorError>;
}

/// Correlation id for an availability fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn first() -> Self {
        RequestId(1)
    }

    pub fn next(self) -> Self {
        RequestId(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything a session needs to classify its occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    pub request_id: RequestId,
    pub range: DateRange,
    pub occupancy: OccupancyMap,
    pub blocked: BlockedDaySet,
    /// Known only when the fetch included a preview call.
    pub has_previous_contracts: Option<bool>,
}

/// Parameters for [`fetch_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub request_id: RequestId,
    pub range: DateRange,
    /// Anchor slot to leave out of the occupancy map, and to preview from.
    pub anchor_slot_id: Option<String>,
    pub frequency: Frequency,
    pub occurrence_count: u32,
}

/// Fetch occupancy, blocked days and (when an anchor slot is known) the
/// preview flags, all concurrently.
///
/// # Errors
///
/// Any collaborator failure becomes [`BookingError::Network`].
pub async fn fetch_snapshot(
    oracle: &dyn AvailabilityOracle,
    request: &SnapshotRequest,
    clock: &PracticeClock,
    config: &EngineConfig,
) -> Result<AvailabilitySnapshot, BookingError> {
    let preview = async {
        match request.anchor_slot_id.as_deref() {
            Some(slot) => oracle
                .preview_occurrences(slot, request.frequency, request.occurrence_count)
                .await
                .map(Some),
            None => Ok(None),
        }
    };

    let (intervals, blocked, preview) = futures::try_join!(
        oracle.occupied_intervals(request.range),
        oracle.blocked_days(request.range),
        preview,
    )?;

    let occupancy = OccupancyMap::from_intervals(
        &intervals,
        clock,
        config,
        request.anchor_slot_id.as_deref(),
    );

    Ok(AvailabilitySnapshot {
        request_id: request.request_id,
        range: request.range,
        occupancy,
        blocked: blocked.into_iter().collect(),
        has_previous_contracts: preview.map(|p| p.has_previous_contracts),
    })
}
