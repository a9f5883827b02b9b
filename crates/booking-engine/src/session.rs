//! The recurrence-configuration session.
//!
//! A [`RecurrenceSession`] owns everything the user edits while shaping a
//! recurring contract: the pattern, the generated occurrences, the skip
//! registry, the per-occurrence resolutions and the latest availability
//! snapshot. All transitions are synchronous; the only async step is fetching
//! a snapshot, which is correlated by [`RequestId`] so that a response for an
//! outdated pattern is dropped instead of applied.
//!
//! # Occurrence lifecycle
//!
//! ```text
//! Proposed ──classify──▶ Accepted
//!     │                     │
//!     └──classify──▶ NeedsResolution ──reschedule──▶ Resolved
//!                           │
//!                           └──skip──▶ (removed, index recorded, trailing index appended)
//! ```
//!
//! `Resolved` is terminal under reclassification. Only an explicit edit
//! (another reschedule, an ignore, or a skip) moves it again.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::availability::{
    fetch_snapshot, AvailabilityOracle, AvailabilitySnapshot, BlockedDaySet, DateRange,
    OccupancyMap, RequestId, SnapshotRequest,
};
use crate::config::EngineConfig;
use crate::conflict::{classify, BlockReason, Classification, TimeWindow};
use crate::error::{BookingError, Result};
use crate::recurrence::{
    generate, is_date_in_repetition_week, Frequency, RecurrencePattern, SkipRegistry,
};
use crate::temporal::{
    self, format_wire_date, format_wire_time, week_bounds, week_start, PracticeClock,
    WeekStartDay,
};

// ── Occurrences ─────────────────────────────────────────────────────────────

/// Where an occurrence stands in the resolution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceState {
    /// Generated, not yet checked against availability.
    Proposed,
    /// Checked and free.
    Accepted,
    /// Checked and blocked; the user must reschedule or skip it.
    NeedsResolution(Classification),
    /// Moved by the user to a free date/time.
    Resolved,
}

/// Display status of an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    /// Not yet checked against availability.
    Pending,
    Available,
    Occupied,
    Conflict,
    Resolved,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub index: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub state: OccurrenceState,
}

impl Occurrence {
    fn proposed(index: u32, date: NaiveDate, time: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            index,
            date,
            time,
            duration_minutes,
            state: OccurrenceState::Proposed,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.time, self.duration_minutes)
    }

    pub fn status(&self) -> OccurrenceStatus {
        match self.state {
            OccurrenceState::Proposed => OccurrenceStatus::Pending,
            OccurrenceState::Accepted => OccurrenceStatus::Available,
            OccurrenceState::NeedsResolution(Classification::Occupied) => {
                OccurrenceStatus::Occupied
            }
            OccurrenceState::NeedsResolution(_) => OccurrenceStatus::Conflict,
            OccurrenceState::Resolved => OccurrenceStatus::Resolved,
        }
    }

    pub fn needs_resolution(&self) -> bool {
        matches!(self.state, OccurrenceState::NeedsResolution(_))
    }

    pub fn view(&self) -> OccurrenceView {
        let reason = match self.state {
            OccurrenceState::NeedsResolution(c) => c.reason(),
            _ => None,
        };
        OccurrenceView {
            index: self.index,
            date: self.date,
            time: self.time,
            duration_minutes: self.duration_minutes,
            status: self.status(),
            reason,
        }
    }
}

/// Serializable snapshot of one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccurrenceView {
    pub index: u32,
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub status: OccurrenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
}

// ── Resolutions ─────────────────────────────────────────────────────────────

/// A user decision about one occurrence, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResolution", into = "RawResolution")]
pub struct Resolution {
    pub occurrence_index: u32,
    pub action: ResolutionAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Withdraw an earlier reschedule and go back to the generated date.
    Ignore,
    Reschedule { date: NaiveDate, time: NaiveTime },
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ActionKind {
    Ignore,
    Reschedule,
    Skip,
}

/// Wire shape: `{"occurrence_index": 1, "action": "reschedule", "new_date": "...", "new_time": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawResolution {
    occurrence_index: u32,
    action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_time: Option<String>,
}

impl TryFrom<RawResolution> for Resolution {
    type Error = BookingError;

    fn try_from(raw: RawResolution) -> Result<Self> {
        let action = match raw.action {
            ActionKind::Ignore => ResolutionAction::Ignore,
            ActionKind::Skip => ResolutionAction::Skip,
            ActionKind::Reschedule => match (raw.new_date, raw.new_time) {
                (Some(date), Some(time)) => ResolutionAction::Reschedule {
                    date: temporal::parse_wire_date(&date)?,
                    time: temporal::parse_wire_time(&time)?,
                },
                _ => {
                    return Err(BookingError::Validation(format!(
                        "reschedule of occurrence {} needs both new_date and new_time",
                        raw.occurrence_index
                    )))
                }
            },
        };
        Ok(Resolution {
            occurrence_index: raw.occurrence_index,
            action,
        })
    }
}

impl From<Resolution> for RawResolution {
    fn from(r: Resolution) -> Self {
        let (action, new_date, new_time) = match r.action {
            ResolutionAction::Ignore => (ActionKind::Ignore, None, None),
            ResolutionAction::Skip => (ActionKind::Skip, None, None),
            ResolutionAction::Reschedule { date, time } => (
                ActionKind::Reschedule,
                Some(format_wire_date(date)),
                Some(format_wire_time(time)),
            ),
        };
        RawResolution {
            occurrence_index: r.occurrence_index,
            action,
            new_date,
            new_time,
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────────────

/// Result of offering a snapshot to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// The snapshot answered an older request and was dropped.
    Stale,
}

/// Result of a skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipOutcome {
    pub skipped: u32,
    /// Trailing index appended in its place, if the cap allowed one.
    pub appended: Option<u32>,
    /// Fetch to run when the appended date lies past the checked range.
    /// The new occurrence stays unchecked until its snapshot is applied.
    #[serde(skip)]
    pub refresh: Option<SnapshotRequest>,
}

/// One occurrence ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitOccurrence {
    pub index: u32,
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub resolved: bool,
}

/// The conflict-free occurrence set of a ready session.
///
/// Only [`RecurrenceSession::commit_set`] builds one, so holding a
/// `CommitSet` means no occurrence still needs resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSet {
    anchor_slot_id: Option<String>,
    frequency: Frequency,
    occurrences: Vec<CommitOccurrence>,
    has_previous_contracts: Option<bool>,
}

impl CommitSet {
    pub fn anchor_slot_id(&self) -> Option<&str> {
        self.anchor_slot_id.as_deref()
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Occurrences in date order.
    pub fn occurrences(&self) -> &[CommitOccurrence] {
        &self.occurrences
    }

    pub fn has_previous_contracts(&self) -> Option<bool> {
        self.has_previous_contracts
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.occurrences.first().map(|o| o.date)
    }
}

/// Serializable summary of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub pattern: RecurrencePattern,
    pub occurrences: Vec<OccurrenceView>,
    pub skipped: Vec<OccurrenceView>,
    pub unresolved: usize,
    pub ready: bool,
    pub truncated: usize,
    pub past_excluded: usize,
    pub occupancy_stale: bool,
}

// ── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecurrenceSession {
    config: EngineConfig,
    clock: PracticeClock,
    pattern: RecurrencePattern,
    requested_count: u32,
    today: NaiveDate,
    anchor_slot_id: Option<String>,
    occurrences: Vec<Occurrence>,
    skips: SkipRegistry,
    resolutions: BTreeMap<u32, Resolution>,
    truncated: usize,
    past_excluded: usize,
    occupancy: OccupancyMap,
    blocked: BlockedDaySet,
    /// Dates the applied snapshot answers for.
    checked_range: Option<DateRange>,
    occupancy_stale: bool,
    latest_request: Option<RequestId>,
    pending: bool,
    has_previous_contracts: Option<bool>,
}

impl RecurrenceSession {
    /// Open a session and generate the initial occurrences.
    ///
    /// Occurrences stay [`OccurrenceState::Proposed`] until a snapshot is
    /// applied.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(pattern: RecurrencePattern, today: NaiveDate, config: EngineConfig) -> Result<Self> {
        let clock = config.validate()?;
        let mut session = Self {
            occupancy: OccupancyMap::new(config.slot_step_minutes),
            config,
            clock,
            requested_count: pattern.occurrence_count,
            pattern,
            today,
            anchor_slot_id: None,
            occurrences: Vec::new(),
            skips: SkipRegistry::new(),
            resolutions: BTreeMap::new(),
            truncated: 0,
            past_excluded: 0,
            blocked: BlockedDaySet::default(),
            checked_range: None,
            occupancy_stale: false,
            latest_request: None,
            pending: false,
            has_previous_contracts: None,
        };
        session.regenerate();
        Ok(session)
    }

    /// Name the existing slot the contract grows from. It is left out of
    /// occupancy and used for the preview call.
    pub fn with_anchor_slot(mut self, slot_id: impl Into<String>) -> Self {
        self.anchor_slot_id = Some(slot_id.into());
        self
    }

    /// Record what is already known about the patient's contract history.
    pub fn with_previous_contracts(mut self, has_previous: bool) -> Self {
        self.has_previous_contracts = Some(has_previous);
        self
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn pattern(&self) -> &RecurrencePattern {
        &self.pattern
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &PracticeClock {
        &self.clock
    }

    /// Active occurrences in index order.
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn occurrence(&self, index: u32) -> Option<&Occurrence> {
        self.occurrences.iter().find(|o| o.index == index)
    }

    pub fn skips(&self) -> &SkipRegistry {
        &self.skips
    }

    pub fn resolution(&self, index: u32) -> Option<&Resolution> {
        self.resolutions.get(&index)
    }

    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn past_excluded(&self) -> usize {
        self.past_excluded
    }

    pub fn occupancy(&self) -> &OccupancyMap {
        &self.occupancy
    }

    pub fn blocked_days(&self) -> &BlockedDaySet {
        &self.blocked
    }

    /// Dates the last applied snapshot covers.
    pub fn checked_range(&self) -> Option<DateRange> {
        self.checked_range
    }

    fn is_checked(&self, date: NaiveDate) -> bool {
        self.checked_range.is_some_and(|r| r.contains(date))
    }

    pub fn is_occupancy_stale(&self) -> bool {
        self.occupancy_stale
    }

    pub fn latest_request(&self) -> Option<RequestId> {
        self.latest_request
    }

    pub fn has_previous_contracts(&self) -> Option<bool> {
        self.has_previous_contracts
    }

    /// Active occurrences in date order.
    pub fn final_occurrences(&self) -> Vec<&Occurrence> {
        let mut out: Vec<_> = self.occurrences.iter().collect();
        out.sort_by_key(|o| (o.date, o.time));
        out
    }

    pub fn unresolved_count(&self) -> usize {
        self.occurrences.iter().filter(|o| o.needs_resolution()).count()
    }

    fn unclassified_count(&self) -> usize {
        self.occurrences
            .iter()
            .filter(|o| o.state == OccurrenceState::Proposed)
            .count()
    }

    /// Active occurrences dated outside the checked range.
    fn unchecked_date_count(&self) -> usize {
        self.occurrences
            .iter()
            .filter(|o| !self.is_checked(o.date))
            .count()
    }

    /// A fetch is outstanding, or some occurrence lies outside the checked
    /// range and needs one.
    pub fn needs_refresh(&self) -> bool {
        self.pending || self.unchecked_date_count() > 0
    }

    /// Every occurrence is accepted or resolved inside the checked range and
    /// no fetch is outstanding.
    pub fn is_ready(&self) -> bool {
        !self.occurrences.is_empty()
            && !self.pending
            && self.unresolved_count() == 0
            && self.unclassified_count() == 0
            && self.unchecked_date_count() == 0
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            pattern: self.pattern.clone(),
            occurrences: self.final_occurrences().into_iter().map(Occurrence::view).collect(),
            skipped: self.skipped_views(),
            unresolved: self.unresolved_count(),
            ready: self.is_ready(),
            truncated: self.truncated,
            past_excluded: self.past_excluded,
            occupancy_stale: self.occupancy_stale,
        }
    }

    /// Skipped occurrences at their original generated slot.
    fn skipped_views(&self) -> Vec<OccurrenceView> {
        self.skips
            .iter()
            .filter_map(|index| {
                let date = self.pattern.date_for_index(index)?;
                Some(OccurrenceView {
                    index,
                    date,
                    time: self.pattern.anchor_time,
                    duration_minutes: self.config.commercial_duration_minutes,
                    status: OccurrenceStatus::Skipped,
                    reason: None,
                })
            })
            .collect()
    }

    // ── pattern edits ───────────────────────────────────────────────────

    /// Move the anchor. Skips and resolutions are dropped.
    pub fn set_anchor(&mut self, date: NaiveDate, time: NaiveTime) -> Result<SnapshotRequest> {
        self.replace_pattern(self.pattern.frequency, date, time, self.requested_count)
    }

    /// Change the frequency. Skips and resolutions are dropped.
    pub fn set_frequency(&mut self, frequency: Frequency) -> Result<SnapshotRequest> {
        self.replace_pattern(
            frequency,
            self.pattern.anchor_date,
            self.pattern.anchor_time,
            self.requested_count,
        )
    }

    /// Change the occurrence count. Skips and resolutions are dropped.
    pub fn set_occurrence_count(&mut self, count: u32) -> Result<SnapshotRequest> {
        self.replace_pattern(
            self.pattern.frequency,
            self.pattern.anchor_date,
            self.pattern.anchor_time,
            count,
        )
    }

    fn replace_pattern(
        &mut self,
        frequency: Frequency,
        date: NaiveDate,
        time: NaiveTime,
        count: u32,
    ) -> Result<SnapshotRequest> {
        let pattern = RecurrencePattern::new(frequency, date, time, count)?;
        info!(
            frequency = ?pattern.frequency,
            anchor = %pattern.anchor_date,
            count = pattern.occurrence_count,
            "recurrence pattern changed"
        );
        self.pattern = pattern;
        self.requested_count = count;
        self.skips.clear();
        self.resolutions.clear();
        if self.checked_range.is_some() {
            self.occupancy_stale = true;
        }
        self.regenerate();
        Ok(self.begin_refresh())
    }

    fn regenerate(&mut self) {
        let generation = generate(
            &self.pattern,
            &self.skips,
            self.today,
            self.config.occurrence_cap,
        );
        self.truncated = generation.truncated;
        self.past_excluded = generation.past_excluded;
        self.occurrences = generation
            .dates
            .iter()
            .map(|g| {
                Occurrence::proposed(
                    g.index,
                    g.date,
                    self.pattern.anchor_time,
                    self.config.commercial_duration_minutes,
                )
            })
            .collect();
        self.reclassify();
    }

    // ── availability ────────────────────────────────────────────────────

    /// Local date range a snapshot must cover: from the first bookable day to
    /// the end of the last week a full round of skips could reach.
    pub fn refresh_range(&self) -> DateRange {
        let start = self.today.max(week_start(self.pattern.anchor_date, WeekStartDay::Sunday));
        let highest = self
            .occurrences
            .iter()
            .map(|o| o.index)
            .chain(self.skips.iter())
            .max()
            .unwrap_or(0);
        let horizon = if self.pattern.frequency.is_recurring() {
            highest.saturating_add(self.pattern.occurrence_count)
        } else {
            0
        };
        let last = self
            .pattern
            .date_for_index(horizon)
            .unwrap_or(self.pattern.anchor_date);
        let end = week_bounds(last, WeekStartDay::Sunday).1.max(start);
        DateRange { start, end }
    }

    /// Mint a new request id and describe what to fetch. Any snapshot
    /// carrying an older id will be dropped.
    pub fn begin_refresh(&mut self) -> SnapshotRequest {
        let id = self
            .latest_request
            .map(RequestId::next)
            .unwrap_or_else(RequestId::first);
        self.latest_request = Some(id);
        self.pending = true;
        SnapshotRequest {
            request_id: id,
            range: self.refresh_range(),
            anchor_slot_id: self.anchor_slot_id.clone(),
            frequency: self.pattern.frequency,
            occurrence_count: self.pattern.occurrence_count,
        }
    }

    /// Apply a snapshot if it answers the latest request.
    pub fn apply_snapshot(&mut self, snapshot: AvailabilitySnapshot) -> SnapshotOutcome {
        if Some(snapshot.request_id) != self.latest_request {
            warn!(
                received = %snapshot.request_id,
                latest = ?self.latest_request,
                "discarding stale availability snapshot"
            );
            return SnapshotOutcome::Stale;
        }
        self.occupancy = snapshot.occupancy;
        self.blocked = snapshot.blocked;
        // once known to have contracts, a patient keeps that status
        if let Some(has_previous) = snapshot.has_previous_contracts {
            let known = self.has_previous_contracts.unwrap_or(false);
            self.has_previous_contracts = Some(known || has_previous);
        }
        self.checked_range = Some(snapshot.range);
        self.occupancy_stale = false;
        self.pending = false;
        self.reclassify();
        debug!(
            request = %snapshot.request_id,
            unresolved = self.unresolved_count(),
            "availability snapshot applied"
        );
        SnapshotOutcome::Applied
    }

    /// Like [`RecurrenceSession::apply_snapshot`], but a stale snapshot is an
    /// error.
    pub fn accept_snapshot(&mut self, snapshot: AvailabilitySnapshot) -> Result<()> {
        let received = snapshot.request_id.value();
        match self.apply_snapshot(snapshot) {
            SnapshotOutcome::Applied => Ok(()),
            SnapshotOutcome::Stale => Err(BookingError::StaleResponse {
                received,
                latest: self.latest_request.map_or(0, RequestId::value),
            }),
        }
    }

    /// Note a failed fetch. The session keeps whatever occupancy it had.
    pub fn record_fetch_failure(&mut self, request_id: RequestId, error: &BookingError) {
        if Some(request_id) != self.latest_request {
            debug!(request = %request_id, "ignoring failure of superseded fetch");
            return;
        }
        warn!(request = %request_id, %error, "availability fetch failed; keeping previous occupancy");
        self.pending = false;
        self.occupancy_stale = true;
    }

    /// Fetch and apply a fresh snapshot.
    ///
    /// # Errors
    ///
    /// [`BookingError::Network`] if the oracle fails; the session stays usable.
    pub async fn refresh(&mut self, oracle: &dyn AvailabilityOracle) -> Result<SnapshotOutcome> {
        let request = self.begin_refresh();
        let fetched = fetch_snapshot(oracle, &request, &self.clock, &self.config).await;
        match fetched {
            Ok(snapshot) => Ok(self.apply_snapshot(snapshot)),
            Err(err) => {
                self.record_fetch_failure(request.request_id, &err);
                Err(err)
            }
        }
    }

    /// Re-run classification on every occurrence that is not resolved.
    /// Occurrences outside the checked range stay proposed.
    pub fn reclassify(&mut self) {
        if self.checked_range.is_none() {
            return;
        }
        let updates: Vec<(usize, OccurrenceState)> = self
            .occurrences
            .iter()
            .enumerate()
            .filter(|(_, o)| o.state != OccurrenceState::Resolved)
            .map(|(k, _)| (k, self.state_for(k)))
            .collect();
        for (k, state) in updates {
            self.occurrences[k].state = state;
        }
    }

    fn state_for(&self, k: usize) -> OccurrenceState {
        let occ = &self.occurrences[k];
        if !self.is_checked(occ.date) {
            return OccurrenceState::Proposed;
        }
        let mut classification = classify(
            occ.date,
            occ.time,
            occ.duration_minutes,
            &self.occupancy,
            &self.blocked,
        );
        if classification.is_available() && self.clashes_with_session(k) {
            classification = Classification::Conflict;
        }
        if classification.is_available() {
            OccurrenceState::Accepted
        } else {
            OccurrenceState::NeedsResolution(classification)
        }
    }

    /// Another active occurrence shares this one's week or overlaps it.
    fn clashes_with_session(&self, k: usize) -> bool {
        let occ = &self.occurrences[k];
        let window = occ.window();
        let week = week_bounds(occ.date, WeekStartDay::Sunday);
        let recurring = self.pattern.frequency.is_recurring();
        self.occurrences.iter().enumerate().any(|(j, other)| {
            j != k
                && ((other.date == occ.date && other.window().overlaps(&window))
                    || (recurring && week_bounds(other.date, WeekStartDay::Sunday) == week))
        })
    }

    // ── resolutions ─────────────────────────────────────────────────────

    fn position(&self, index: u32) -> Result<usize> {
        self.occurrences
            .iter()
            .position(|o| o.index == index)
            .ok_or_else(|| BookingError::Validation(format!("occurrence {index} is not active")))
    }

    /// Apply one user decision.
    pub fn apply(&mut self, resolution: Resolution) -> Result<()> {
        match resolution.action {
            ResolutionAction::Ignore => self.ignore(resolution.occurrence_index),
            ResolutionAction::Reschedule { date, time } => {
                self.reschedule(resolution.occurrence_index, date, time)
            }
            ResolutionAction::Skip => self.skip(resolution.occurrence_index).map(|_| ()),
        }
    }

    /// Move occurrence `index` to `date`/`time`.
    ///
    /// The target must be today or later, inside the checked range, on an open day, free of bookings and
    /// of the session's other occurrences, and (for recurring patterns) outside
    /// any week owned by another active index or by a skipped index. Any other
    /// reschedule already parked in the target week is withdrawn.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] naming the first rule the target breaks.
    pub fn reschedule(&mut self, index: u32, date: NaiveDate, time: NaiveTime) -> Result<()> {
        let pos = self.position(index)?;
        let duration = self.occurrences[pos].duration_minutes;
        let label = format!("{} {}", format_wire_date(date), format_wire_time(time));

        if date < self.today {
            return Err(BookingError::Validation(format!("{label} is in the past")));
        }
        if !self.is_checked(date) {
            return Err(BookingError::Validation(match self.checked_range {
                Some(range) => format!(
                    "{label} is outside the checked availability range {} to {}",
                    format_wire_date(range.start),
                    format_wire_date(range.end)
                ),
                None => format!("{label}: availability has not been loaded"),
            }));
        }
        if let Some(reason) = classify(date, time, duration, &self.occupancy, &self.blocked).reason() {
            return Err(BookingError::Validation(format!("{label}: {reason}")));
        }

        let window = TimeWindow::new(time, duration);
        if let Some(other) = self
            .occurrences
            .iter()
            .find(|o| o.index != index && o.date == date && o.window().overlaps(&window))
        {
            return Err(BookingError::Validation(format!(
                "{label} overlaps occurrence {}",
                other.index
            )));
        }

        let target_week = week_bounds(date, WeekStartDay::Sunday);
        if self.pattern.frequency.is_recurring() {
            let (anchor, frequency) = (self.pattern.anchor_date, self.pattern.frequency);
            if let Some(owner) = self
                .occurrences
                .iter()
                .map(|o| o.index)
                .find(|&j| j != index && is_date_in_repetition_week(date, j, anchor, frequency))
            {
                return Err(BookingError::Validation(format!(
                    "{label} falls in the week of occurrence {owner}"
                )));
            }
            if let Some(skipped) = self
                .skips
                .iter()
                .find(|&s| is_date_in_repetition_week(date, s, anchor, frequency))
            {
                return Err(BookingError::Validation(format!(
                    "{label} falls in the skipped week of occurrence {skipped}"
                )));
            }
        }

        let displaced: Vec<u32> = self
            .resolutions
            .keys()
            .copied()
            .filter(|&j| j != index)
            .filter(|&j| {
                self.occurrence(j)
                    .is_some_and(|o| week_bounds(o.date, WeekStartDay::Sunday) == target_week)
            })
            .collect();
        for j in displaced {
            info!(occurrence = j, "withdrawing reschedule displaced by occurrence {index}");
            self.revert(j)?;
        }

        let pos = self.position(index)?;
        let occ = &mut self.occurrences[pos];
        occ.date = date;
        occ.time = time;
        occ.state = OccurrenceState::Resolved;
        self.resolutions.insert(
            index,
            Resolution {
                occurrence_index: index,
                action: ResolutionAction::Reschedule { date, time },
            },
        );
        info!(occurrence = index, target = %label, "occurrence rescheduled");
        self.reclassify();
        Ok(())
    }

    /// Reschedule whichever occurrence owns the week of a calendar pick.
    ///
    /// Returns the index that moved.
    pub fn select_calendar_date(&mut self, date: NaiveDate, time: NaiveTime) -> Result<u32> {
        let (anchor, frequency) = (self.pattern.anchor_date, self.pattern.frequency);
        let index = if frequency.is_recurring() {
            self.occurrences
                .iter()
                .map(|o| o.index)
                .find(|&i| is_date_in_repetition_week(date, i, anchor, frequency))
                .or_else(|| {
                    let week = week_bounds(date, WeekStartDay::Sunday);
                    self.occurrences
                        .iter()
                        .find(|o| {
                            o.state == OccurrenceState::Resolved
                                && week_bounds(o.date, WeekStartDay::Sunday) == week
                        })
                        .map(|o| o.index)
                })
        } else {
            self.occurrences.first().map(|o| o.index)
        }
        .ok_or_else(|| {
            BookingError::Validation(format!(
                "{} is not in any repetition week",
                format_wire_date(date)
            ))
        })?;
        self.reschedule(index, date, time)?;
        Ok(index)
    }

    /// Skip occurrence `index`: its week is dropped for good and one new
    /// trailing occurrence is appended. If the appended date lies past the
    /// checked range a new fetch is begun and returned in the outcome.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidPattern`] for individual sessions, or
    /// [`BookingError::Validation`] if the index is not active.
    pub fn skip(&mut self, index: u32) -> Result<SkipOutcome> {
        if !self.pattern.frequency.is_recurring() {
            return Err(BookingError::InvalidPattern(
                "an individual session cannot be skipped".into(),
            ));
        }
        let pos = self.position(index)?;
        self.occurrences.remove(pos);
        self.resolutions.remove(&index);
        self.skips.insert(index);

        let generation = generate(
            &self.pattern,
            &self.skips,
            self.today,
            self.config.occurrence_cap,
        );
        self.truncated = generation.truncated;
        self.past_excluded = generation.past_excluded;

        let mut appended = None;
        for g in &generation.dates {
            if self.occurrences.iter().all(|o| o.index != g.index) {
                self.occurrences.push(Occurrence::proposed(
                    g.index,
                    g.date,
                    self.pattern.anchor_time,
                    self.config.commercial_duration_minutes,
                ));
                appended = Some(g.index);
            }
        }
        self.occurrences.sort_by_key(|o| o.index);
        self.reclassify();

        let refresh = if self.checked_range.is_some() && self.unchecked_date_count() > 0 {
            Some(self.begin_refresh())
        } else {
            None
        };
        info!(
            occurrence = index,
            appended = ?appended,
            refetch = refresh.is_some(),
            "occurrence skipped"
        );
        Ok(SkipOutcome {
            skipped: index,
            appended,
            refresh,
        })
    }

    /// Withdraw a reschedule, returning the occurrence to its generated slot.
    /// A no-op for an occurrence that was never rescheduled.
    pub fn ignore(&mut self, index: u32) -> Result<()> {
        self.position(index)?;
        if self.resolutions.contains_key(&index) {
            self.revert(index)?;
            self.reclassify();
            info!(occurrence = index, "reschedule withdrawn");
        }
        Ok(())
    }

    fn revert(&mut self, index: u32) -> Result<()> {
        let date = self.pattern.date_for_index(index).ok_or_else(|| {
            BookingError::InvalidPattern(format!("no generated date for occurrence {index}"))
        })?;
        let pos = self.position(index)?;
        let time = self.pattern.anchor_time;
        let occ = &mut self.occurrences[pos];
        occ.date = date;
        occ.time = time;
        occ.state = OccurrenceState::Proposed;
        self.resolutions.remove(&index);
        Ok(())
    }

    // ── commit ──────────────────────────────────────────────────────────

    /// Freeze the session into the set the materializer writes.
    ///
    /// # Errors
    ///
    /// [`BookingError::Conflict`] while any occurrence is unresolved or
    /// unchecked, or while a fetch is outstanding;
    /// [`BookingError::Validation`] if there is nothing to commit.
    pub fn commit_set(&self) -> Result<CommitSet> {
        if self.occurrences.is_empty() {
            return Err(BookingError::Validation("no occurrences to commit".into()));
        }
        let unresolved = self.unresolved_count();
        if unresolved > 0 {
            warn!(unresolved, "commit refused");
            return Err(BookingError::Conflict(format!(
                "{unresolved} occurrence(s) still need resolution"
            )));
        }
        if self.pending {
            return Err(BookingError::Conflict(
                "availability refresh still in flight".into(),
            ));
        }
        let unchecked = self.unclassified_count().max(self.unchecked_date_count());
        if unchecked > 0 {
            return Err(BookingError::Conflict(format!(
                "{unchecked} occurrence(s) not yet checked against availability"
            )));
        }

        let occurrences = self
            .final_occurrences()
            .into_iter()
            .map(|o| CommitOccurrence {
                index: o.index,
                date: o.date,
                time: o.time,
                duration_minutes: o.duration_minutes,
                resolved: o.state == OccurrenceState::Resolved,
            })
            .collect();
        Ok(CommitSet {
            anchor_slot_id: self.anchor_slot_id.clone(),
            frequency: self.pattern.frequency,
            occurrences,
            has_previous_contracts: self.has_previous_contracts,
        })
    }
}
