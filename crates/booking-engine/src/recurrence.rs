//! Occurrence generation for recurring contracts.
//!
//! A [`RecurrencePattern`] names an anchor date, a [`Frequency`] and how many
//! sessions the contract should hold. [`generate`] turns it into the ordered
//! candidate dates, honouring the skip registry, the "never in the past" floor
//! and the hard output cap.
//!
//! Every occurrence has a stable ordinal index (0 = anchor). The index decides
//! the date (`anchor + step·index`, or `+index` months) and the repetition
//! week the occurrence owns, see [`is_date_in_repetition_week`].

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BookingError;
use crate::temporal::{self, add_months_clamped, week_bounds, WeekStartDay};

/// How often a contract repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// A single session; no recurrence.
    Individual,
    Weekly,
    Biweekly,
    /// Same day of month, clamped to the month's last day.
    Monthly,
}

impl Frequency {
    /// Fixed day step for week-based frequencies.
    pub fn step_days(self) -> Option<i64> {
        match self {
            Frequency::Weekly => Some(7),
            Frequency::Biweekly => Some(14),
            Frequency::Individual | Frequency::Monthly => None,
        }
    }

    pub fn is_recurring(self) -> bool {
        !matches!(self, Frequency::Individual)
    }
}

impl std::str::FromStr for Frequency {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "individual" | "single" => Ok(Frequency::Individual),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" | "fortnightly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(BookingError::InvalidPattern(format!(
                "unknown frequency '{other}'"
            ))),
        }
    }
}

/// The shape of a recurring contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    #[serde(with = "temporal::wire_date")]
    pub anchor_date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub anchor_time: NaiveTime,
    pub occurrence_count: u32,
}

impl RecurrencePattern {
    /// Build a pattern. An individual pattern always holds exactly one
    /// occurrence, whatever count is passed.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidPattern`] if `occurrence_count` is zero.
    pub fn new(
        frequency: Frequency,
        anchor_date: NaiveDate,
        anchor_time: NaiveTime,
        occurrence_count: u32,
    ) -> Result<Self, BookingError> {
        if occurrence_count == 0 {
            return Err(BookingError::InvalidPattern(
                "occurrence_count must be at least 1".into(),
            ));
        }
        let occurrence_count = if frequency.is_recurring() {
            occurrence_count
        } else {
            1
        };
        Ok(Self {
            frequency,
            anchor_date,
            anchor_time,
            occurrence_count,
        })
    }

    /// Date of the occurrence at `index`, ignoring skips and the past floor.
    pub fn date_for_index(&self, index: u32) -> Option<NaiveDate> {
        date_for_index(self.anchor_date, self.frequency, index)
    }
}

/// Date of the occurrence at `index` for an anchor and frequency.
///
/// Individual patterns only have index 0.
pub fn date_for_index(anchor: NaiveDate, frequency: Frequency, index: u32) -> Option<NaiveDate> {
    match frequency {
        Frequency::Individual => (index == 0).then_some(anchor),
        Frequency::Weekly | Frequency::Biweekly => {
            let step = frequency.step_days()?;
            anchor.checked_add_signed(Duration::days(step * index as i64))
        }
        Frequency::Monthly => add_months_clamped(anchor, index),
    }
}

/// Inclusive Sunday-to-Saturday window owned by repetition `index`.
pub fn repetition_week(
    anchor: NaiveDate,
    frequency: Frequency,
    index: u32,
) -> Option<(NaiveDate, NaiveDate)> {
    date_for_index(anchor, frequency, index).map(|d| week_bounds(d, WeekStartDay::Sunday))
}

/// Whether `date` falls inside the week owned by repetition `index`.
///
/// This window, not exact date equality, decides which occurrence a calendar
/// pick replaces.
pub fn is_date_in_repetition_week(
    date: NaiveDate,
    index: u32,
    anchor: NaiveDate,
    frequency: Frequency,
) -> bool {
    repetition_week(anchor, frequency, index)
        .map(|(first, last)| first <= date && date <= last)
        .unwrap_or(false)
}

/// Occurrence indices the user has skipped.
///
/// A skipped index's week is never generated again; each skip extends the
/// sequence by one trailing index so the requested count is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipRegistry(BTreeSet<u32>);

impl SkipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skip. Returns `false` if the index was already skipped.
    pub fn insert(&mut self, index: u32) -> bool {
        self.0.insert(index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One generated candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeneratedDate {
    pub index: u32,
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
}

/// Output of [`generate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Generation {
    /// Candidates in index order.
    pub dates: Vec<GeneratedDate>,
    /// Candidates dropped by the output cap.
    pub truncated: usize,
    /// Candidates dropped for falling before `max(today, anchor)`. These are
    /// not reissued.
    pub past_excluded: usize,
    /// Highest index considered, whether emitted or not.
    pub last_index: Option<u32>,
}

impl Generation {
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.dates.iter().map(|g| g.index)
    }
}

/// Generate the candidate dates for `pattern`.
///
/// Indices in `skips` are passed over and replaced by one more trailing index
/// each. Dates before `max(today, anchor)` consume their index without being
/// reissued. At most `cap` dates are emitted.
///
/// # Examples
///
/// ```
/// use booking_engine::recurrence::{generate, Frequency, RecurrencePattern, SkipRegistry};
/// use chrono::{NaiveDate, NaiveTime};
///
/// let anchor = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
/// let pattern = RecurrencePattern::new(
///     Frequency::Weekly,
///     anchor,
///     NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
///     3,
/// )
/// .unwrap();
/// let out = generate(&pattern, &SkipRegistry::new(), anchor, 30);
/// let dates: Vec<String> = out.dates.iter().map(|g| g.date.to_string()).collect();
/// assert_eq!(dates, ["2024-03-04", "2024-03-11", "2024-03-18"]);
/// ```
pub fn generate(
    pattern: &RecurrencePattern,
    skips: &SkipRegistry,
    today: NaiveDate,
    cap: usize,
) -> Generation {
    let floor = today.max(pattern.anchor_date);
    let mut out = Generation::default();

    if !pattern.frequency.is_recurring() {
        out.last_index = Some(0);
        if pattern.anchor_date < floor {
            out.past_excluded = 1;
        } else if cap > 0 {
            out.dates.push(GeneratedDate {
                index: 0,
                date: pattern.anchor_date,
            });
        } else {
            out.truncated = 1;
        }
        return out;
    }

    let mut remaining = pattern.occurrence_count;
    let mut index: u32 = 0;
    while remaining > 0 {
        if skips.contains(index) {
            index += 1;
            continue;
        }
        remaining -= 1;

        let Some(date) = pattern.date_for_index(index) else {
            // Past the representable calendar; nothing further can be generated.
            break;
        };
        out.last_index = Some(index);

        if date < floor {
            out.past_excluded += 1;
        } else if out.dates.len() < cap {
            out.dates.push(GeneratedDate { index, date });
        } else {
            out.truncated += 1;
        }
        index += 1;
    }

    debug!(
        frequency = ?pattern.frequency,
        anchor = %pattern.anchor_date,
        count = pattern.occurrence_count,
        skipped = skips.len(),
        emitted = out.dates.len(),
        truncated = out.truncated,
        past_excluded = out.past_excluded,
        "generated occurrences"
    );
    out
}
