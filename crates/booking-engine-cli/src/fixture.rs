//! In-memory availability served from a JSON fixture.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use booking_engine::availability::{OccurrencePreview, PreviewEntry, PreviewStatus};
use booking_engine::recurrence::{generate, SkipRegistry};
use booking_engine::{
    classify, AvailabilityOracle, BlockedDaySet, Classification, CollaboratorError, DateRange,
    EngineConfig, Frequency, OccupancyMap, OccupiedInterval, PracticeClock, RecurrencePattern,
};
use chrono::NaiveDate;
use serde::Deserialize;

/// `{ "occupied": [...], "blocked_days": [...], "has_previous_contracts": false }`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub occupied: Vec<OccupiedInterval>,
    pub blocked_days: Vec<NaiveDate>,
    pub has_previous_contracts: bool,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }
}

pub struct FixtureOracle {
    fixture: Fixture,
    clock: PracticeClock,
    config: EngineConfig,
}

impl FixtureOracle {
    pub fn new(fixture: Fixture, clock: PracticeClock, config: EngineConfig) -> Self {
        Self {
            fixture,
            clock,
            config,
        }
    }
}

#[async_trait]
impl AvailabilityOracle for FixtureOracle {
    async fn occupied_intervals(
        &self,
        range: DateRange,
    ) -> Result<Vec<OccupiedInterval>, CollaboratorError> {
        Ok(self
            .fixture
            .occupied
            .iter()
            .filter(|i| range.contains(self.clock.to_local(i.starts_at).0))
            .cloned()
            .collect())
    }

    async fn blocked_days(&self, range: DateRange) -> Result<Vec<NaiveDate>, CollaboratorError> {
        Ok(self
            .fixture
            .blocked_days
            .iter()
            .copied()
            .filter(|d| range.contains(*d))
            .collect())
    }

    async fn preview_occurrences(
        &self,
        anchor_slot_id: &str,
        frequency: Frequency,
        occurrence_count: u32,
    ) -> Result<OccurrencePreview, CollaboratorError> {
        let anchor = self
            .fixture
            .occupied
            .iter()
            .find(|i| i.slot_id.as_deref() == Some(anchor_slot_id))
            .ok_or_else(|| CollaboratorError::Rejected(format!("unknown slot {anchor_slot_id}")))?;
        let (date, time) = self.clock.to_local(anchor.starts_at);
        let pattern = RecurrencePattern::new(frequency, date, time, occurrence_count)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;

        let occupancy = OccupancyMap::from_intervals(
            &self.fixture.occupied,
            &self.clock,
            &self.config,
            Some(anchor_slot_id),
        );
        let blocked: BlockedDaySet = self.fixture.blocked_days.iter().copied().collect();
        let duration = anchor.effective_duration(&self.config);

        let generation = generate(&pattern, &SkipRegistry::new(), date, self.config.occurrence_cap);
        let dates = generation
            .dates
            .iter()
            .map(|g| PreviewEntry {
                date: g.date,
                status: match classify(g.date, time, duration, &occupancy, &blocked) {
                    Classification::Available => PreviewStatus::Available,
                    Classification::Occupied => PreviewStatus::Occupied,
                    Classification::Conflict => PreviewStatus::Conflict,
                },
            })
            .collect();

        Ok(OccurrencePreview {
            dates,
            has_previous_contracts: self.fixture.has_previous_contracts,
        })
    }
}
