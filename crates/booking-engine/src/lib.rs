//! # booking-engine
//!
//! Recurring appointment planning for a single-provider practice.
//!
//! A recurring contract starts from an anchor slot and a frequency. The engine
//! generates the candidate dates, checks them against the practice's existing
//! bookings and closed days, lets the user reschedule or skip each blocked
//! occurrence, and writes the final set as one contract.
//!
//! ## Modules
//!
//! - [`recurrence`] — Anchor + frequency + count → ordered candidate dates, skip registry, repetition weeks
//! - [`conflict`] — The interval overlap test and per-occurrence classification
//! - [`availability`] — Occupancy map, blocked days, and the async availability oracle
//! - [`session`] — Per-occurrence resolution state machine with request correlation
//! - [`materialize`] — Draft validation and the batch contract write, plus post-commit edits
//! - [`renewal`] — Continue an existing series after its last occurrence
//! - [`bulk`] — Place a personal activity on many dates at once
//! - [`temporal`] — Practice timezone, week windows, wire date/time formats
//! - [`config`] — Engine configuration
//! - [`error`] — Error types

pub mod availability;
pub mod bulk;
pub mod config;
pub mod conflict;
pub mod error;
pub mod materialize;
pub mod recurrence;
pub mod renewal;
pub mod session;
pub mod temporal;

pub use availability::{
    fetch_snapshot, AvailabilityOracle, AvailabilitySnapshot, BlockedDaySet, DateRange,
    OccupancyMap, OccupiedInterval, RequestId, SlotKind, SlotStatus,
};
pub use bulk::{plan_bulk, ActivityDuration, BulkDates, BulkPlan, BulkRequest, PersonalActivity};
pub use config::EngineConfig;
pub use conflict::{classify, overlaps, BlockReason, Classification, TimeWindow};
pub use error::{BookingError, CollaboratorError};
pub use materialize::{
    ContractDraft, ContractMaterializer, ContractUpdate, MaterializationReport, OccurrenceFlags,
    PatientInfo, SlotStore,
};
pub use recurrence::{
    generate, is_date_in_repetition_week, Frequency, Generation, RecurrencePattern, SkipRegistry,
};
pub use renewal::{open_renewal, renewal_pattern};
pub use session::{
    CommitSet, Occurrence, OccurrenceStatus, RecurrenceSession, Resolution, ResolutionAction,
    SessionView,
};
pub use temporal::{PracticeClock, WeekStartDay};
