//! Contract materialization and post-commit edits.
//!
//! [`ContractMaterializer`] turns a [`CommitSet`] plus patient and per-date
//! flags into one batch `create_contract` call on the [`SlotStore`]. Every
//! check that can fail without the network runs first. A store that refuses
//! individual dates is not an error: those dates come back in
//! [`MaterializationReport::failed`] and the created ones stay created.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::availability::{BlockedDaySet, OccupancyMap};
use crate::conflict::classify;
use crate::error::{BookingError, CollaboratorError, Result};
use crate::recurrence::Frequency;
use crate::session::{CommitSet, RecurrenceSession};
use crate::temporal::{self, format_wire_date, format_wire_time};

static EMAIL_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

static PHONE_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\s().-]+$"));

const PHONE_MIN_DIGITS: usize = 10;
const PHONE_MAX_DIGITS: usize = 13;

fn pattern(p: &'static LazyLock<std::result::Result<Regex, regex::Error>>) -> Result<&'static Regex> {
    p.as_ref()
        .map_err(|e| BookingError::Validation(format!("invalid validation pattern: {e}")))
}

// ── Patient and flags ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl PatientInfo {
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a blank name, a phone without 10 to 13
    /// digits, or a malformed email.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BookingError::Validation("patient name is required".into()));
        }

        let phone = self.phone.trim();
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if !pattern(&PHONE_PATTERN)?.is_match(phone)
            || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
        {
            return Err(BookingError::Validation(format!(
                "phone '{}' must hold {PHONE_MIN_DIGITS} to {PHONE_MAX_DIGITS} digits",
                self.phone
            )));
        }

        if let Some(email) = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            if !pattern(&EMAIL_PATTERN)?.is_match(email) {
                return Err(BookingError::Validation(format!(
                    "email '{email}' is not a valid address"
                )));
            }
        }
        Ok(())
    }

    /// Email with blanks treated as absent.
    fn email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

/// Per-occurrence billing and notification flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceFlags {
    pub paid: bool,
    /// Fee-waived first session.
    pub inaugural: bool,
    pub reminder: bool,
}

// ── Draft ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOccurrence {
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    #[serde(default)]
    pub flags: OccurrenceFlags,
}

/// Patient data and per-date flags for a contract about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDraft {
    pub patient: PatientInfo,
    pub occurrences: Vec<DraftOccurrence>,
}

impl ContractDraft {
    /// A draft covering every occurrence of `commit`, all flags off.
    pub fn from_commit(commit: &CommitSet, patient: PatientInfo) -> Self {
        Self {
            patient,
            occurrences: commit
                .occurrences()
                .iter()
                .map(|o| DraftOccurrence {
                    date: o.date,
                    time: o.time,
                    flags: OccurrenceFlags::default(),
                })
                .collect(),
        }
    }

    pub fn flags_mut(&mut self, date: NaiveDate) -> Option<&mut OccurrenceFlags> {
        self.occurrences
            .iter_mut()
            .find(|o| o.date == date)
            .map(|o| &mut o.flags)
    }

    /// Set the same reminder flag on every occurrence.
    pub fn set_reminders(&mut self, on: bool) {
        for o in &mut self.occurrences {
            o.flags.reminder = on;
        }
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.occurrences.iter().map(|o| o.date).min()
    }

    /// Run every check that does not need the store.
    ///
    /// `has_previous_contracts` of `None` means the history is unknown; an
    /// inaugural flag is then refused like for a returning patient.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] naming the first failed check.
    pub fn validate(&self, has_previous_contracts: Option<bool>) -> Result<()> {
        self.patient.validate()?;

        if self.occurrences.is_empty() {
            return Err(BookingError::Validation(
                "a contract needs at least one occurrence".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for o in &self.occurrences {
            if !seen.insert((o.date, o.time)) {
                return Err(BookingError::Validation(format!(
                    "duplicate occurrence {} {}",
                    format_wire_date(o.date),
                    format_wire_time(o.time)
                )));
            }
        }

        let inaugural: Vec<NaiveDate> = self
            .occurrences
            .iter()
            .filter(|o| o.flags.inaugural)
            .map(|o| o.date)
            .collect();
        match inaugural.as_slice() {
            [] => {}
            [date] => {
                if has_previous_contracts != Some(false) {
                    return Err(BookingError::Validation(
                        "an inaugural session is only available to new patients".into(),
                    ));
                }
                if Some(*date) != self.earliest_date() {
                    return Err(BookingError::Validation(format!(
                        "inaugural session must be the earliest occurrence, not {}",
                        format_wire_date(*date)
                    )));
                }
            }
            many => {
                return Err(BookingError::Validation(format!(
                    "inaugural flag set on {} occurrences; at most one is allowed",
                    many.len()
                )));
            }
        }
        Ok(())
    }

    /// Check the draft covers exactly the committed occurrences.
    fn matches(&self, commit: &CommitSet) -> Result<()> {
        let draft: BTreeSet<_> = self.occurrences.iter().map(|o| (o.date, o.time)).collect();
        let committed: BTreeSet<_> = commit
            .occurrences()
            .iter()
            .map(|o| (o.date, o.time))
            .collect();
        if draft != committed || self.occurrences.len() != commit.occurrences().len() {
            return Err(BookingError::Validation(
                "draft occurrences do not match the committed schedule".into(),
            ));
        }
        Ok(())
    }

    fn flag_map(&self, pick: impl Fn(&OccurrenceFlags) -> bool) -> BTreeMap<NaiveDate, bool> {
        self.occurrences
            .iter()
            .map(|o| (o.date, pick(&o.flags)))
            .collect()
    }

    fn to_request(&self, commit: &CommitSet) -> CreateContractRequest {
        let mut occurrences: Vec<WireOccurrence> = self
            .occurrences
            .iter()
            .map(|o| WireOccurrence {
                date: o.date,
                time: o.time,
            })
            .collect();
        occurrences.sort_by_key(|o| (o.date, o.time));
        CreateContractRequest {
            anchor_slot_id: commit.anchor_slot_id().map(str::to_string),
            frequency: commit.frequency(),
            occurrences,
            patient_name: self.patient.name.trim().to_string(),
            patient_phone: self.patient.phone.trim().to_string(),
            patient_email: self.patient.email(),
            payment_flags: self.flag_map(|f| f.paid),
            inaugural_flags: self.flag_map(|f| f.inaugural),
            reminder_flags: self.flag_map(|f| f.reminder),
        }
    }
}

// ── Store wire types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOccurrence {
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
}

/// The single batch request that writes a contract. Flag maps are keyed by
/// date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContractRequest {
    pub anchor_slot_id: Option<String>,
    pub frequency: Frequency,
    pub occurrences: Vec<WireOccurrence>,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_email: Option<String>,
    pub payment_flags: BTreeMap<NaiveDate, bool>,
    pub inaugural_flags: BTreeMap<NaiveDate, bool>,
    pub reminder_flags: BTreeMap<NaiveDate, bool>,
}

/// A date the store refused to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOccurrence {
    #[serde(with = "temporal::wire_date")]
    pub date: NaiveDate,
    #[serde(with = "temporal::wire_time")]
    pub time: NaiveTime,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContractResponse {
    #[serde(default)]
    pub contract_id: Option<String>,
    pub created_count: usize,
    #[serde(default)]
    pub failed: Vec<FailedOccurrence>,
}

/// Contract-level fields editable after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub patient: PatientInfo,
    #[serde(default)]
    pub payment_flags: BTreeMap<NaiveDate, bool>,
    #[serde(default)]
    pub inaugural_flags: BTreeMap<NaiveDate, bool>,
    #[serde(default)]
    pub reminder_flags: BTreeMap<NaiveDate, bool>,
}

impl ContractUpdate {
    /// # Errors
    ///
    /// [`BookingError::Validation`] for bad patient fields or more than one
    /// inaugural date.
    pub fn validate(&self) -> Result<()> {
        self.patient.validate()?;
        let inaugural = self.inaugural_flags.values().filter(|on| **on).count();
        if inaugural > 1 {
            return Err(BookingError::Validation(format!(
                "inaugural flag set on {inaugural} occurrences; at most one is allowed"
            )));
        }
        Ok(())
    }
}

/// Write side of the remote slot store.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn create_contract(
        &self,
        request: &CreateContractRequest,
    ) -> std::result::Result<CreateContractResponse, CollaboratorError>;

    async fn update_contract(
        &self,
        contract_id: &str,
        update: &ContractUpdate,
    ) -> std::result::Result<(), CollaboratorError>;

    async fn change_slot_time(
        &self,
        slot_id: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> std::result::Result<(), CollaboratorError>;

    async fn delete_slot(&self, slot_id: &str) -> std::result::Result<(), CollaboratorError>;
}

// ── Materializer ────────────────────────────────────────────────────────────

/// Outcome of a contract write. Never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializationReport {
    pub contract_id: Option<String>,
    pub created_count: usize,
    pub failed: Vec<FailedOccurrence>,
}

impl MaterializationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A single-slot move after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    pub slot_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

pub struct ContractMaterializer<S> {
    store: S,
}

impl<S: SlotStore> ContractMaterializer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Commit a ready session.
    ///
    /// # Errors
    ///
    /// [`BookingError::Conflict`] if the session still has unresolved
    /// occurrences; otherwise as [`ContractMaterializer::materialize`].
    pub async fn commit(
        &self,
        session: &RecurrenceSession,
        draft: &ContractDraft,
    ) -> Result<MaterializationReport> {
        let commit = session.commit_set()?;
        self.materialize(&commit, draft).await
    }

    /// Write `commit` as one contract.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] before any store call if the draft is
    /// invalid or does not cover the commit set; [`BookingError::Network`] if
    /// the batch request itself fails.
    pub async fn materialize(
        &self,
        commit: &CommitSet,
        draft: &ContractDraft,
    ) -> Result<MaterializationReport> {
        draft.matches(commit)?;
        draft.validate(commit.has_previous_contracts())?;

        let request = draft.to_request(commit);
        let submitted = request.occurrences.len();
        let response = self.store.create_contract(&request).await?;

        if response.created_count + response.failed.len() != submitted {
            warn!(
                submitted,
                created = response.created_count,
                failed = response.failed.len(),
                "store reported an inconsistent contract result"
            );
        }
        for f in &response.failed {
            warn!(date = %f.date, time = %f.time, reason = %f.reason, "occurrence refused by store");
        }
        info!(
            contract = ?response.contract_id,
            created = response.created_count,
            failed = response.failed.len(),
            "contract materialized"
        );

        Ok(MaterializationReport {
            contract_id: response.contract_id,
            created_count: response.created_count,
            failed: response.failed,
        })
    }

    /// Move one materialized slot. The target is checked against current
    /// occupancy before the store is asked.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] if the target is blocked or occupied,
    /// [`BookingError::Conflict`] if the store refuses the move, or
    /// [`BookingError::Network`] if it cannot be reached.
    pub async fn reschedule_slot(
        &self,
        change: &SlotMove,
        occupancy: &OccupancyMap,
        blocked: &BlockedDaySet,
    ) -> Result<()> {
        if let Some(reason) = classify(
            change.date,
            change.time,
            change.duration_minutes,
            occupancy,
            blocked,
        )
        .reason()
        {
            return Err(BookingError::Validation(format!(
                "{} {}: {reason}",
                format_wire_date(change.date),
                format_wire_time(change.time)
            )));
        }
        self.store
            .change_slot_time(&change.slot_id, change.date, change.time)
            .await
            .map_err(single_edit_error)?;
        info!(slot = %change.slot_id, date = %change.date, time = %change.time, "slot moved");
        Ok(())
    }

    pub async fn cancel_slot(&self, slot_id: &str) -> Result<()> {
        self.store
            .delete_slot(slot_id)
            .await
            .map_err(single_edit_error)?;
        info!(slot = %slot_id, "slot cancelled");
        Ok(())
    }

    /// # Errors
    ///
    /// [`BookingError::Validation`] before any store call for bad fields.
    pub async fn update_contract(&self, contract_id: &str, update: &ContractUpdate) -> Result<()> {
        update.validate()?;
        self.store
            .update_contract(contract_id, update)
            .await
            .map_err(single_edit_error)?;
        info!(contract = %contract_id, "contract updated");
        Ok(())
    }
}

/// A refused single-slot edit is a conflict the user must look at; anything
/// else is a transport problem.
fn single_edit_error(err: CollaboratorError) -> BookingError {
    match err {
        CollaboratorError::Rejected(reason) => BookingError::Conflict(reason),
        other => other.into(),
    }
}
