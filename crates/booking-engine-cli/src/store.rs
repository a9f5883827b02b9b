//! Slot store that accepts everything and remembers what it was sent.

use std::sync::Mutex;

use async_trait::async_trait;
use booking_engine::materialize::{CreateContractRequest, CreateContractResponse};
use booking_engine::{CollaboratorError, ContractUpdate, SlotStore};
use chrono::{NaiveDate, NaiveTime};

#[derive(Default)]
pub struct DryRunStore {
    sent: Mutex<Option<CreateContractRequest>>,
}

impl DryRunStore {
    /// The last batch request, if any.
    pub fn sent(&self) -> Option<CreateContractRequest> {
        self.sent.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl SlotStore for DryRunStore {
    async fn create_contract(
        &self,
        request: &CreateContractRequest,
    ) -> Result<CreateContractResponse, CollaboratorError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| CollaboratorError::Unreachable("dry-run store poisoned".into()))?;
        *sent = Some(request.clone());
        Ok(CreateContractResponse {
            contract_id: None,
            created_count: request.occurrences.len(),
            failed: Vec::new(),
        })
    }

    async fn update_contract(
        &self,
        _contract_id: &str,
        _update: &ContractUpdate,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn change_slot_time(
        &self,
        _slot_id: &str,
        _date: NaiveDate,
        _time: NaiveTime,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn delete_slot(&self, _slot_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
