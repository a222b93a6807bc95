use tracing::{debug, info};

use crate::model::*;

use super::{CapacityEngine, EngineError};

impl CapacityEngine {
    /// Pre-create check. Rejects only when the slot is already at or over the
    /// ceiling; the request's own count is unknown until its fields are saved.
    pub async fn check(&self, request: &BookingRequest) -> Result<AdmissionDecision, EngineError> {
        if !self.in_scope(&request.event_kind, request.event_id) {
            return Ok(self.record_admission(AdmissionDecision::Admit, "out_of_scope"));
        }
        let Some(slot_start) = request.slot_start else {
            return Ok(self.record_admission(AdmissionDecision::Admit, "out_of_scope"));
        };

        let scope = SlotScope::new(request.event_id, slot_start);
        let ceiling = self.config.ceiling_for(request.event_id);
        let existing = self
            .locks
            .with_lock(scope, || self.aggregate(scope, None))
            .await?;

        if existing.total >= ceiling {
            info!(%scope, existing = existing.total, ceiling, "slot full, rejecting booking request");
            let reason = format!("slot is full: {} of {ceiling} already booked", existing.total);
            return Ok(self.record_admission(AdmissionDecision::Reject { reason }, "reject"));
        }
        debug!(%scope, existing = existing.total, ceiling, "admitting booking request");
        Ok(self.record_admission(AdmissionDecision::Admit, "admit"))
    }

    fn record_admission(&self, decision: AdmissionDecision, label: &'static str) -> AdmissionDecision {
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "decision" => label).increment(1);
        decision
    }
}
