use tracing::{debug, info};

use crate::model::*;

use super::{CapacityEngine, EngineError};

impl CapacityEngine {
    /// Post-persist check and the authoritative enforcement point.
    ///
    /// With the slot lock held, sums every other active booking in the slot plus
    /// this booking's own count. Over the ceiling, the booking is cancelled and the
    /// cancellation is written to the stored row before the lock is released. `booking.status` is only
    /// changed once the store accepted the write.
    pub async fn reconcile(&self, booking: &mut Booking) -> Result<ReconcileDecision, EngineError> {
        if !self.in_scope(&booking.event_kind, booking.event_id) {
            return Ok(self.record_reconcile(ReconcileDecision::Keep, "out_of_scope"));
        }
        if !booking.status.is_active() {
            // Already cancelled: nothing to enforce, no second report.
            return Ok(self.record_reconcile(ReconcileDecision::Keep, "inactive"));
        }
        let own = self.extract(Some(&booking.fields));
        if own == 0 {
            return Ok(self.record_reconcile(ReconcileDecision::Keep, "zero_count"));
        }

        let scope = booking.scope();
        let ceiling = self.config.ceiling_for(booking.event_id);
        let store = &self.store;
        let decision = self
            .locks
            .with_lock(scope, || async move {
                let others = self.aggregate(scope, Some(booking.id)).await?;
                let total = others.total.saturating_add(own);
                if total <= ceiling {
                    debug!(%scope, id = %booking.id, own, others = others.total, ceiling, "keeping booking");
                    return Ok(ReconcileDecision::Keep);
                }

                info!(%scope, id = %booking.id, own, others = others.total, ceiling, "slot over capacity, cancelling booking");
                // Flip the stored row so a newer write to it isn't undone.
                let mut cancelled = store.get(booking.id).await?.unwrap_or_else(|| booking.clone());
                cancelled.status = BookingStatus::Cancelled;
                store.save(&cancelled).await?;
                booking.status = BookingStatus::Cancelled;

                Ok(ReconcileDecision::Cancel(CapacityReport {
                    ceiling,
                    remaining: ceiling.saturating_sub(others.total),
                    attempted: own,
                }))
            })
            .await?;

        let label = match decision {
            ReconcileDecision::Keep => "keep",
            ReconcileDecision::Cancel(_) => "cancel",
        };
        Ok(self.record_reconcile(decision, label))
    }

    fn record_reconcile(&self, decision: ReconcileDecision, label: &'static str) -> ReconcileDecision {
        metrics::counter!(crate::observability::RECONCILIATIONS_TOTAL, "decision" => label).increment(1);
        decision
    }
}
