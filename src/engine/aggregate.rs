use tracing::debug;

use crate::limits::MAX_BOOKINGS_PER_SCOPE;
use crate::model::*;

use super::{CapacityEngine, EngineError};

impl CapacityEngine {
    /// Sum the counts of every active booking in `scope`, optionally without one booking.
    ///
    /// Bookings that vanish between the scope query and the detail fetch are skipped.
    /// A store failure fails the whole aggregation; a partial sum is never returned.
    /// Gates call this with the slot lock held.
    pub async fn aggregate(
        &self,
        scope: SlotScope,
        exclude: Option<BookingId>,
    ) -> Result<AggregateResult, EngineError> {
        let refs = self.store.find_by_scope(scope, exclude).await?;
        if refs.len() > MAX_BOOKINGS_PER_SCOPE {
            return Err(EngineError::LimitExceeded("too many bookings in slot"));
        }

        let mut total: u32 = 0;
        let mut counted = 0usize;
        for BookingRef { id } in refs {
            let Some(booking) = self.store.get(id).await? else {
                debug!(%id, "booking disappeared during aggregation");
                continue;
            };
            // The row may have changed between the two reads.
            if !booking.status.is_active() || booking.scope() != scope {
                continue;
            }
            let count = self.extract(Some(&booking.fields));
            debug!(%id, count, "existing booking");
            total = total.saturating_add(count);
            counted += 1;
        }

        debug!(%scope, total, counted, "slot aggregate");
        Ok(AggregateResult { scope, total, counted })
    }
}
