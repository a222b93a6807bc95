//! The capacity admission engine.
//!
//! Two gates share one lock table:
//! - [`CapacityEngine::check`] runs before a booking is created and rejects only
//!   when its slot is already full.
//! - [`CapacityEngine::reconcile`] runs after the booking's fields are saved and
//!   cancels it if the slot total, now including it, exceeds the ceiling.
//!
//! Both hold the slot's lock across their aggregate read (and the cancellation
//! write), so for any one slot they are totally ordered. The lock is in-process:
//! every writer to a booking table must go through the same engine instance.

mod admission;
mod aggregate;
mod error;
mod extract;
mod lock;
mod reconcile;
mod scope;

pub use error::EngineError;
pub use extract::extract_count;
pub use lock::{KeyGuard, LockTable, SlotLocks};
pub use scope::in_scope;

use std::sync::Arc;

use crate::config::EventLimitConfig;
use crate::store::BookingStore;

pub struct CapacityEngine {
    config: Arc<EventLimitConfig>,
    store: Arc<dyn BookingStore>,
    locks: SlotLocks,
}

impl CapacityEngine {
    pub fn new(config: Arc<EventLimitConfig>, store: Arc<dyn BookingStore>) -> Self {
        let locks = SlotLocks::new(config.lock_timeout)
            .with_active_gauge(crate::observability::SLOT_LOCKS_ACTIVE);
        Self { config, store, locks }
    }

    pub fn config(&self) -> &EventLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub fn locks(&self) -> &SlotLocks {
        &self.locks
    }
}
