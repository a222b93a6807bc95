//! Host lifecycle adapter. Translates "before create" and "after meta update"
//! callbacks into gate calls and builds the structured rejection the host sends back.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::{CapacityEngine, EngineError};
use crate::model::*;

pub const REJECTION_STATUS: u16 = 400;
pub const REJECTION_TITLE: &str = "Booking Unavailable";

/// What the host should answer instead of its normal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
    pub title: &'static str,
    pub status: u16,
    #[serde(flatten)]
    pub report: Option<CapacityReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Let the host continue unmodified.
    Proceed,
    Reject(Rejection),
}

pub struct LifecycleHooks {
    engine: Arc<CapacityEngine>,
}

impl LifecycleHooks {
    pub fn new(engine: Arc<CapacityEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<CapacityEngine> {
        &self.engine
    }

    fn full_message(ceiling: u32) -> String {
        format!("Sorry, this event has reached the maximum number of children ({ceiling}).")
    }

    /// Before a booking is created. May short-circuit creation.
    pub async fn before_create(&self, request: &BookingRequest) -> Result<HookOutcome, EngineError> {
        match self.engine.check(request).await? {
            AdmissionDecision::Admit => Ok(HookOutcome::Proceed),
            AdmissionDecision::Reject { reason } => {
                tracing::debug!(%reason, "pre-create rejected");
                let ceiling = self.engine.config().ceiling_for(request.event_id);
                Ok(HookOutcome::Reject(Rejection {
                    message: Self::full_message(ceiling),
                    title: REJECTION_TITLE,
                    status: REJECTION_STATUS,
                    report: None,
                }))
            }
        }
    }

    /// After a booking's custom fields are saved. May cancel the booking
    /// (already persisted when this returns) and short-circuit the response.
    pub async fn after_meta_update(&self, booking: &mut Booking) -> Result<HookOutcome, EngineError> {
        match self.engine.reconcile(booking).await? {
            ReconcileDecision::Keep => Ok(HookOutcome::Proceed),
            ReconcileDecision::Cancel(report) => Ok(HookOutcome::Reject(Rejection {
                message: Self::full_message(report.ceiling),
                title: REJECTION_TITLE,
                status: REJECTION_STATUS,
                report: Some(report),
            })),
        }
    }
}
