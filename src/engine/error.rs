use crate::model::SlotScope;
use crate::store::StoreError;

/// Hard failures. Capacity rejections and cancellations are decisions, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The booking store could not be read or written. The engine fails closed.
    StoreUnavailable(String),
    LockTimeout(SlotScope),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::StoreUnavailable(e) => write!(f, "booking store unavailable: {e}"),
            EngineError::LockTimeout(scope) => write!(f, "timed out waiting for slot lock: {scope}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        metrics::counter!(crate::observability::STORE_ERRORS_TOTAL).increment(1);
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}
