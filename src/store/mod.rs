//! The booking store seam. The engine only reads scope membership and field
//! data through it, and only ever writes a status transition.

mod memory;
mod wal_store;

pub use memory::InMemoryStore;
pub use wal_store::WalStore;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be read or written.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "booking store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Active (scheduled or confirmed) bookings in `scope`, in insertion order,
    /// without `exclude` if given.
    async fn find_by_scope(
        &self,
        scope: SlotScope,
        exclude: Option<BookingId>,
    ) -> Result<Vec<BookingRef>, StoreError>;

    /// `Ok(None)` if the booking no longer exists.
    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Insert or overwrite.
    async fn save(&self, booking: &Booking) -> Result<(), StoreError>;

    /// Returns whether the booking existed.
    async fn remove(&self, id: BookingId) -> Result<bool, StoreError>;
}
