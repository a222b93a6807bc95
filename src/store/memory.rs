use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::*;

use super::{BookingStore, StoreError};

/// DashMap-backed booking table with a per-slot index.
pub struct InMemoryStore {
    bookings: DashMap<BookingId, Booking>,
    /// Slot → booking ids in insertion order. Includes cancelled bookings.
    by_scope: DashMap<SlotScope, Vec<BookingId>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_scope: DashMap::new(),
        }
    }

    // ── Booking CRUD ─────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get_booking(&self, id: &BookingId) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Upsert. A booking that moved to another slot is re-indexed.
    pub fn upsert(&self, booking: Booking) {
        let id = booking.id;
        let scope = booking.scope();
        let previous = self.bookings.insert(id, booking).map(|old| old.scope());
        match previous {
            Some(old) if old == scope => {}
            Some(old) => {
                self.unindex(&old, &id);
                self.by_scope.entry(scope).or_default().push(id);
            }
            None => self.by_scope.entry(scope).or_default().push(id),
        }
    }

    pub fn set_status(&self, id: &BookingId, status: BookingStatus) -> bool {
        match self.bookings.get_mut(id) {
            Some(mut b) => {
                b.status = status;
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, id: &BookingId) -> Option<Booking> {
        let (_, booking) = self.bookings.remove(id)?;
        self.unindex(&booking.scope(), id);
        Some(booking)
    }

    fn unindex(&self, scope: &SlotScope, id: &BookingId) {
        if let Some(mut ids) = self.by_scope.get_mut(scope) {
            ids.retain(|b| b != id);
        }
        self.by_scope.remove_if(scope, |_, ids| ids.is_empty());
    }

    // ── Scope index ──────────────────────────────────────────

    pub fn active_in_scope(&self, scope: &SlotScope, exclude: Option<BookingId>) -> Vec<BookingRef> {
        let ids = match self.by_scope.get(scope) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };
        ids.into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| {
                self.bookings
                    .get(id)
                    .is_some_and(|b| b.status.is_active())
            })
            .map(|id| BookingRef { id })
            .collect()
    }

    /// Every booking, grouped by slot in index order. Used to compact the log.
    pub fn snapshot(&self) -> Vec<Booking> {
        let mut scopes: Vec<SlotScope> = self.by_scope.iter().map(|e| *e.key()).collect();
        scopes.sort();
        let mut out = Vec::with_capacity(self.bookings.len());
        for scope in scopes {
            let ids = self
                .by_scope
                .get(&scope)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            out.extend(ids.iter().filter_map(|id| self.get_booking(id)));
        }
        out
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::BookingUpserted { booking } => self.upsert(booking.clone()),
            Event::StatusChanged { id, status } => {
                self.set_status(id, *status);
            }
            Event::BookingRemoved { id } => {
                self.delete(id);
            }
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find_by_scope(
        &self,
        scope: SlotScope,
        exclude: Option<BookingId>,
    ) -> Result<Vec<BookingRef>, StoreError> {
        Ok(self.active_in_scope(&scope, exclude))
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.get_booking(&id))
    }

    async fn save(&self, booking: &Booking) -> Result<(), StoreError> {
        self.upsert(booking.clone());
        Ok(())
    }

    async fn remove(&self, id: BookingId) -> Result<bool, StoreError> {
        Ok(self.delete(&id).is_some())
    }
}
