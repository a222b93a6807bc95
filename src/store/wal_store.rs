use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::engine::LockTable;
use crate::model::*;
use crate::wal::Wal;

use super::{BookingStore, InMemoryStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| io::Error::new(e.kind(), e.to_string())),
            );
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a partial frame doesn't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Durable booking store: an [`InMemoryStore`] whose every write is first
/// committed to an append-only log and replayed on open.
pub struct WalStore {
    state: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Orders log append + apply per booking.
    booking_locks: LockTable<BookingId>,
    /// Writers share it; compaction takes it exclusively so the snapshot
    /// can't miss an event that is logged but not yet applied.
    compaction_gate: RwLock<()>,
}

impl WalStore {
    /// Must be called inside a tokio runtime: spawns the writer task.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let state = InMemoryStore::new();
        for event in &events {
            state.apply_event(event);
        }
        info!(events = events.len(), bookings = state.len(), "replayed booking log {}", path.display());

        Ok(Self {
            state,
            wal_tx,
            booking_locks: LockTable::default(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL error: {e}")))
    }

    /// Log, then apply. Nothing becomes visible before it is durable.
    /// `make_event` sees the booking's current state under its lock; `None` skips the write.
    async fn persist_and_apply(
        &self,
        id: BookingId,
        make_event: impl FnOnce(Option<Booking>) -> Option<Event>,
    ) -> Result<bool, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let _guard = self
            .booking_locks
            .acquire(id)
            .await
            .map_err(|_| StoreError::Unavailable("booking lock timed out".into()))?;
        let Some(event) = make_event(self.state.get_booking(&id)) else {
            return Ok(false);
        };
        self.wal_append(&event).await?;
        self.state.apply_event(&event);
        Ok(true)
    }

    /// Rewrite the log as one upsert per stored booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.write().await;
        let events: Vec<Event> = self
            .state
            .snapshot()
            .into_iter()
            .map(|booking| Event::BookingUpserted { booking })
            .collect();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL compaction failed: {e}")))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn find_by_scope(
        &self,
        scope: SlotScope,
        exclude: Option<BookingId>,
    ) -> Result<Vec<BookingRef>, StoreError> {
        Ok(self.state.active_in_scope(&scope, exclude))
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.get_booking(&id))
    }

    async fn save(&self, booking: &Booking) -> Result<(), StoreError> {
        self.persist_and_apply(booking.id, |current| {
            // A pure status flip is logged as the smaller event.
            Some(match current {
                Some(current) if current == Booking { status: current.status, ..booking.clone() } => {
                    Event::StatusChanged {
                        id: booking.id,
                        status: booking.status,
                    }
                }
                _ => Event::BookingUpserted {
                    booking: booking.clone(),
                },
            })
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, id: BookingId) -> Result<bool, StoreError> {
        self.persist_and_apply(id, |current| current.map(|_| Event::BookingRemoved { id }))
            .await
    }
}
