use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::WalStore;

/// Background task that compacts the booking log once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!(appends, bookings = store.len(), "compacted booking log");
            true
        }
        Err(e) => {
            warn!("booking log compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::BookingStore;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotcap_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = WalStore::open(&path).unwrap();
        let mut b = Booking {
            id: Ulid::new(),
            event_id: 8,
            event_kind: EventKind::Group,
            slot_start: 0,
            status: BookingStatus::Scheduled,
            fields: FieldMap::new(),
        };
        store.save(&b).await.unwrap();
        b.status = BookingStatus::Confirmed;
        store.save(&b).await.unwrap();

        assert!(!compact_if_needed(&store, 3).await);
        assert_eq!(store.appends_since_compact().await, 2);

        assert!(compact_if_needed(&store, 2).await);
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(store.get(b.id).await.unwrap().unwrap().status, BookingStatus::Confirmed);
    }
}
