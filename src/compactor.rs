use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::MemoryStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have piled up. Returns whether it ran.
pub async fn compact_if_due(store: &MemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("journal compacted after {appends} appends");
            true
        }
        Err(e) => {
            error!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps a durable store's journal short.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    if !store.is_durable() {
        return;
    }
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::model::*;
    use crate::store::BookingStore;
    use ulid::Ulid;

    fn test_journal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("bayline_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_journal_path("threshold.journal");
        let store = MemoryStore::open(&path).unwrap();
        let resource = Resource::new(Ulid::new(), Ulid::nil(), ResourceKind::Bay, 1);
        store.upsert_resource(resource.clone()).await.unwrap();

        let mut booking = Booking {
            id: Ulid::new(),
            resource_id: Some(resource.id),
            location_id: Ulid::nil(),
            span: Span::new(1_000, 2_000),
            status: BookingStatus::Pending,
            series: None,
            customer_ref: "c".into(),
            service_ref: "s".into(),
            zone: None,
        };
        for status in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::InProgress] {
            booking.status = status;
            store.save_booking(&booking).await.unwrap();
        }

        assert!(!compact_if_due(&store, 10).await);
        assert_eq!(store.appends_since_compact().await, 4);

        assert!(compact_if_due(&store, 4).await);
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(Journal::replay(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ephemeral_store_exits_immediately() {
        let store = Arc::new(MemoryStore::new());
        // Returns instead of looping forever.
        run_compactor(store, 1).await;
    }
}
