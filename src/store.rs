use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::engine::{BookingTimeline, CandidateSource, EngineError};
use crate::journal::Journal;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Io(msg) => EngineError::Store(msg),
        }
    }
}

/// Persistence collaborator. The engine reads through it and, for accepted
/// mutations, writes back through `save_booking`.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn get_resource(&self, id: Ulid) -> Result<Resource, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Booking, StoreError>;

    /// Active-occupying bookings on `resource_id`. `range_hint` may be used to
    /// narrow the result; returning extra bookings is allowed.
    async fn list_active_bookings_for_resource(
        &self,
        resource_id: Ulid,
        range_hint: Span,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Insert or replace.
    async fn save_booking(&self, booking: &Booking) -> Result<(), StoreError>;
}

/// DashMap-backed reference store, optionally durable through a [`Journal`].
pub struct MemoryStore {
    resources: DashMap<Ulid, Resource>,
    bookings: DashMap<Ulid, Booking>,
    by_resource: DashMap<Ulid, BookingTimeline>,
    /// Serializes all writes; holds the journal when durable.
    writer: Mutex<Option<Journal>>,
    durable: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Ephemeral store.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
            by_resource: DashMap::new(),
            writer: Mutex::new(None),
            durable: false,
        }
    }

    /// Replay the journal at `path` and keep appending to it. A torn tail is
    /// cut off first so new entries stay reachable on the next replay.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let (journal, events) = Journal::recover(path)?;
        let store = Self::new();
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            "store opened: {} ({} events, {} resources, {} bookings)",
            path.display(),
            events.len(),
            store.resources.len(),
            store.bookings.len()
        );
        Ok(Self {
            writer: Mutex::new(Some(journal)),
            durable: true,
            ..store
        })
    }

    fn apply(&self, event: &StoreEvent) {
        match event {
            StoreEvent::ResourceUpserted(resource) => {
                self.resources.insert(resource.id, resource.clone());
            }
            StoreEvent::BookingSaved(booking) => {
                if let Some(previous) = self.bookings.insert(booking.id, booking.clone())
                    && let Some(old_rid) = previous.resource_id
                    && let Some(mut tl) = self.by_resource.get_mut(&old_rid)
                {
                    tl.remove(previous.id);
                }
                if let Some(rid) = booking.resource_id {
                    self.by_resource.entry(rid).or_default().insert(booking.clone());
                }
            }
        }
    }

    async fn persist_and_apply(&self, event: StoreEvent) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        if let Some(journal) = writer.as_mut() {
            let start = std::time::Instant::now();
            journal.append(&event)?;
            metrics::histogram!(crate::observability::JOURNAL_APPEND_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
        }
        self.apply(&event);
        Ok(())
    }

    pub async fn upsert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        self.persist_and_apply(StoreEvent::ResourceUpserted(resource)).await
    }

    pub fn contains_booking(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.writer
            .lock()
            .await
            .as_ref()
            .map_or(0, Journal::appends_since_compact)
    }

    /// Rewrite the journal with one event per live entity. No-op when ephemeral.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        let Some(journal) = writer.as_mut() else {
            return Ok(());
        };
        let mut events: Vec<StoreEvent> = self
            .resources
            .iter()
            .map(|e| StoreEvent::ResourceUpserted(e.value().clone()))
            .collect();
        events.extend(
            self.bookings
                .iter()
                .map(|e| StoreEvent::BookingSaved(e.value().clone())),
        );
        journal.compact(&events)?;
        tracing::info!("compacted {} to {} events", journal.path().display(), events.len());
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn get_resource(&self, id: Ulid) -> Result<Resource, StoreError> {
        self.resources
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_booking(&self, id: Ulid) -> Result<Booking, StoreError> {
        self.bookings
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_active_bookings_for_resource(
        &self,
        resource_id: Ulid,
        range_hint: Span,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .by_resource
            .get(&resource_id)
            .map(|tl| {
                tl.candidates(range_hint)
                    .filter(|b| b.status.is_active_occupying())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.persist_and_apply(StoreEvent::BookingSaved(booking.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("bayline_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(resource_id: Option<Ulid>, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id,
            location_id: Ulid::nil(),
            span: Span::new(start, end),
            status,
            series: None,
            customer_ref: "c".into(),
            service_ref: "s".into(),
            zone: None,
        }
    }

    #[tokio::test]
    async fn list_filters_status_and_range() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        store.save_booking(&booking(Some(rid), 0, 100, BookingStatus::Confirmed)).await.unwrap();
        store.save_booking(&booking(Some(rid), 0, 100, BookingStatus::Cancelled)).await.unwrap();
        store.save_booking(&booking(Some(rid), 500, 600, BookingStatus::Pending)).await.unwrap();
        store.save_booking(&booking(None, 0, 100, BookingStatus::Pending)).await.unwrap();

        let hits = store
            .list_active_bookings_for_resource(rid, Span::new(50, 150))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, BookingStatus::Confirmed);
        assert_eq!(store.booking_count(), 4);
    }

    #[tokio::test]
    async fn save_moves_booking_between_resources() {
        let store = MemoryStore::new();
        let r1 = Ulid::new();
        let r2 = Ulid::new();
        let mut b = booking(Some(r1), 0, 100, BookingStatus::Confirmed);
        store.save_booking(&b).await.unwrap();

        b.resource_id = Some(r2);
        b.span = Span::new(200, 300);
        store.save_booking(&b).await.unwrap();

        let all = Span::new(0, 1_000);
        assert!(store.list_active_bookings_for_resource(r1, all).await.unwrap().is_empty());
        let on_r2 = store.list_active_bookings_for_resource(r2, all).await.unwrap();
        assert_eq!(on_r2, vec![b.clone()]);
        assert_eq!(store.get_booking(b.id).await.unwrap(), b);
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let store = MemoryStore::new();
        let id = Ulid::new();
        assert_eq!(store.get_resource(id).await.unwrap_err(), StoreError::NotFound(id));
        assert_eq!(
            EngineError::from(store.get_booking(id).await.unwrap_err()),
            EngineError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn durable_store_survives_reopen_and_compaction() {
        let path = tmp_path("reopen.journal");
        let resource = Resource::new(Ulid::new(), Ulid::new(), ResourceKind::Room, 3);
        let mut b = booking(Some(resource.id), 0, 100, BookingStatus::Pending);
        {
            let store = MemoryStore::open(&path).unwrap();
            assert!(store.is_durable());
            store.upsert_resource(resource.clone()).await.unwrap();
            store.save_booking(&b).await.unwrap();
            b.status = BookingStatus::Confirmed;
            store.save_booking(&b).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 3);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
        }
        assert_eq!(Journal::replay(&path).unwrap().len(), 2);

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.get_resource(resource.id).await.unwrap(), resource);
        assert_eq!(reopened.get_booking(b.id).await.unwrap().status, BookingStatus::Confirmed);
        assert_eq!(reopened.resource_count(), 1);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_reopen() {
        use std::io::Write;

        let path = tmp_path("torn_then_append.journal");
        let r1 = Resource::new(Ulid::new(), Ulid::nil(), ResourceKind::Bay, 1);
        let r2 = Resource::new(Ulid::new(), Ulid::nil(), ResourceKind::Lift, 2);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.upsert_resource(r1.clone()).await.unwrap();
        }
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        let mut b = booking(Some(r2.id), 0, 100, BookingStatus::Pending);
        {
            let store = MemoryStore::open(&path).unwrap();
            assert_eq!(store.resource_count(), 1);
            store.upsert_resource(r2.clone()).await.unwrap();
            store.save_booking(&b).await.unwrap();
            b.status = BookingStatus::Confirmed;
            store.save_booking(&b).await.unwrap();
        }
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.get_resource(r1.id).await.unwrap(), r1);
        assert_eq!(reopened.get_resource(r2.id).await.unwrap(), r2);
        assert_eq!(reopened.get_booking(b.id).await.unwrap().status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn ephemeral_compact_is_noop() {
        let store = MemoryStore::new();
        assert!(!store.is_durable());
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
