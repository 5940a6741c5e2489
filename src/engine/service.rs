use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::{Change, NotifyHub};
use crate::observability::{self, Op};
use crate::store::{BookingStore, StoreError};

use super::capacity::{self, CapacitySnapshot};
use super::lifecycle;
use super::overlap::BookingTimeline;
use super::reschedule::{
    validate_new_booking, validate_reschedule, validate_span, BookingAccepted, RescheduleAccepted,
};
use super::EngineError;

/// A booking that changed resource between our read and our lock is re-read
/// this many times before giving up with `Busy`.
const MAX_RELOCK_ATTEMPTS: usize = 3;

pub type ResourceLock = Arc<Mutex<()>>;
type LockMap = DashMap<Ulid, ResourceLock>;

/// Held serialization over a set of resources. Dropping releases them and
/// evicts lock entries nobody else holds or waits on.
pub struct ResourceGuard {
    keys: Vec<Ulid>,
    guards: Vec<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl ResourceGuard {
    pub fn keys(&self) -> &[Ulid] {
        &self.keys
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            // The map's own reference is the last one: no holder, no waiter.
            self.locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

/// Lock key for a booking: its resource, or the booking itself when unassigned.
fn lock_key(booking: &Booking) -> Ulid {
    booking.resource_id.unwrap_or(booking.id)
}

/// The facade external collaborators call.
///
/// Holds no booking state. Reads go through the [`BookingStore`]; accepted
/// mutations are written back through it while the affected resources are
/// still serialized, so two actors can never both pass a capacity check that
/// was computed before either committed. Different resources never contend.
pub struct SchedulingService<S: BookingStore> {
    store: Arc<S>,
    notify: Arc<NotifyHub>,
    locks: Arc<LockMap>,
    lock_timeout: Duration,
}

impl<S: BookingStore> SchedulingService<S> {
    pub fn new(store: Arc<S>, notify: Arc<NotifyHub>, config: &EngineConfig) -> Self {
        Self {
            store,
            notify,
            locks: Arc::new(DashMap::new()),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    fn lock_for(&self, key: Ulid) -> ResourceLock {
        self.locks.entry(key).or_default().clone()
    }

    /// Lock entries currently in the map. Zero when nothing is serialized.
    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    /// Serialize against every other mutation touching `keys`.
    ///
    /// Locks are taken in sorted order so overlapping key sets cannot
    /// deadlock. Fails with `Busy` once the configured timeout elapses.
    pub async fn serialize_resources(&self, keys: &[Ulid]) -> Result<ResourceGuard, EngineError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        let mut held = ResourceGuard {
            keys: Vec::with_capacity(keys.len()),
            guards: Vec::with_capacity(keys.len()),
            locks: self.locks.clone(),
        };
        for key in keys {
            let lock = self.lock_for(key);
            // Tracked before waiting so a timeout still evicts the entry.
            held.keys.push(key);
            match tokio::time::timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => held.guards.push(guard),
                Err(_) => {
                    warn!("lock timeout on {key} after {:?}", self.lock_timeout);
                    metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                    return Err(EngineError::Busy(key));
                }
            }
        }
        Ok(held)
    }

    /// Read a booking, lock the keys `keys_of` derives from it, and re-read
    /// under the lock. Retries if the keys moved in between.
    async fn load_locked<F>(&self, booking_id: Ulid, keys_of: F) -> Result<(Booking, ResourceGuard), EngineError>
    where
        F: Fn(&Booking) -> Vec<Ulid>,
    {
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            let seen = self.store.get_booking(booking_id).await?;
            let mut keys = keys_of(&seen);
            let guard = self.serialize_resources(&keys).await?;
            let current = self.store.get_booking(booking_id).await?;
            let mut now_keys = keys_of(&current);
            keys.sort();
            keys.dedup();
            now_keys.sort();
            now_keys.dedup();
            if keys == now_keys {
                return Ok((current, guard));
            }
            debug!("booking {booking_id} moved while waiting for lock, retrying");
        }
        Err(EngineError::Busy(booking_id))
    }

    async fn target_and_bookings(
        &self,
        resource_id: Ulid,
        hint: Span,
    ) -> Result<(Resource, Vec<Booking>), EngineError> {
        let resource = self.store.get_resource(resource_id).await?;
        let bookings = self
            .store
            .list_active_bookings_for_resource(resource_id, hint)
            .await?;
        Ok((resource, bookings))
    }

    // ── Mutations ─────────────────────────────────────────────────

    /// Validate and commit a move. Capacity overflow is reported, never blocking.
    pub async fn propose_reschedule(
        &self,
        booking_id: Ulid,
        proposed_start: Ms,
        proposed_resource_id: Option<Ulid>,
    ) -> Result<RescheduleAccepted, EngineError> {
        let started = Instant::now();
        let result = self
            .reschedule(booking_id, proposed_start, proposed_resource_id, true)
            .await;
        observability::record(Op::ProposeReschedule, started, &result);
        result
    }

    /// Same decision as [`propose_reschedule`](Self::propose_reschedule), nothing written.
    pub async fn preview_reschedule(
        &self,
        booking_id: Ulid,
        proposed_start: Ms,
        proposed_resource_id: Option<Ulid>,
    ) -> Result<RescheduleAccepted, EngineError> {
        let started = Instant::now();
        let result = self
            .reschedule(booking_id, proposed_start, proposed_resource_id, false)
            .await;
        observability::record(Op::PreviewReschedule, started, &result);
        result
    }

    async fn reschedule(
        &self,
        booking_id: Ulid,
        proposed_start: Ms,
        proposed_resource_id: Option<Ulid>,
        commit: bool,
    ) -> Result<RescheduleAccepted, EngineError> {
        let (booking, _guard) = self
            .load_locked(booking_id, |b| {
                let mut keys = vec![lock_key(b)];
                keys.extend(proposed_resource_id);
                keys
            })
            .await?;

        let target_id = proposed_resource_id.or(booking.resource_id);
        let no_op = proposed_start == booking.span.start && target_id == booking.resource_id;
        if !no_op && booking.status.is_terminal() {
            debug!("reschedule of {booking_id} rejected: status {}", booking.status);
            return Err(EngineError::TerminalBookingImmutable {
                id: booking_id,
                status: booking.status,
            });
        }

        let (target, at_target) = match target_id {
            Some(tid) => {
                let end = proposed_start
                    .checked_add(booking.span.duration_ms())
                    .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
                let hint = Span::try_new(proposed_start, end)?;
                let (r, list) = self.target_and_bookings(tid, hint).await?;
                (Some(r), list)
            }
            None => (None, Vec::new()),
        };

        let decision = match validate_reschedule(&booking, proposed_start, target.as_ref(), &at_target) {
            Ok(d) => d,
            Err(e) => {
                debug!("reschedule of {booking_id} rejected: {e}");
                return Err(e);
            }
        };

        if let Some(ref w) = decision.warning {
            warn!(
                "booking {booking_id} over capacity on {}: {}/{}",
                w.resource_id, w.snapshot.used, w.snapshot.max
            );
            if commit {
                metrics::counter!(observability::CAPACITY_WARNINGS_TOTAL).increment(1);
            }
        }

        if commit && !decision.no_op {
            let mut updated = booking.clone();
            updated.span = decision.span;
            updated.resource_id = decision.resource_id;
            self.store.save_booking(&updated).await?;
            info!(
                "rescheduled {booking_id}: [{}, {}) on {:?}",
                decision.span.start, decision.span.end, decision.resource_id
            );

            let change = Change::Rescheduled {
                booking_id,
                from_resource: booking.resource_id,
                to_resource: decision.resource_id,
                span: decision.span,
            };
            self.broadcast(&[booking.resource_id, decision.resource_id], &change);
        }

        Ok(decision)
    }

    /// Apply a lifecycle transition and persist it.
    pub async fn request_transition(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.transition(booking_id, to).await;
        observability::record(Op::RequestTransition, started, &result);
        result
    }

    async fn transition(&self, booking_id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let (booking, _guard) = self.load_locked(booking_id, |b| vec![lock_key(b)]).await?;
        let updated = match lifecycle::transition(&booking, to) {
            Ok(b) => b,
            Err(e) => {
                debug!("transition of {booking_id} rejected: {e}");
                return Err(e);
            }
        };
        self.store.save_booking(&updated).await?;
        info!("booking {booking_id}: {} -> {}", booking.status, updated.status);

        let change = Change::StatusChanged {
            booking_id,
            from: booking.status,
            to: updated.status,
        };
        self.broadcast(&[updated.resource_id], &change);
        Ok(updated)
    }

    /// Admit and persist a new booking in `pending` or `confirmed`.
    pub async fn propose_booking(&self, booking: Booking) -> Result<BookingAccepted, EngineError> {
        let started = Instant::now();
        let result = self.create(booking).await;
        observability::record(Op::ProposeBooking, started, &result);
        result
    }

    async fn create(&self, booking: Booking) -> Result<BookingAccepted, EngineError> {
        validate_span(&booking.span)?;
        let _guard = self.serialize_resources(&[lock_key(&booking)]).await?;

        match self.store.get_booking(booking.id).await {
            Ok(_) => return Err(EngineError::AlreadyExists(booking.id)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let accepted = match booking.resource_id {
            Some(rid) => {
                let (resource, existing) = self.target_and_bookings(rid, booking.span).await?;
                validate_new_booking(&booking, Some(&resource), &existing)?
            }
            None => validate_new_booking(&booking, None, &Vec::<Booking>::new())?,
        };

        if let Some(ref w) = accepted.warning {
            warn!(
                "new booking {} over capacity on {}: {}/{}",
                booking.id, w.resource_id, w.snapshot.used, w.snapshot.max
            );
            metrics::counter!(observability::CAPACITY_WARNINGS_TOTAL).increment(1);
        }

        self.store.save_booking(&accepted.booking).await?;
        info!("created booking {} as {}", booking.id, booking.status);
        self.broadcast(
            &[booking.resource_id],
            &Change::Created {
                booking_id: booking.id,
                span: booking.span,
            },
        );
        Ok(accepted)
    }

    fn broadcast(&self, resources: &[Option<Ulid>], change: &Change) {
        let mut ids: Vec<Ulid> = resources.iter().flatten().copied().collect();
        ids.sort();
        ids.dedup();
        for id in ids {
            self.notify.send(id, change);
        }
    }

    // ── Reads ─────────────────────────────────────────────────────

    pub async fn capacity_snapshot(
        &self,
        resource_id: Ulid,
        probe: Span,
    ) -> Result<CapacitySnapshot, EngineError> {
        let started = Instant::now();
        let result: Result<CapacitySnapshot, EngineError> = async {
            validate_span(&probe)?;
            let (resource, bookings) = self.target_and_bookings(resource_id, probe).await?;
            Ok(capacity::capacity_at(&resource, &bookings, &probe))
        }
        .await;
        observability::record(Op::CapacitySnapshot, started, &result);
        result
    }

    pub async fn capacity_over_window(
        &self,
        resource_id: Ulid,
        window_start: Ms,
        window_end: Ms,
        slot_size: Ms,
    ) -> Result<Vec<CapacitySnapshot>, EngineError> {
        let started = Instant::now();
        let result: Result<Vec<CapacitySnapshot>, EngineError> = async {
            let window = Span::try_new(window_start, window_end)?;
            validate_span(&window)?;
            let (resource, bookings) = self.target_and_bookings(resource_id, window).await?;
            let timeline = BookingTimeline::from_bookings(bookings);
            capacity::capacity_over_window(&resource, &timeline, window_start, window_end, slot_size)
        }
        .await;
        observability::record(Op::CapacityOverWindow, started, &result);
        result
    }

    /// Sub-spans of `window` where `resource_id` is at or over its limit.
    pub async fn saturated_spans(&self, resource_id: Ulid, window: Span) -> Result<Vec<Span>, EngineError> {
        let started = Instant::now();
        let result: Result<Vec<Span>, EngineError> = async {
            validate_span(&window)?;
            let (resource, bookings) = self.target_and_bookings(resource_id, window).await?;
            Ok(capacity::saturated_spans(&resource, &bookings, &window))
        }
        .await;
        observability::record(Op::SaturatedSpans, started, &result);
        result
    }
}
