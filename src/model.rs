use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor used at every engine boundary.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// One-millisecond probe `[t, t+1)`.
    pub fn instant(t: Ms) -> Self {
        Self { start: t, end: t + 1 }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Same duration, new start.
    pub fn shifted_to(&self, start: Ms) -> Self {
        Self {
            start,
            end: start + self.duration_ms(),
        }
    }
}

/// Physical kind of a bookable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bay,
    Lift,
    Room,
    Equipment,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub location_id: Ulid,
    pub kind: ResourceKind,
    /// Max concurrent bookings, always >= 1.
    pub max_concurrent_bookings: u32,
    pub is_active: bool,
}

impl Resource {
    pub fn new(id: Ulid, location_id: Ulid, kind: ResourceKind, max_concurrent_bookings: u32) -> Self {
        Self {
            id,
            location_id,
            kind,
            max_concurrent_bookings: max_concurrent_bookings.max(1),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
    ];

    /// Counts toward a resource's concurrency usage.
    pub fn is_active_occupying(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active_occupying()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque recurring-series grouping. The engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRef {
    pub series_id: Ulid,
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Unassigned bookings never participate in capacity checks.
    pub resource_id: Option<Ulid>,
    pub location_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    #[serde(default)]
    pub series: Option<SeriesRef>,
    pub customer_ref: String,
    pub service_ref: String,
    /// Caller-supplied zone name, carried but never interpreted.
    #[serde(default)]
    pub zone: Option<String>,
}

impl Booking {
    /// Occupies `resource_id` at some point inside `span`.
    pub fn occupies(&self, resource_id: Ulid, span: &Span) -> bool {
        self.resource_id == Some(resource_id)
            && self.status.is_active_occupying()
            && self.span.overlaps(span)
    }
}

/// Journal record format for the reference store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    ResourceUpserted(Resource),
    BookingSaved(Booking),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(-5, 0),
            Span::new(2, 3),
            Span::new(0, 1),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(matches!(
            Span::try_new(10, 10),
            Err(EngineError::InvalidRange { start: 10, end: 10 })
        ));
        assert!(matches!(
            Span::try_new(20, 10),
            Err(EngineError::InvalidRange { .. })
        ));
        assert_eq!(Span::try_new(10, 11).unwrap(), Span::new(10, 11));
    }

    #[test]
    fn shifted_preserves_duration() {
        let s = Span::new(1_000, 4_600);
        let moved = s.shifted_to(-2_000);
        assert_eq!(moved.start, -2_000);
        assert_eq!(moved.duration_ms(), s.duration_ms());
    }

    #[test]
    fn instant_probe_is_one_ms() {
        let p = Span::instant(500);
        assert_eq!(p.duration_ms(), 1);
        assert!(p.overlaps(&Span::new(0, 501)));
        assert!(!p.overlaps(&Span::new(0, 500)));
    }

    #[test]
    fn status_partitions() {
        for s in BookingStatus::ALL {
            assert_ne!(s.is_active_occupying(), s.is_terminal(), "{s}");
        }
        assert!(BookingStatus::Pending.is_active_occupying());
        assert!(BookingStatus::InProgress.is_active_occupying());
        assert!(BookingStatus::NoShow.is_terminal());
    }

    #[test]
    fn resource_clamps_zero_capacity() {
        let r = Resource::new(Ulid::new(), Ulid::new(), ResourceKind::Bay, 0);
        assert_eq!(r.max_concurrent_bookings, 1);
        assert!(r.is_active);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&BookingStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: BookingStatus = serde_json::from_str("\"no_show\"").unwrap();
        assert_eq!(back, BookingStatus::NoShow);
    }

    #[test]
    fn store_event_bincode_roundtrip() {
        let event = StoreEvent::ResourceUpserted(Resource::new(
            Ulid::new(),
            Ulid::new(),
            ResourceKind::Lift,
            2,
        ));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: StoreEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
