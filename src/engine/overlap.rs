use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

// ── Overlap Detector ──────────────────────────────────────────────

/// Every booking whose span overlaps `range` (strict half-open).
/// No resource or status filtering happens here.
pub fn find_overlapping<'a, I>(range: &Span, bookings: I) -> Vec<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    bookings
        .into_iter()
        .filter(|b| b.span.overlaps(range))
        .collect()
}

/// Same as [`find_overlapping`], over a pre-narrowed candidate source.
pub fn find_overlapping_in<'a, S>(source: &'a S, range: &Span) -> Vec<&'a Booking>
where
    S: CandidateSource + ?Sized,
{
    find_overlapping(range, source.candidates(*range))
}

/// A lookup that yields a superset of the bookings overlapping `range`.
///
/// Plain slices yield everything; indexed sources may skip bookings they can
/// prove do not overlap. The detector re-checks every candidate.
pub trait CandidateSource {
    fn candidates(&self, range: Span) -> impl Iterator<Item = &Booking>;
}

impl CandidateSource for [Booking] {
    fn candidates(&self, _range: Span) -> impl Iterator<Item = &Booking> {
        self.iter()
    }
}

impl CandidateSource for Vec<Booking> {
    fn candidates(&self, _range: Span) -> impl Iterator<Item = &Booking> {
        self.iter()
    }
}

// ── Indexed sources ───────────────────────────────────────────────

/// Bookings kept sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct BookingTimeline {
    bookings: Vec<Booking>,
}

impl BookingTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let mut bookings: Vec<Booking> = bookings.into_iter().collect();
        bookings.sort_by_key(|b| b.span.start);
        Self { bookings }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn as_slice(&self) -> &[Booking] {
        &self.bookings
    }
}

impl CandidateSource for BookingTimeline {
    fn candidates(&self, range: Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after range.end → can't overlap.
        let right_bound = self.bookings.partition_point(|b| b.span.start < range.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > range.start)
    }
}

/// Resource id → sorted timeline. Unassigned bookings are dropped.
#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    timelines: HashMap<Ulid, BookingTimeline>,
}

impl ResourceIndex {
    pub fn from_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let mut timelines: HashMap<Ulid, BookingTimeline> = HashMap::new();
        for booking in bookings {
            if let Some(rid) = booking.resource_id {
                timelines.entry(rid).or_default().insert(booking);
            }
        }
        Self { timelines }
    }

    pub fn timeline(&self, resource_id: &Ulid) -> Option<&BookingTimeline> {
        self.timelines.get(resource_id)
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &Ulid> {
        self.timelines.keys()
    }
}
