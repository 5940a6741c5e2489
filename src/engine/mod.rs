mod capacity;
mod error;
mod lifecycle;
mod overlap;
mod reschedule;
mod service;

pub use capacity::{
    capacity_at, capacity_over_window, compute_saturated_spans, count_occupying, merge_overlapping,
    saturated_spans, CapacitySnapshot, Severity,
};
pub use error::EngineError;
pub use lifecycle::{allowed_targets, can_transition, is_valid_initial, transition};
pub use overlap::{find_overlapping, find_overlapping_in, BookingTimeline, CandidateSource, ResourceIndex};
pub use reschedule::{
    validate_new_booking, validate_reschedule, BookingAccepted, CapacityWarning, RescheduleAccepted,
};
pub use service::{ResourceGuard, ResourceLock, SchedulingService};
