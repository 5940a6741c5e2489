use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::CapacitySnapshot;
use super::lifecycle::is_valid_initial;
use super::overlap::CandidateSource;
use super::EngineError;

/// Accepted move or creation that would push the resource past its limit.
/// Never blocking: the operator decides whether to overbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityWarning {
    pub resource_id: Ulid,
    pub snapshot: CapacitySnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleAccepted {
    pub booking_id: Ulid,
    pub span: Span,
    pub resource_id: Option<Ulid>,
    /// Occupancy at the target over `span`, excluding the moved booking.
    pub snapshot: Option<CapacitySnapshot>,
    pub warning: Option<CapacityWarning>,
    /// Same start, same resource: nothing to persist.
    pub no_op: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingAccepted {
    pub booking: Booking,
    pub snapshot: Option<CapacitySnapshot>,
    pub warning: Option<CapacityWarning>,
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    validate_span(&booking.span)?;
    if booking.customer_ref.len() > MAX_REF_LEN || booking.service_ref.len() > MAX_REF_LEN {
        return Err(EngineError::LimitExceeded("reference too long"));
    }
    if let Some(ref z) = booking.zone
        && z.len() > MAX_ZONE_LEN
    {
        return Err(EngineError::LimitExceeded("zone name too long"));
    }
    Ok(())
}

/// Occupancy at `target` over `span`, not counting `exclude`, plus a warning
/// when one more booking would exceed the limit.
fn evaluate_target<S>(
    target: &Resource,
    others: &S,
    span: &Span,
    exclude: Ulid,
) -> (CapacitySnapshot, Option<CapacityWarning>)
where
    S: CandidateSource + ?Sized,
{
    let used = others
        .candidates(*span)
        .filter(|b| b.id != exclude && b.occupies(target.id, span))
        .count();
    let used = u32::try_from(used).unwrap_or(u32::MAX);
    let snapshot = CapacitySnapshot::from_counts(*span, used, target.max_concurrent_bookings);
    let warning = snapshot.would_overflow().then(|| CapacityWarning {
        resource_id: target.id,
        snapshot: snapshot.clone(),
    });
    (snapshot, warning)
}

/// Decide whether `booking` may move to `proposed_start` on `target`.
///
/// `target` is the resolved destination: the proposed resource, or the
/// booking's current one when only the time changes (`None` keeps an
/// unassigned booking unassigned). `at_target` must hold the target's
/// bookings; the moved booking is skipped if present. Duration is preserved.
pub fn validate_reschedule<S>(
    booking: &Booking,
    proposed_start: Ms,
    target: Option<&Resource>,
    at_target: &S,
) -> Result<RescheduleAccepted, EngineError>
where
    S: CandidateSource + ?Sized,
{
    let target_id = target.map(|r| r.id);
    if proposed_start == booking.span.start && target_id == booking.resource_id {
        return Ok(RescheduleAccepted {
            booking_id: booking.id,
            span: booking.span,
            resource_id: booking.resource_id,
            snapshot: None,
            warning: None,
            no_op: true,
        });
    }

    if booking.status.is_terminal() {
        return Err(EngineError::TerminalBookingImmutable {
            id: booking.id,
            status: booking.status,
        });
    }

    let end = proposed_start
        .checked_add(booking.span.duration_ms())
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    let span = Span::try_new(proposed_start, end)?;
    validate_span(&span)?;

    let (snapshot, warning) = match target {
        Some(resource) => {
            if !resource.is_active {
                return Err(EngineError::ResourceInactive(resource.id));
            }
            let (snapshot, warning) = evaluate_target(resource, at_target, &span, booking.id);
            (Some(snapshot), warning)
        }
        None => (None, None),
    };

    Ok(RescheduleAccepted {
        booking_id: booking.id,
        span,
        resource_id: target_id,
        snapshot,
        warning,
        no_op: false,
    })
}

/// Admission check for a new booking. `resource` must be the booking's
/// assigned resource, or `None` for an unassigned booking.
pub fn validate_new_booking<S>(
    booking: &Booking,
    resource: Option<&Resource>,
    existing: &S,
) -> Result<BookingAccepted, EngineError>
where
    S: CandidateSource + ?Sized,
{
    validate_booking(booking)?;
    if !is_valid_initial(booking.status) {
        return Err(EngineError::InvalidInitialStatus(booking.status));
    }

    let (snapshot, warning) = match (booking.resource_id, resource) {
        (None, _) => (None, None),
        (Some(rid), Some(r)) if r.id == rid => {
            if !r.is_active {
                return Err(EngineError::ResourceInactive(rid));
            }
            let (snapshot, warning) = evaluate_target(r, existing, &booking.span, booking.id);
            (Some(snapshot), warning)
        }
        (Some(rid), _) => return Err(EngineError::NotFound(rid)),
    };

    Ok(BookingAccepted {
        booking: booking.clone(),
        snapshot,
        warning,
    })
}
