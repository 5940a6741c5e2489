use crate::model::*;

use super::EngineError;

use BookingStatus::*;

/// Statuses reachable from `from` in one step. Terminal statuses have none.
pub fn allowed_targets(from: BookingStatus) -> &'static [BookingStatus] {
    match from {
        Pending => &[Confirmed, Cancelled, NoShow],
        // confirmed -> completed covers quick services that never start formally
        Confirmed => &[InProgress, Cancelled, NoShow, Completed],
        InProgress => &[Completed, Cancelled, NoShow],
        Completed | Cancelled | NoShow => &[],
    }
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Statuses a booking may be created in.
pub fn is_valid_initial(status: BookingStatus) -> bool {
    matches!(status, Pending | Confirmed)
}

/// Apply a status change. Pure: the caller persists the returned booking.
pub fn transition(booking: &Booking, to: BookingStatus) -> Result<Booking, EngineError> {
    let from = booking.status;
    if from.is_terminal() {
        return Err(EngineError::TerminalBookingImmutable {
            id: booking.id,
            status: from,
        });
    }
    if !can_transition(from, to) {
        return Err(EngineError::InvalidTransition { from, to });
    }
    let mut next = booking.clone();
    next.status = to;
    Ok(next)
}
