use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidRange { start: Ms, end: Ms },
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    TerminalBookingImmutable { id: Ulid, status: BookingStatus },
    ResourceInactive(Ulid),
    InvalidInitialStatus(BookingStatus),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Per-resource serialization not acquired in time. Retryable.
    Busy(Ulid),
    LimitExceeded(&'static str),
    Store(String),
}

impl EngineError {
    /// Only a lock timeout is worth retrying; every other error is a final decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }

    /// Short machine-readable tag, used by the wire adapter and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::TerminalBookingImmutable { .. } => "terminal_booking_immutable",
            EngineError::ResourceInactive(_) => "resource_inactive",
            EngineError::InvalidInitialStatus(_) => "invalid_initial_status",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Busy(_) => "busy",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range [{start}, {end}): end must be after start")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::TerminalBookingImmutable { id, status } => {
                write!(f, "booking {id} is {status} and can no longer change")
            }
            EngineError::ResourceInactive(id) => write!(f, "resource inactive: {id}"),
            EngineError::InvalidInitialStatus(status) => {
                write!(f, "bookings cannot be created as {status}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Busy(id) => write!(f, "resource {id} busy, retry"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_retryable() {
        assert!(EngineError::Busy(Ulid::new()).is_retryable());
        assert!(!EngineError::ResourceInactive(Ulid::new()).is_retryable());
        assert!(!EngineError::Store("disk".into()).is_retryable());
        assert!(
            !EngineError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::InProgress,
            }
            .is_retryable()
        );
    }

    #[test]
    fn invalid_transition_names_pair() {
        let e = EngineError::InvalidTransition {
            from: BookingStatus::Pending,
            to: BookingStatus::InProgress,
        };
        assert_eq!(e.to_string(), "invalid transition: pending -> in_progress");
    }
}
