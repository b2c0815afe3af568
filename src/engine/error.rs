use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

/// How a calling layer should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller-correctable input problem; never retried.
    Validation,
    /// The referenced record does not exist.
    NotFound,
    /// Real contention over the resource's time; retrying unchanged will
    /// fail again.
    Conflict,
    /// Momentary store contention; safe to retry as a fresh call.
    Transient,
    /// Durable store failure; propagated unmodified.
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidTimeRange,
    PastDateBooking,
    /// An illegal status move. `from` is absent when a caller requested a
    /// terminal status at creation.
    InvalidBookingStatus {
        from: Option<BookingStatus>,
        to: BookingStatus,
    },
    InvalidPatch(&'static str),
    /// Carries the configured ceiling in ms.
    ExceedsMaxDuration(Ms),
    /// Carries the configured minimum lead in ms.
    InsufficientLeadTime(Ms),
    LimitExceeded(&'static str),
    ResourceNotFound(Ulid),
    BookingNotFound(Ulid),
    WindowNotFound(Ulid),
    ResourceNotAvailable,
    /// Update-path admission failure naming the blocking booking.
    BookingOverlap(Ulid),
    /// Write-lock wait timed out for this resource's book.
    StoreContended(Ulid),
    Storage(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidTimeRange
            | EngineError::PastDateBooking
            | EngineError::InvalidBookingStatus { .. }
            | EngineError::InvalidPatch(_)
            | EngineError::ExceedsMaxDuration(_)
            | EngineError::InsufficientLeadTime(_)
            | EngineError::LimitExceeded(_) => ErrorClass::Validation,
            EngineError::ResourceNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::WindowNotFound(_) => ErrorClass::NotFound,
            EngineError::ResourceNotAvailable | EngineError::BookingOverlap(_) => {
                ErrorClass::Conflict
            }
            EngineError::StoreContended(_) => ErrorClass::Transient,
            EngineError::Storage(_) => ErrorClass::Storage,
        }
    }

    /// Stable machine-readable code for transport mappings.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidTimeRange => "INVALID_TIME_RANGE",
            EngineError::PastDateBooking => "PAST_DATE_BOOKING",
            EngineError::InvalidBookingStatus { .. } => "INVALID_BOOKING_STATUS",
            EngineError::InvalidPatch(_) => "INVALID_PATCH",
            EngineError::ExceedsMaxDuration(_) => "EXCEEDS_MAX_DURATION",
            EngineError::InsufficientLeadTime(_) => "INSUFFICIENT_LEAD_TIME",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            EngineError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            EngineError::WindowNotFound(_) => "AVAILABILITY_NOT_FOUND",
            EngineError::ResourceNotAvailable => "RESOURCE_NOT_AVAILABLE",
            EngineError::BookingOverlap(_) => "BOOKING_OVERLAP",
            EngineError::StoreContended(_) => "STORE_CONTENDED",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::StoreContended(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeRange => {
                write!(f, "invalid time range: end must be after start")
            }
            EngineError::PastDateBooking => write!(f, "booking cannot start in the past"),
            EngineError::InvalidBookingStatus { from: Some(from), to } => {
                write!(f, "invalid booking status transition: {from} -> {to}")
            }
            EngineError::InvalidBookingStatus { from: None, to } => {
                write!(f, "invalid initial booking status: {to}")
            }
            EngineError::InvalidPatch(msg) => write!(f, "invalid patch: {msg}"),
            EngineError::ExceedsMaxDuration(limit) => {
                write!(f, "booking exceeds maximum duration of {limit} ms")
            }
            EngineError::InsufficientLeadTime(required) => {
                write!(f, "booking requires at least {required} ms lead time")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::WindowNotFound(id) => {
                write!(f, "availability window not found: {id}")
            }
            EngineError::ResourceNotAvailable => {
                write!(f, "resource not available for the requested time range")
            }
            EngineError::BookingOverlap(id) => write!(f, "overlaps existing booking: {id}"),
            EngineError::StoreContended(id) => write!(f, "resource book contended: {id}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
