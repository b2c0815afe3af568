use ulid::Ulid;

use crate::calendar;
use crate::config::EngineConfig;
use crate::ledger;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Structural checks every caller-supplied range goes through.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::InvalidTimeRange);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Booking-only rules: no past starts, plus the configured policies.
pub(crate) fn validate_booking_span(
    span: &Span,
    now: Ms,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::PastDateBooking);
    }
    if config.max_booking_duration > 0 && span.duration_ms() > config.max_booking_duration {
        return Err(EngineError::ExceedsMaxDuration(config.max_booking_duration));
    }
    if config.min_lead_time > 0 && span.start < now + config.min_lead_time {
        return Err(EngineError::InsufficientLeadTime(config.min_lead_time));
    }
    Ok(())
}

/// Note/reference size checks shared by create and update.
pub(crate) fn validate_metadata(
    note: Option<&str>,
    reference: Option<&str>,
) -> Result<(), EngineError> {
    use crate::limits::*;
    if let Some(n) = note
        && n.len() > MAX_NOTE_LEN {
            return Err(EngineError::LimitExceeded("note too long"));
        }
    if let Some(r) = reference
        && r.len() > MAX_REFERENCE_LEN {
            return Err(EngineError::LimitExceeded("reference too long"));
        }
    Ok(())
}

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdmissionFailure {
    /// The window union leaves part of the range uncovered.
    NotCovered,
    /// An active booking already holds part of the range.
    Overlaps(Ulid),
}

/// The combined coverage + overlap test. Run under the book's write
/// guard so the verdict is still true when the insert lands.
pub(crate) fn admit(
    book: &ResourceBook,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), AdmissionFailure> {
    if !calendar::is_covered(&book.windows, span) {
        tracing::debug!(
            resource = %book.id,
            gaps = ?calendar::uncovered_gaps(&book.windows, span),
            "admission refused: range not covered"
        );
        return Err(AdmissionFailure::NotCovered);
    }
    let blocking = ledger::find_overlapping(book, span, exclude);
    if let Some(first) = blocking.first() {
        tracing::debug!(resource = %book.id, blocking = %first.id, "admission refused: overlap");
        return Err(AdmissionFailure::Overlaps(first.id));
    }
    Ok(())
}
