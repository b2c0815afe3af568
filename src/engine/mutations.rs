use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::{MAX_BOOKINGS_PER_RESOURCE, MAX_WINDOWS_PER_RESOURCE};
use crate::model::*;
use crate::observability::{ADMISSION_RETRIES_TOTAL, ADMISSIONS_TOTAL};

use super::admission::{self, AdmissionFailure};
use super::{Engine, EngineError, WalCommand};

/// Caller-supplied fields for a new booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    /// Initial status; `None` means confirmed. Only pending or confirmed
    /// are accepted; a booking cannot begin life terminal.
    pub status: Option<BookingStatus>,
    pub note: Option<String>,
    pub reference: Option<String>,
}

/// Field-level changes for [`Engine::update_booking`]. Absent fields are
/// left alone; an empty string clears a text field. A patch may move the
/// time range or change the status, never both at once.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<BookingStatus>,
    pub note: Option<String>,
    pub reference: Option<String>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.end.is_none()
            && self.status.is_none()
            && self.note.is_none()
            && self.reference.is_none()
    }

    fn moves_range(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

fn normalize_text(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Would writing `patched` over a field currently holding `current`
/// change it? Empty string means clear.
fn text_differs(current: &Option<String>, patched: &str) -> bool {
    match (current, patched.is_empty()) {
        (None, true) => false,
        (Some(_), true) => true,
        (cur, false) => cur.as_deref() != Some(patched),
    }
}

impl Engine {
    /// Admit and insert a booking as one atomic unit under the book's
    /// write guard. Transient contention is retried with backoff; an
    /// exhausted budget reports the slot as unavailable.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let span = admission::validate_range(req.start, req.end)?;
        admission::validate_booking_span(&span, admission::now_ms(), &self.config)?;
        admission::validate_metadata(req.note.as_deref(), req.reference.as_deref())?;
        let status = match req.status.unwrap_or(BookingStatus::Confirmed) {
            s @ (BookingStatus::Pending | BookingStatus::Confirmed) => s,
            terminal => {
                return Err(EngineError::InvalidBookingStatus { from: None, to: terminal });
            }
        };
        self.require_resource(req.resource_id).await?;

        let mut attempt = 0;
        loop {
            match self.try_create(&req, span, status).await {
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.retry_attempts {
                        tracing::warn!(
                            resource = %req.resource_id,
                            attempts = attempt + 1,
                            "create retries exhausted, reporting unavailable"
                        );
                        metrics::counter!(ADMISSIONS_TOTAL, "op" => "create", "outcome" => "contended")
                            .increment(1);
                        return Err(EngineError::ResourceNotAvailable);
                    }
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_create(
        &self,
        req: &NewBooking,
        span: Span,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let book = self.book_or_create(req.resource_id);
        let mut guard = self.write_book(&book, req.resource_id).await?;

        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        if admission::admit(&guard, &span, None).is_err() {
            // Create reports both failure causes as plain unavailability;
            // only the reschedule path distinguishes them.
            metrics::counter!(ADMISSIONS_TOTAL, "op" => "create", "outcome" => "rejected")
                .increment(1);
            return Err(EngineError::ResourceNotAvailable);
        }

        let booking = Booking {
            id: Ulid::new(),
            resource_id: req.resource_id,
            requester_id: req.requester_id,
            span,
            status,
            note: normalize_text(req.note.clone()),
            reference: normalize_text(req.reference.clone()),
        };
        let event = Event::BookingCreated {
            id: booking.id,
            resource_id: booking.resource_id,
            requester_id: booking.requester_id,
            span: booking.span,
            status: booking.status,
            note: booking.note.clone(),
            reference: booking.reference.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(ADMISSIONS_TOTAL, "op" => "create", "outcome" => "admitted").increment(1);

        tracing::debug!(booking = %booking.id, resource = %booking.resource_id, "booking created");
        Ok(booking)
    }

    /// Apply a field patch to a booking. A range move re-runs the full
    /// admission excluding the booking itself; a status move must be a
    /// legal transition; metadata-only patches skip admission entirely.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        if patch.moves_range() && patch.status.is_some() {
            return Err(EngineError::InvalidPatch(
                "cannot change time range and status together",
            ));
        }
        admission::validate_metadata(patch.note.as_deref(), patch.reference.as_deref())?;

        let mut attempt = 0;
        loop {
            match self.try_update(id, &patch).await {
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.retry_attempts {
                        tracing::warn!(booking = %id, attempts = attempt + 1, "update retries exhausted");
                        // A contended range move reads as the slot being taken;
                        // other patches surface the contention itself.
                        return Err(if patch.moves_range() {
                            EngineError::ResourceNotAvailable
                        } else {
                            e
                        });
                    }
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_update(&self, id: Ulid, patch: &BookingPatch) -> Result<Booking, EngineError> {
        let (_, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();

        let target_span = match (patch.start, patch.end) {
            (None, None) => current.span,
            (s, e) => admission::validate_range(
                s.unwrap_or(current.span.start),
                e.unwrap_or(current.span.end),
            )?,
        };
        let range_changed = target_span != current.span;

        let mut status_change = None;
        if let Some(next) = patch.status
            && next != current.status
        {
            if !current.status.can_transition_to(next) {
                return Err(EngineError::InvalidBookingStatus {
                    from: Some(current.status),
                    to: next,
                });
            }
            status_change = Some(next);
        }

        if range_changed {
            admission::validate_booking_span(&target_span, admission::now_ms(), &self.config)?;
            match admission::admit(&guard, &target_span, Some(id)) {
                Err(AdmissionFailure::NotCovered) => {
                    metrics::counter!(ADMISSIONS_TOTAL, "op" => "reschedule", "outcome" => "rejected")
                        .increment(1);
                    return Err(EngineError::ResourceNotAvailable);
                }
                Err(AdmissionFailure::Overlaps(other)) => {
                    metrics::counter!(ADMISSIONS_TOTAL, "op" => "reschedule", "outcome" => "rejected")
                        .increment(1);
                    return Err(EngineError::BookingOverlap(other));
                }
                Ok(()) => {}
            }
        }

        let note_change = patch.note.clone().filter(|n| text_differs(&current.note, n));
        let reference_change = patch
            .reference
            .clone()
            .filter(|r| text_differs(&current.reference, r));

        if !range_changed && status_change.is_none() && note_change.is_none() && reference_change.is_none()
        {
            return Ok(current); // nothing changes, nothing persists
        }

        let event = Event::BookingAmended {
            id,
            resource_id: current.resource_id,
            span: range_changed.then_some(target_span),
            status: status_change,
            note: note_change,
            reference: reference_change,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if range_changed {
            metrics::counter!(ADMISSIONS_TOTAL, "op" => "reschedule", "outcome" => "admitted")
                .increment(1);
        }

        guard.booking(id).cloned().ok_or(EngineError::BookingNotFound(id))
    }

    /// Cancel a booking. Already-cancelled is an idempotent no-op;
    /// completed bookings cannot be cancelled. The record survives for
    /// history; cancellation only frees the slot.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let mut attempt = 0;
        loop {
            match self.try_cancel(id).await {
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .clone();

        match current.status {
            BookingStatus::Cancelled => Ok(current),
            BookingStatus::Completed => Err(EngineError::InvalidBookingStatus {
                from: Some(BookingStatus::Completed),
                to: BookingStatus::Cancelled,
            }),
            _ => {
                let event = Event::BookingCancelled { id, resource_id };
                self.persist_and_apply(&mut guard, &event).await?;
                tracing::debug!(booking = %id, resource = %resource_id, "booking cancelled");
                guard.booking(id).cloned().ok_or(EngineError::BookingNotFound(id))
            }
        }
    }

    /// Open availability on a resource. Windows may sit in the past;
    /// the past-date rule applies to bookings, not to the calendar.
    pub async fn add_window(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        recurrence: Option<Recurrence>,
    ) -> Result<Window, EngineError> {
        let span = admission::validate_range(start, end)?;
        self.require_resource(resource_id).await?;

        let mut attempt = 0;
        loop {
            match self.try_add_window(resource_id, span, recurrence).await {
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_add_window(
        &self,
        resource_id: Ulid,
        span: Span,
        recurrence: Option<Recurrence>,
    ) -> Result<Window, EngineError> {
        let book = self.book_or_create(resource_id);
        let mut guard = self.write_book(&book, resource_id).await?;

        if guard.windows.len() >= MAX_WINDOWS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many windows on resource"));
        }
        let window = Window { id: Ulid::new(), resource_id, span, recurrence };
        let event = Event::WindowAdded { id: window.id, resource_id, span, recurrence };
        self.persist_and_apply(&mut guard, &event).await?;

        tracing::debug!(window = %window.id, resource = %resource_id, "window added");
        Ok(window)
    }

    /// Replace a window's span and recurrence. Existing bookings are not
    /// re-admitted; coverage is checked at admission time only.
    pub async fn update_window(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
        recurrence: Option<Recurrence>,
    ) -> Result<Window, EngineError> {
        let span = admission::validate_range(start, end)?;

        let mut attempt = 0;
        loop {
            match self.try_update_window(id, span, recurrence).await {
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_update_window(
        &self,
        id: Ulid,
        span: Span,
        recurrence: Option<Recurrence>,
    ) -> Result<Window, EngineError> {
        let (resource_id, mut guard) = self.resolve_window_write(&id).await?;
        guard.window(id).ok_or(EngineError::WindowNotFound(id))?;

        let event = Event::WindowUpdated { id, resource_id, span, recurrence };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Window { id, resource_id, span, recurrence })
    }

    /// Withdraw availability. Existing bookings stay untouched; future
    /// admissions simply stop seeing this window.
    pub async fn remove_window(&self, id: Ulid) -> Result<(), EngineError> {
        let mut attempt = 0;
        loop {
            match self.try_remove_window(id).await {
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    self.backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn try_remove_window(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_window_write(&id).await?;
        guard.window(id).ok_or(EngineError::WindowNotFound(id))?;

        let event = Event::WindowRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(window = %id, resource = %resource_id, "window removed");
        Ok(())
    }

    /// Rewrite the WAL as the minimal event sequence reproducing current
    /// state: every window, then every booking with its current fields.
    /// Mutations committing between the snapshot and the swap are not
    /// carried into the rewritten log; run this at a quiet moment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for book in self.books() {
            let guard = book.read().await;
            for w in &guard.windows {
                events.push(Event::WindowAdded {
                    id: w.id,
                    resource_id: w.resource_id,
                    span: w.span,
                    recurrence: w.recurrence,
                });
            }
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    resource_id: b.resource_id,
                    requester_id: b.requester_id,
                    span: b.span,
                    status: b.status,
                    note: b.note.clone(),
                    reference: b.reference.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("wal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("wal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Appends since the last compaction, for operator-driven scheduling.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
