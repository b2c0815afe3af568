use ulid::Ulid;

use crate::ledger::{self, BookingFilter, Page, PageRequest};
use crate::model::*;

use super::admission;
use super::{Engine, EngineError};

impl Engine {
    /// Pure predicate: would this span be admitted right now? True iff the
    /// calendar covers it and no active booking overlaps. Holds no
    /// reservation; the answer can go stale the moment it's returned.
    pub async fn check_availability(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<bool, EngineError> {
        let span = admission::validate_range(start, end)?;
        if span.start < admission::now_ms() {
            return Err(EngineError::PastDateBooking);
        }
        self.require_resource(resource_id).await?;

        let Some(book) = self.book(&resource_id) else {
            return Ok(false); // no windows yet, nothing is covered
        };
        let guard = book.read().await;
        Ok(admission::admit(&guard, &span, None).is_ok())
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let resource_id = self
            .resource_of_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let book = self.book(&resource_id).ok_or(EngineError::BookingNotFound(id))?;
        let guard = book.read().await;
        guard.booking(id).cloned().ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn get_window(&self, id: Ulid) -> Result<Window, EngineError> {
        let resource_id = self
            .resource_of_window(&id)
            .ok_or(EngineError::WindowNotFound(id))?;
        let book = self.book(&resource_id).ok_or(EngineError::WindowNotFound(id))?;
        let guard = book.read().await;
        guard.window(id).cloned().ok_or(EngineError::WindowNotFound(id))
    }

    /// All windows of a resource, in start order.
    pub async fn list_windows(&self, resource_id: Ulid) -> Result<Vec<Window>, EngineError> {
        self.require_resource(resource_id).await?;
        let Some(book) = self.book(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = book.read().await;
        Ok(guard.windows.clone())
    }

    /// Active bookings overlapping the range, in start order. `exclude`
    /// drops one booking from consideration (reschedule checks).
    pub async fn find_overlapping(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, EngineError> {
        let span = admission::validate_range(start, end)?;
        self.require_resource(resource_id).await?;
        let Some(book) = self.book(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = book.read().await;
        Ok(ledger::find_overlapping(&guard, &span, exclude)
            .into_iter()
            .cloned()
            .collect())
    }

    /// One page of bookings matching the filter, ordered by start time.
    /// An unknown resource filter yields an empty page, not an error.
    pub async fn list_bookings(
        &self,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<Page, EngineError> {
        let matching = if let Some(rid) = filter.resource {
            match self.book(&rid) {
                Some(book) => {
                    let guard = book.read().await;
                    guard.bookings.iter().filter(|b| filter.matches(b)).cloned().collect()
                }
                None => Vec::new(),
            }
        } else {
            self.collect_bookings(|b| filter.matches(b)).await
        };
        Ok(ledger::paginate(matching, page))
    }

    /// One page of a requester's bookings across every resource.
    pub async fn list_bookings_by_requester(
        &self,
        requester_id: Ulid,
        page: PageRequest,
    ) -> Result<Page, EngineError> {
        let matching = self.collect_bookings(|b| b.requester_id == requester_id).await;
        Ok(ledger::paginate(matching, page))
    }

    async fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for book in self.books() {
            let guard = book.read().await;
            out.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        out
    }
}
