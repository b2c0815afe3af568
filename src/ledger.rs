use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::model::*;

/// Active bookings overlapping `query`, in start order. `exclude` lets
/// update logic ignore the record being modified.
pub fn find_overlapping<'a>(
    book: &'a ResourceBook,
    query: &Span,
    exclude: Option<Ulid>,
) -> Vec<&'a Booking> {
    book.bookings_overlapping(query)
        .filter(|b| b.status.is_active() && Some(b.id) != exclude)
        .collect()
}

/// Listing filter; absent fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub resource: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(rid) = self.resource
            && booking.resource_id != rid {
                return false;
            }
        if let Some(status) = self.status
            && booking.status != status {
                return false;
            }
        true
    }
}

/// Caller-facing pagination request. Zero values mean "default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: DEFAULT_PAGE_LIMIT }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Page floors at 1; limit falls back to the default and is capped.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: if self.limit < 1 { DEFAULT_PAGE_LIMIT } else { self.limit.min(MAX_PAGE_LIMIT) },
        }
    }
}

/// One page of a booking listing plus the filter-wide total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Booking>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl Page {
    pub fn has_next(&self) -> bool {
        (self.page as u64) * (self.limit as u64) < self.total
    }
}

/// Order by start (ties broken by id for a stable walk across pages),
/// count the whole set, then slice the requested page.
pub fn paginate(mut records: Vec<Booking>, req: PageRequest) -> Page {
    let req = req.normalized();
    records.sort_by_key(|b| (b.span.start, b.id));
    let total = records.len() as u64;
    let offset = ((req.page - 1) as usize).saturating_mul(req.limit as usize);
    let items: Vec<Booking> = records
        .into_iter()
        .skip(offset)
        .take(req.limit as usize)
        .collect();
    Page { items, page: req.page, limit: req.limit, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_on(book: &mut ResourceBook, start: Ms, end: Ms, status: BookingStatus) -> Ulid {
        let id = Ulid::new();
        book.insert_booking(Booking {
            id,
            resource_id: book.id,
            requester_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            note: None,
            reference: None,
        });
        id
    }

    fn plain_booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            requester_id: Ulid::new(),
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            note: None,
            reference: None,
        }
    }

    #[test]
    fn find_overlapping_skips_terminal_statuses() {
        let mut book = ResourceBook::new(Ulid::new());
        booking_on(&mut book, 100, 200, BookingStatus::Cancelled);
        booking_on(&mut book, 120, 220, BookingStatus::Completed);
        let live = booking_on(&mut book, 150, 250, BookingStatus::Pending);

        let hits = find_overlapping(&book, &Span::new(100, 300), None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, live);
    }

    #[test]
    fn find_overlapping_excludes_given_id() {
        let mut book = ResourceBook::new(Ulid::new());
        let own = booking_on(&mut book, 100, 200, BookingStatus::Confirmed);
        let other = booking_on(&mut book, 180, 280, BookingStatus::Confirmed);

        let hits = find_overlapping(&book, &Span::new(100, 300), Some(own));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, other);

        // Excluding an unrelated id changes nothing.
        let hits = find_overlapping(&book, &Span::new(100, 300), Some(Ulid::new()));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn find_overlapping_is_start_ordered() {
        let mut book = ResourceBook::new(Ulid::new());
        booking_on(&mut book, 300, 400, BookingStatus::Confirmed);
        booking_on(&mut book, 100, 200, BookingStatus::Confirmed);
        booking_on(&mut book, 150, 350, BookingStatus::Pending);

        let hits = find_overlapping(&book, &Span::new(0, 1000), None);
        let starts: Vec<Ms> = hits.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 150, 300]);
    }

    #[test]
    fn find_overlapping_adjacent_is_free() {
        let mut book = ResourceBook::new(Ulid::new());
        booking_on(&mut book, 100, 200, BookingStatus::Confirmed);
        assert!(find_overlapping(&book, &Span::new(200, 300), None).is_empty());
    }

    #[test]
    fn filter_matches_by_resource_and_status() {
        let b = plain_booking(100, 200);
        assert!(BookingFilter::default().matches(&b));
        assert!(BookingFilter { resource: Some(b.resource_id), status: None }.matches(&b));
        assert!(!BookingFilter { resource: Some(Ulid::new()), status: None }.matches(&b));
        assert!(BookingFilter { resource: None, status: Some(BookingStatus::Confirmed) }.matches(&b));
        assert!(!BookingFilter { resource: None, status: Some(BookingStatus::Pending) }.matches(&b));
    }

    #[test]
    fn page_request_normalization() {
        assert_eq!(PageRequest::new(0, 0).normalized(), PageRequest::new(1, DEFAULT_PAGE_LIMIT));
        assert_eq!(PageRequest::new(3, 50).normalized(), PageRequest::new(3, 50));
        assert_eq!(
            PageRequest::new(1, MAX_PAGE_LIMIT + 1).normalized(),
            PageRequest::new(1, MAX_PAGE_LIMIT)
        );
        assert_eq!(PageRequest::default(), PageRequest::new(1, DEFAULT_PAGE_LIMIT));
    }

    #[test]
    fn paginate_slices_and_counts() {
        let records: Vec<Booking> = (0..25).map(|i| plain_booking(i * 100, i * 100 + 50)).collect();

        let page2 = paginate(records.clone(), PageRequest::new(2, 10));
        assert_eq!(page2.items.len(), 10);
        assert_eq!(page2.total, 25);
        assert_eq!(page2.items[0].span.start, 1000);
        assert!(page2.has_next()); // 2*10 < 25

        let page3 = paginate(records.clone(), PageRequest::new(3, 10));
        assert_eq!(page3.items.len(), 5);
        assert!(!page3.has_next()); // 3*10 >= 25

        let beyond = paginate(records, PageRequest::new(9, 10));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 25);
        assert!(!beyond.has_next());
    }

    #[test]
    fn paginate_orders_by_start_then_id() {
        let mut a = plain_booking(100, 200);
        let mut b = plain_booking(100, 150);
        // Force a deterministic id order for the tie.
        if b.id < a.id {
            std::mem::swap(&mut a.id, &mut b.id);
        }
        let first_id = a.id;
        let page = paginate(vec![b, a], PageRequest::default());
        assert_eq!(page.items[0].id, first_id);
        assert_eq!(page.items[0].span.start, 100);
    }

    #[test]
    fn paginate_exact_boundary_has_no_next() {
        let records: Vec<Booking> = (0..20).map(|i| plain_booking(i * 100, i * 100 + 50)).collect();
        let page2 = paginate(records, PageRequest::new(2, 10));
        assert_eq!(page2.items.len(), 10);
        assert!(!page2.has_next()); // 2*10 == 20
    }

    #[test]
    fn paginate_empty_set() {
        let page = paginate(Vec::new(), PageRequest::default());
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_next());
    }
}
