use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the engine's only time type.
pub type Ms = i64;

/// One day in `Ms`.
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `other`, if any.
    pub fn clamp_to(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end { Some(Span { start, end }) } else { None }
    }
}

/// Booking lifecycle. Closed set; transitions go through `can_transition_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Active bookings hold their time range against other admissions.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// The legal moves: pending → confirmed → completed, and any active
    /// status → cancelled. Staying put is not a transition; callers treat
    /// same-status changes as no-ops.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (*self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Parse error for a status string outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown booking status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// How often a recurring window repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    pub fn period_ms(&self) -> Ms {
        match self {
            Cadence::Daily => DAY_MS,
            Cadence::Weekly => 7 * DAY_MS,
        }
    }
}

/// Repetition rule for an availability window. Occurrence k of a window
/// `[s, e)` with period p is `[s + k*p, e + k*p)` for k >= 0; repetition
/// stops once an occurrence would start after `until` (inclusive bound
/// on occurrence starts, unbounded when absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub cadence: Cadence,
    pub until: Option<Ms>,
}

/// An availability window on a resource. Presence of a recurrence is the
/// "recurring" flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub recurrence: Option<Recurrence>,
}

impl Window {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// A reservation on a resource. Never physically deleted; it leaves the
/// active set by moving to cancelled or completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub note: Option<String>,
    pub reference: Option<String>,
}

impl Booking {
    /// Whether this booking keeps `query` from being admitted.
    pub fn blocks(&self, query: &Span) -> bool {
        self.status.is_active() && self.span.overlaps(query)
    }
}

/// Per-resource materialized state: availability windows and bookings,
/// each kept sorted by `span.start`. The engine guards a book with one
/// lock so coverage, overlap, and insert observe a single snapshot.
#[derive(Debug, Clone)]
pub struct ResourceBook {
    pub id: Ulid,
    pub windows: Vec<Window>,
    pub bookings: Vec<Booking>,
}

impl ResourceBook {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            windows: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a window maintaining sort order by span.start.
    pub fn insert_window(&mut self, window: Window) {
        let pos = self
            .windows
            .binary_search_by_key(&window.span.start, |w| w.span.start)
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    /// Remove a window by id.
    pub fn remove_window(&mut self, id: Ulid) -> Option<Window> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn window(&self, id: Ulid) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Move a booking to a new span, keeping the set sorted.
    pub fn reschedule_booking(&mut self, id: Ulid, span: Span) -> bool {
        let Some(pos) = self.bookings.iter().position(|b| b.id == id) else {
            return false;
        };
        let mut booking = self.bookings.remove(pos);
        booking.span = span;
        self.insert_booking(booking);
        true
    }

    /// Bookings whose span overlaps the query window, in start order.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn bookings_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types, one flat enum. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowAdded {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        recurrence: Option<Recurrence>,
    },
    WindowUpdated {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        recurrence: Option<Recurrence>,
    },
    WindowRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        span: Span,
        status: BookingStatus,
        note: Option<String>,
        reference: Option<String>,
    },
    /// Field-level amendment. Absent fields are unchanged; an empty
    /// string clears a text field.
    BookingAmended {
        id: Ulid,
        resource_id: Ulid,
        span: Option<Span>,
        status: Option<BookingStatus>,
        note: Option<String>,
        reference: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    /// Every event belongs to exactly one resource book.
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::WindowAdded { resource_id, .. }
            | Event::WindowUpdated { resource_id, .. }
            | Event::WindowRemoved { resource_id, .. }
            | Event::BookingCreated { resource_id, .. }
            | Event::BookingAmended { resource_id, .. }
            | Event::BookingCancelled { resource_id, .. } => *resource_id,
        }
    }
}
