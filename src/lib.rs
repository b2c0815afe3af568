//! Reservation engine with calendar-based availability, overlap-checked
//! booking admission, and a write-ahead log for durability.
//!
//! State lives in memory, one book per resource behind its own lock.
//! Every mutation is appended to the WAL before it is applied, so a
//! restart replays the log and lands in the exact pre-crash state.

pub mod calendar;
pub mod config;
pub mod directory;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use config::EngineConfig;
pub use directory::{InMemoryDirectory, ResourceDirectory, ResourceMeta};
pub use engine::{BookingPatch, Engine, EngineError, ErrorClass, NewBooking};
pub use ledger::{BookingFilter, Page, PageRequest};
pub use model::{Booking, BookingStatus, Cadence, Ms, Recurrence, Span, Window};
