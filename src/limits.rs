use crate::model::{DAY_MS, Ms};

/// Earliest acceptable instant for any span bound.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest acceptable instant (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest span a window, booking, or availability query may cover.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

/// Caps the per-resource window set.
pub const MAX_WINDOWS_PER_RESOURCE: usize = 4096;

/// Caps the per-resource booking set, terminal records included.
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 65_536;

/// Longest free-text note, in bytes.
pub const MAX_NOTE_LEN: usize = 4096;

/// Longest external reference string, in bytes.
pub const MAX_REFERENCE_LEN: usize = 100;

/// Hard ceiling on a listing page size.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Page size when the caller does not specify one.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
