use std::time::Duration;

use crate::model::Ms;

/// Engine tunables. Every field has a usable default; `from_env` reads
/// overrides from `RESERVA_*` variables (durations as integer
/// milliseconds) and ignores values that fail to parse.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a mutation waits for a resource's write lock before the
    /// attempt counts as contended.
    pub lock_wait: Duration,
    /// How many times a contended mutation is retried.
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
    /// Longest allowed booking in ms; 0 disables the policy.
    pub max_booking_duration: Ms,
    /// Bookings must start at least this many ms from now; 0 disables.
    pub min_lead_time: Ms,
    /// Capacity of the WAL writer queue.
    pub wal_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(2000),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(20),
            max_booking_duration: 0,
            min_lead_time: 0,
            wal_buffer: 4096,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let lock_wait_ms: u64 = std::env::var("RESERVA_LOCK_WAIT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.lock_wait.as_millis() as u64);
        let retry_attempts: u32 = std::env::var("RESERVA_RETRY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.retry_attempts);
        let retry_backoff_ms: u64 = std::env::var("RESERVA_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.retry_backoff.as_millis() as u64);
        let max_booking_duration: Ms = std::env::var("RESERVA_MAX_BOOKING_DURATION_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.max_booking_duration);
        let min_lead_time: Ms = std::env::var("RESERVA_MIN_LEAD_TIME_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.min_lead_time);
        let wal_buffer: usize = std::env::var("RESERVA_WAL_BUFFER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.wal_buffer);

        Self {
            lock_wait: Duration::from_millis(lock_wait_ms),
            retry_attempts,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            max_booking_duration,
            min_lead_time,
            wal_buffer,
        }
    }
}
