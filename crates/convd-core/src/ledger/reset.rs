//! UTC day boundaries for the lazy daily reset.

pub(crate) const SECS_PER_DAY: i64 = 86_400;

/// First UTC midnight strictly after `now` (Unix seconds).
pub(crate) fn next_utc_midnight(now: i64) -> i64 {
    (now.div_euclid(SECS_PER_DAY) + 1) * SECS_PER_DAY
}

/// Whether an account whose stored boundary is `reset_at` must be refilled at `now`.
pub(crate) fn is_due(reset_at: i64, now: i64) -> bool {
    reset_at <= now
}
