//! Monotonic time source for the copy engine.
//!
//! Backed by `tokio::time::Instant` rather than `std::time::Instant`: the
//! scheduler is a single-threaded Tokio runtime and every sleep in the
//! event loop is a `tokio::time::sleep_until` keyed off one of these, so
//! using Tokio's own monotonic clock lets tests pause and fast-forward
//! virtual time with `tokio::time::advance` instead of sleeping in real
//! wall-clock time.
//!
//! A failure of the underlying OS clock call has no recovery path;
//! `Instant::now()` cannot fail on supported platforms, so that's encoded
//! as an invariant rather than a `Result`.

use std::time::Duration;

pub type Timestamp = tokio::time::Instant;

/// The current monotonic time.
pub fn now() -> Timestamp {
    tokio::time::Instant::now()
}

/// `now() + ms` milliseconds.
pub fn now_plus(ms: u64) -> Timestamp {
    now() + Duration::from_millis(ms)
}

/// `a - b` in whole milliseconds. Negative when `a` precedes `b`.
pub fn diff_ms(a: Timestamp, b: Timestamp) -> i64 {
    if a >= b {
        a.duration_since(b).as_millis() as i64
    } else {
        -(b.duration_since(a).as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_plus_orders_after_now() {
        let base = now();
        let later = now_plus(10);
        assert!(later >= base);
    }

    #[test]
    fn diff_ms_is_symmetric_in_sign() {
        let a = now();
        let b = now_plus(50);
        assert!(diff_ms(b, a) >= 50);
        assert!(diff_ms(a, b) <= -50);
    }
}
