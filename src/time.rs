//! Wall-clock epoch helper shared by the components that stamp Redis
//! entries with an absolute time (WAL, retry scheduler, fallback store,
//! presence, rooms) — distinct from [`crate::clock::Clock`], which is the
//! monotonic abstraction the in-process resilience policies use so their
//! timing can be faked in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_is_monotone_nondecreasing_across_calls() {
        let a = epoch_millis();
        let b = epoch_millis();
        assert!(b >= a);
    }
}
