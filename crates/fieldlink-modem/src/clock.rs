//! Timing provider.
//!
//! The modem protocol has no acknowledgements for strobe, boot or serial
//! settle phases, only calibrated delays. Every one of those delays goes
//! through [`Clock`] so tests can model them without waiting.

use std::time::Duration;

pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll `predicate` up to `attempts` times, sleeping `interval` after each
/// miss. Returns the 1-based attempt that succeeded.
pub fn poll_until(
    clock: &dyn Clock,
    attempts: u32,
    interval: Duration,
    mut predicate: impl FnMut(u32) -> bool,
) -> Option<u32> {
    for attempt in 1..=attempts {
        if predicate(attempt) {
            return Some(attempt);
        }
        clock.sleep(interval);
    }
    None
}
