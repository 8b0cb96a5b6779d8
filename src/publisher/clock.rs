//! Time source for the dampening detectors.
//!
//! Detectors take an injected clock so the cool-off and flip-flop window
//! boundaries can be driven deterministically in tests.

use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
