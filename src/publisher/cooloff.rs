//! Cool-off dampening: minimum elapsed time between two acceptances of the
//! same action identity.

use crate::publisher::actions::{Action, ActionKey};
use crate::publisher::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub struct CoolOffDetector {
    last_accepted: HashMap<ActionKey, Instant>,
    clock: Arc<dyn Clock>,
}

impl CoolOffDetector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            last_accepted: HashMap::new(),
            clock,
        }
    }

    /// True if the action may be accepted: either this identity was never
    /// accepted before, or strictly more than its cool-off period has elapsed
    /// since the last acceptance.
    ///
    /// The comparison is strict so that a duplicate identity in the same
    /// decision is rejected even with a zero cool-off.
    pub fn is_cooled_off(&self, action: &dyn Action) -> bool {
        match self.last_accepted.get(&action.key()) {
            Some(last) => self.clock.now().duration_since(*last) > action.cool_off_period(),
            None => true,
        }
    }

    /// Record an acceptance of this action's identity.
    pub fn record_action(&mut self, action: &dyn Action) {
        self.last_accepted.insert(action.key(), self.clock.now());
    }
}

impl Default for CoolOffDetector {
    fn default() -> Self {
        Self::new()
    }
}
