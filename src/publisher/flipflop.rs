//! Flip-flop dampening: an action and its logical inverse must not be
//! accepted in quick succession on the same target.

use crate::publisher::actions::Action;
use crate::publisher::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Oscillation policy over the stream of accepted actions.
///
/// Alternative policies (count-based, impact-vector-based) can be substituted
/// without changing the publisher.
pub trait FlipFlopDetector: Send {
    /// True if accepting this action would constitute an oscillation.
    fn is_flip_flop(&mut self, action: &dyn Action) -> bool;

    /// Record an accepted action so it counts toward future decisions.
    fn record_action(&mut self, action: &dyn Action);
}

struct AcceptedRecord {
    at: Instant,
    name: String,
    inverse_names: Vec<String>,
}

/// Time-windowed flip-flop policy.
///
/// Keeps, per resource, the actions accepted within a sliding window. An
/// incoming action is a flip-flop if any windowed entry for its resource
/// carries the same name or a name related to it by a declared inverse, in
/// either direction. Entries older than the window (measured from the current
/// action's timestamp) are pruned.
pub struct TimedFlipFlopDetector {
    window: Duration,
    history: HashMap<String, Vec<AcceptedRecord>>,
    clock: Arc<dyn Clock>,
}

impl TimedFlipFlopDetector {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            history: HashMap::new(),
            clock,
        }
    }

    fn prune(&mut self, resource: &str, now: Instant) {
        if let Some(records) = self.history.get_mut(resource) {
            let window = self.window;
            records.retain(|r| now.duration_since(r.at) <= window);
            if records.is_empty() {
                self.history.remove(resource);
            }
        }
    }

    fn conflicts(record: &AcceptedRecord, action: &dyn Action) -> bool {
        let action_inverses = action.inverse_names();
        record.name == action.name()
            || action_inverses.iter().any(|n| *n == record.name)
            || record.inverse_names.iter().any(|n| n == action.name())
    }
}

impl Default for TimedFlipFlopDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

impl FlipFlopDetector for TimedFlipFlopDetector {
    fn is_flip_flop(&mut self, action: &dyn Action) -> bool {
        let now = self.clock.now();
        self.prune(action.resource(), now);
        self.history
            .get(action.resource())
            .map(|records| records.iter().any(|r| Self::conflicts(r, action)))
            .unwrap_or(false)
    }

    fn record_action(&mut self, action: &dyn Action) {
        self.history
            .entry(action.resource().to_string())
            .or_default()
            .push(AcceptedRecord {
                at: self.clock.now(),
                name: action.name().to_string(),
                inverse_names: action.inverse_names(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::actions::GenericAction;
    use crate::publisher::clock::test_clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(3600);

    fn scale_up() -> GenericAction {
        GenericAction::new("scale-up", "queue-a", Duration::ZERO).with_inverse("scale-down")
    }

    fn scale_down() -> GenericAction {
        GenericAction::new("scale-down", "queue-a", Duration::ZERO).with_inverse("scale-up")
    }

    #[test]
    fn test_inverse_within_window_is_flip_flop() {
        let clock = Arc::new(ManualClock::new());
        let mut detector = TimedFlipFlopDetector::with_clock(WINDOW, clock.clone());

        detector.record_action(&scale_up());
        clock.advance(Duration::from_secs(600));
        assert!(detector.is_flip_flop(&scale_down()));
    }

    #[test]
    fn test_inverse_after_window_is_accepted() {
        let clock = Arc::new(ManualClock::new());
        let mut detector = TimedFlipFlopDetector::with_clock(WINDOW, clock.clone());

        detector.record_action(&scale_up());
        clock.advance(WINDOW + Duration::from_secs(1));
        assert!(!detector.is_flip_flop(&scale_down()));
    }

    #[test]
    fn test_inverse_declared_only_on_recorded_side_still_conflicts() {
        let clock = Arc::new(ManualClock::new());
        let mut detector = TimedFlipFlopDetector::with_clock(WINDOW, clock.clone());

        // Recorded action declares its inverse; the proposal declares none.
        detector.record_action(&scale_up());
        let bare_down = GenericAction::new("scale-down", "queue-a", Duration::ZERO);
        assert!(detector.is_flip_flop(&bare_down));
    }

    #[test]
    fn test_same_identity_within_window_is_flip_flop() {
        let clock = Arc::new(ManualClock::new());
        let mut detector = TimedFlipFlopDetector::with_clock(WINDOW, clock);

        detector.record_action(&scale_up());
        assert!(detector.is_flip_flop(&scale_up()));
    }

    #[test]
    fn test_other_resource_is_unaffected() {
        let clock = Arc::new(ManualClock::new());
        let mut detector = TimedFlipFlopDetector::with_clock(WINDOW, clock);

        detector.record_action(&scale_up());
        let other =
            GenericAction::new("scale-down", "queue-b", Duration::ZERO).with_inverse("scale-up");
        assert!(!detector.is_flip_flop(&other));
    }
}
