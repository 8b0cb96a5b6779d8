//! Terminal graph stage that dampens proposed corrective actions.
//!
//! The publisher pulls the newest decision from the upstream collation stage,
//! filters each action through the cool-off and flip-flop detectors, and fans
//! the survivors out to registered listeners. It is the last stage before
//! actions take effect, so it owns the anti-thrash invariants: no identity is
//! re-accepted inside its cool-off period, and no action is accepted while it
//! or its inverse sits in the flip-flop window for the same target.

pub mod actions;
pub mod clock;
pub mod cooloff;
pub mod flipflop;

use crate::error::EvalError;
use crate::scheduler::GraphNode;
use crate::stats::{self, StatsCollector};
use actions::{Action, ActionListener, Collator};
use cooloff::CoolOffDetector;
use flipflop::{FlipFlopDetector, TimedFlipFlopDetector};
use slog::{debug, error, info, Logger};
use std::sync::Arc;
use std::time::Instant;

pub const PUBLISHER_NODE_NAME: &str = "action-dampening-publisher";

pub struct Publisher {
    collator: Arc<dyn Collator>,
    cool_off_detector: CoolOffDetector,
    flip_flop_detector: Box<dyn FlipFlopDetector>,
    // Registration is only legal before the scheduler starts evaluating;
    // the list is iterated without a guard during operate.
    listeners: Vec<Arc<dyn ActionListener>>,
    stats: Arc<StatsCollector>,
    logger: Logger,
}

impl Publisher {
    pub fn new(collator: Arc<dyn Collator>, stats: Arc<StatsCollector>, logger: Logger) -> Self {
        Self::with_detectors(
            collator,
            CoolOffDetector::new(),
            Box::new(TimedFlipFlopDetector::default()),
            stats,
            logger,
        )
    }

    pub fn with_detectors(
        collator: Arc<dyn Collator>,
        cool_off_detector: CoolOffDetector,
        flip_flop_detector: Box<dyn FlipFlopDetector>,
        stats: Arc<StatsCollector>,
        logger: Logger,
    ) -> Self {
        Self {
            collator,
            cool_off_detector,
            flip_flop_detector,
            listeners: Vec::new(),
            stats,
            logger,
        }
    }

    /// Register an action listener.
    ///
    /// The listener is notified whenever an action is published. Must be
    /// called during setup, before the scheduler begins evaluating this node.
    pub fn add_action_listener(&mut self, listener: Arc<dyn ActionListener>) {
        self.listeners.push(listener);
    }

    /// One evaluation cycle: consume the first available decision and publish
    /// every action that passes both dampening checks.
    ///
    /// Accepted actions are recorded into both detectors before listeners are
    /// notified, so a later action in the same decision is evaluated against
    /// the updated state. Returns the number of actions published.
    pub fn operate(&mut self) -> Result<usize, EvalError> {
        let Some(decision) = self.collator.poll_decision()? else {
            return Ok(0);
        };

        let mut published = 0;
        for action in decision.actions() {
            let action = action.as_ref();
            let cooled_off = self.cool_off_detector.is_cooled_off(action);
            let flip_flop = self.flip_flop_detector.is_flip_flop(action);
            if !cooled_off || flip_flop {
                debug!(self.logger, "Action dropped by dampening";
                    "action" => action.summary(),
                    "cooled_off" => cooled_off,
                    "flip_flop" => flip_flop
                );
                continue;
            }

            self.flip_flop_detector.record_action(action);
            self.cool_off_detector.record_action(action);
            for listener in &self.listeners {
                listener.action_published(action).map_err(|e| EvalError::Listener {
                    listener: listener.name().to_string(),
                    reason: e.to_string(),
                })?;
            }
            info!(self.logger, "Action published"; "action" => action.summary());
            published += 1;
        }
        Ok(published)
    }
}

impl GraphNode for Publisher {
    fn name(&self) -> &str {
        PUBLISHER_NODE_NAME
    }

    /// Locally triggered evaluation. Never propagates failure past the vertex
    /// boundary: errors are logged and counted, and the cycle duration is
    /// recorded either way.
    fn evaluate_locally(&mut self) {
        let start = Instant::now();
        if let Err(e) = self.operate() {
            error!(self.logger, "Exception in operate"; "node" => PUBLISHER_NODE_NAME, "error" => %e);
            self.stats.increment(stats::EXCEPTION_IN_OPERATE);
        }
        self.stats
            .record_duration(stats::GRAPH_NODE_OPERATE_DURATION, start.elapsed());
    }

    /// Terminal node: never participates in network-delivered evaluation.
    fn evaluate_from_wire(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::actions::{Action, Decision, GenericAction, QueueCollator};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct CollectingListener {
        name: String,
        published: Mutex<Vec<String>>,
    }

    impl CollectingListener {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                published: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.published.lock().clone()
        }
    }

    impl ActionListener for CollectingListener {
        fn name(&self) -> &str {
            &self.name
        }

        fn action_published(&self, action: &dyn Action) -> Result<(), EvalError> {
            self.published.lock().push(action.summary());
            Ok(())
        }
    }

    struct FailingListener;

    impl ActionListener for FailingListener {
        fn name(&self) -> &str {
            "failing"
        }

        fn action_published(&self, _action: &dyn Action) -> Result<(), EvalError> {
            Err(EvalError::Listener {
                listener: "failing".to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    fn publisher_with(collator: Arc<QueueCollator>, stats: Arc<StatsCollector>) -> Publisher {
        Publisher::new(collator, stats, test_logger())
    }

    #[test]
    fn test_no_decision_publishes_nothing() {
        let collator = Arc::new(QueueCollator::new());
        let mut publisher = publisher_with(collator, Arc::new(StatsCollector::new()));
        assert_eq!(publisher.operate().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_identity_in_one_decision_published_once() {
        let collator = Arc::new(QueueCollator::new());
        let action = GenericAction::new("scale-up", "queue-a", Duration::ZERO);
        collator.push(Decision::new(vec![
            Arc::new(action.clone()),
            Arc::new(action),
        ]));

        let listener = CollectingListener::new("sink");
        let mut publisher = publisher_with(collator, Arc::new(StatsCollector::new()));
        publisher.add_action_listener(listener.clone());

        assert_eq!(publisher.operate().unwrap(), 1);
        assert_eq!(listener.seen(), vec!["scale-up on queue-a".to_string()]);
    }

    #[test]
    fn test_listeners_notified_in_registration_order() {
        let collator = Arc::new(QueueCollator::new());
        collator.push(Decision::new(vec![Arc::new(GenericAction::new(
            "scale-up",
            "queue-a",
            Duration::ZERO,
        ))]));

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        struct OrderListener {
            tag: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }
        impl ActionListener for OrderListener {
            fn name(&self) -> &str {
                self.tag
            }
            fn action_published(&self, _action: &dyn Action) -> Result<(), EvalError> {
                self.order.lock().push(self.tag);
                Ok(())
            }
        }

        let mut publisher = publisher_with(collator, Arc::new(StatsCollector::new()));
        publisher.add_action_listener(Arc::new(OrderListener { tag: "first", order: order.clone() }));
        publisher.add_action_listener(Arc::new(OrderListener { tag: "second", order: order.clone() }));

        publisher.operate().unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_listener_failure_is_counted_not_propagated() {
        let collator = Arc::new(QueueCollator::new());
        collator.push(Decision::new(vec![Arc::new(GenericAction::new(
            "scale-up",
            "queue-a",
            Duration::ZERO,
        ))]));

        let stats = Arc::new(StatsCollector::new());
        let mut publisher = publisher_with(collator, stats.clone());
        publisher.add_action_listener(Arc::new(FailingListener));

        // The scheduler-facing entry point swallows the failure.
        publisher.evaluate_locally();
        assert_eq!(stats.counter(stats::EXCEPTION_IN_OPERATE), 1);
        assert_eq!(stats.duration_record(stats::GRAPH_NODE_OPERATE_DURATION).count, 1);
    }

    #[test]
    fn test_rejected_action_reconsidered_in_later_decision() {
        let collator = Arc::new(QueueCollator::new());
        let action = GenericAction::new("scale-up", "queue-a", Duration::from_millis(10));
        collator.push(Decision::new(vec![
            Arc::new(action.clone()),
            Arc::new(action.clone()),
        ]));

        let stats = Arc::new(StatsCollector::new());
        let mut publisher = Publisher::with_detectors(
            collator.clone(),
            CoolOffDetector::new(),
            // A tiny window so the cool-off expiry is what matters here
            Box::new(flipflop::TimedFlipFlopDetector::new(Duration::from_millis(10))),
            stats,
            test_logger(),
        );
        let listener = CollectingListener::new("sink");
        publisher.add_action_listener(listener.clone());

        assert_eq!(publisher.operate().unwrap(), 1);

        // Same action proposed again after both dampening horizons have passed
        std::thread::sleep(Duration::from_millis(20));
        collator.push(Decision::new(vec![Arc::new(action)]));
        assert_eq!(publisher.operate().unwrap(), 1);
        assert_eq!(listener.seen().len(), 2);
    }
}
