//! Action model shared by the decision stages and the publisher.

use crate::error::EvalError;
use std::sync::Arc;
use std::time::Duration;

/// A proposed corrective action. Immutable once proposed.
///
/// Identity is the (name, resource) pair: the same kind of action against the
/// same target is the same action for dampening purposes.
pub trait Action: Send + Sync {
    /// Action kind, e.g. "modify-queue-capacity"
    fn name(&self) -> &str;

    /// Target resource key, e.g. "search-queue@node-1"
    fn resource(&self) -> &str;

    /// Minimum time required between two acceptances of this identity
    fn cool_off_period(&self) -> Duration;

    /// Names of actions that logically reverse this one on the same resource
    fn inverse_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human-readable description for logs and listeners
    fn summary(&self) -> String;

    fn key(&self) -> ActionKey {
        ActionKey {
            name: self.name().to_string(),
            resource: self.resource().to_string(),
        }
    }
}

/// Identity key of an action: kind plus target resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub name: String,
    pub resource: String,
}

/// An ordered batch of proposed actions from one collation cycle.
#[derive(Clone, Default)]
pub struct Decision {
    actions: Vec<Arc<dyn Action>>,
}

impl Decision {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Upstream decision-collation stage.
///
/// The publisher consumes at most the first decision available per cycle.
pub trait Collator: Send + Sync {
    fn poll_decision(&self) -> Result<Option<Decision>, EvalError>;
}

/// Receives actions that survived dampening. Notified synchronously, in
/// registration order.
pub trait ActionListener: Send + Sync {
    fn name(&self) -> &str;

    fn action_published(&self, action: &dyn Action) -> Result<(), EvalError>;
}

/// In-memory collation stage: decisions are pushed by an upstream producer
/// and consumed one per publisher cycle, oldest first.
#[derive(Default)]
pub struct QueueCollator {
    decisions: parking_lot::Mutex<std::collections::VecDeque<Decision>>,
}

impl QueueCollator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, decision: Decision) {
        self.decisions.lock().push_back(decision);
    }
}

impl Collator for QueueCollator {
    fn poll_decision(&self) -> Result<Option<Decision>, EvalError> {
        Ok(self.decisions.lock().pop_front())
    }
}

/// Plain action value used by graph builders and tests.
#[derive(Debug, Clone)]
pub struct GenericAction {
    pub name: String,
    pub resource: String,
    pub cool_off_period: Duration,
    pub inverse_names: Vec<String>,
}

impl GenericAction {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, cool_off: Duration) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            cool_off_period: cool_off,
            inverse_names: Vec::new(),
        }
    }

    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse_names.push(inverse.into());
        self
    }
}

impl Action for GenericAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    fn cool_off_period(&self) -> Duration {
        self.cool_off_period
    }

    fn inverse_names(&self) -> Vec<String> {
        self.inverse_names.clone()
    }

    fn summary(&self) -> String {
        format!("{} on {}", self.name, self.resource)
    }
}
