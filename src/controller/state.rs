//! Shared runtime state between the controller loop and its readers.

use crate::controller::role::NodeRole;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Enablement flag and current role, written only by the controller loop.
///
/// Readers on other tasks (query handlers, tests, the binary's status
/// surface) observe values through acquire loads and never write.
#[derive(Default)]
pub struct RcaRuntimeState {
    rca_enabled: AtomicBool,
    current_role: AtomicU8,
}

impl RcaRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rca_enabled(&self) -> bool {
        self.rca_enabled.load(Ordering::Acquire)
    }

    pub fn set_rca_enabled(&self, enabled: bool) {
        self.rca_enabled.store(enabled, Ordering::Release);
    }

    pub fn current_role(&self) -> NodeRole {
        NodeRole::from_u8(self.current_role.load(Ordering::Acquire))
    }

    pub fn set_current_role(&self, role: NodeRole) {
        self.current_role.store(role as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_disabled_and_unknown() {
        let state = RcaRuntimeState::new();
        assert!(!state.rca_enabled());
        assert_eq!(state.current_role(), NodeRole::Unknown);
    }

    #[test]
    fn test_role_roundtrips_through_atomic() {
        let state = RcaRuntimeState::new();
        for role in [
            NodeRole::Data,
            NodeRole::Coordinator,
            NodeRole::ElectedCoordinator,
            NodeRole::Unknown,
        ] {
            state.set_current_role(role);
            assert_eq!(state.current_role(), role);
        }
    }
}
