//! Node role classification and resolution from cluster membership.

use parking_lot::Mutex;

/// Cluster-position classification of this node. Determines which graph
/// topology and locus the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeRole {
    Unknown = 0,
    Data = 1,
    Coordinator = 2,
    ElectedCoordinator = 3,
}

impl NodeRole {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeRole::Data,
            2 => NodeRole::Coordinator,
            3 => NodeRole::ElectedCoordinator,
            _ => NodeRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Unknown => "unknown",
            NodeRole::Data => "data",
            NodeRole::Coordinator => "coordinator",
            NodeRole::ElectedCoordinator => "elected_coordinator",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership details for this node, as last published by the cluster.
#[derive(Debug, Clone)]
pub struct NodeDetails {
    pub role: NodeRole,
    pub host_address: String,

    /// Explicit elected-coordinator flag, when the membership source knows it
    pub is_elected_coordinator: Option<bool>,
}

/// Source of cluster membership information.
///
/// Returns `None` while no details have been received yet; the controller
/// then keeps its last-known role.
pub trait RoleSource: Send + Sync {
    fn current_node(&self) -> Option<NodeDetails>;

    /// Host address of the currently elected coordinator, if resolvable.
    fn elected_coordinator_address(&self) -> Option<String>;
}

/// Resolve the effective role: an explicit elected flag wins; otherwise the
/// node is the elected coordinator iff its host address matches the elected
/// coordinator's address.
pub fn resolve_role(details: &NodeDetails, source: &dyn RoleSource) -> NodeRole {
    match details.is_elected_coordinator {
        Some(true) => NodeRole::ElectedCoordinator,
        Some(false) => details.role,
        None => match source.elected_coordinator_address() {
            Some(address) if address.eq_ignore_ascii_case(&details.host_address) => {
                NodeRole::ElectedCoordinator
            }
            _ => details.role,
        },
    }
}

/// Role source whose answers are set programmatically. Backs single-node
/// deployments and tests.
#[derive(Default)]
pub struct StaticRoleSource {
    details: Mutex<Option<NodeDetails>>,
    elected_address: Mutex<Option<String>>,
}

impl StaticRoleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_details(&self, details: Option<NodeDetails>) {
        *self.details.lock() = details;
    }

    pub fn set_elected_coordinator_address(&self, address: Option<String>) {
        *self.elected_address.lock() = address;
    }
}

impl RoleSource for StaticRoleSource {
    fn current_node(&self) -> Option<NodeDetails> {
        self.details.lock().clone()
    }

    fn elected_coordinator_address(&self) -> Option<String> {
        self.elected_address.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_flag_wins() {
        let source = StaticRoleSource::new();
        source.set_elected_coordinator_address(Some("10.0.0.9:9650".to_string()));

        let details = NodeDetails {
            role: NodeRole::Data,
            host_address: "10.0.0.9:9650".to_string(),
            is_elected_coordinator: Some(false),
        };
        // Flag says no, even though the address would match
        assert_eq!(resolve_role(&details, &source), NodeRole::Data);

        let details = NodeDetails { is_elected_coordinator: Some(true), ..details };
        assert_eq!(resolve_role(&details, &source), NodeRole::ElectedCoordinator);
    }

    #[test]
    fn test_address_comparison_fallback() {
        let source = StaticRoleSource::new();
        source.set_elected_coordinator_address(Some("10.0.0.9:9650".to_string()));

        let details = NodeDetails {
            role: NodeRole::Coordinator,
            host_address: "10.0.0.9:9650".to_string(),
            is_elected_coordinator: None,
        };
        assert_eq!(resolve_role(&details, &source), NodeRole::ElectedCoordinator);

        let details = NodeDetails {
            host_address: "10.0.0.7:9650".to_string(),
            ..details
        };
        assert_eq!(resolve_role(&details, &source), NodeRole::Coordinator);
    }

    #[test]
    fn test_unresolvable_coordinator_keeps_given_role() {
        let source = StaticRoleSource::new();
        let details = NodeDetails {
            role: NodeRole::Data,
            host_address: "10.0.0.7:9650".to_string(),
            is_elected_coordinator: None,
        };
        assert_eq!(resolve_role(&details, &source), NodeRole::Data);
    }
}
