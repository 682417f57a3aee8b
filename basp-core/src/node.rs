//! Node identity.

use serde::{Deserialize, Serialize};

/// Stable global identifier of a process in the mesh.
///
/// Each process owns exactly one `NodeId`, fixed for its lifetime. The
/// all-zero value is reserved as the invalid sentinel; handshake frames use
/// it to mean "destination not yet known".
///
/// # Examples
///
/// ```
/// use basp_core::NodeId;
///
/// let node = NodeId::new(0xA11CE);
/// assert!(node.is_valid());
/// assert!(!NodeId::INVALID.is_valid());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    /// The invalid sentinel. Never names a real node.
    pub const INVALID: NodeId = NodeId(0);

    /// Create a node identifier from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value, as it appears on the wire.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Check whether this identifier names a real node.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        assert_eq!(NodeId::default(), NodeId::INVALID);
        assert!(!NodeId::default().is_valid());
    }

    #[test]
    fn test_display() {
        let node = NodeId::new(0x123456789ABCDEF0);
        assert_eq!(node.to_string(), "123456789abcdef0");
    }

    #[test]
    fn test_serde_roundtrip() {
        let node = NodeId::new(0xFEDCBA9876543210);
        let json = serde_json::to_string(&node).expect("serialize");
        let decoded: NodeId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, decoded);
    }
}
