//! Actor identity and addressing.

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Identifier of an actor within its owning node.
///
/// Actor ids are only meaningful relative to a node; see [`ActorAddr`] for
/// the globally unique form. Zero is the invalid sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ActorId(u32);

impl ActorId {
    /// The invalid sentinel. Never names a real actor.
    pub const INVALID: ActorId = ActorId(0);

    /// Create an actor identifier from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value, as it appears on the wire.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Check whether this identifier names a real actor.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique actor address: an [`ActorId`] bound to its [`NodeId`].
///
/// # Examples
///
/// ```
/// use basp_core::{ActorAddr, ActorId, NodeId};
///
/// let addr = ActorAddr::new(NodeId::new(7), ActorId::new(42));
/// assert!(addr.is_valid());
/// assert_eq!(addr.to_string(), "0000000000000007/42");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ActorAddr {
    /// The node hosting the actor.
    pub node: NodeId,
    /// The actor's id within that node.
    pub id: ActorId,
}

impl ActorAddr {
    /// Create an actor address.
    pub const fn new(node: NodeId, id: ActorId) -> Self {
        Self { node, id }
    }

    /// Check whether both components name real entities.
    pub const fn is_valid(&self) -> bool {
        self.node.is_valid() && self.id.is_valid()
    }
}

impl std::fmt::Display for ActorAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinels() {
        assert!(!ActorId::INVALID.is_valid());
        assert!(!ActorAddr::default().is_valid());
        // a valid actor on the invalid node is still not addressable
        assert!(!ActorAddr::new(NodeId::INVALID, ActorId::new(1)).is_valid());
    }

    #[test]
    fn test_serde_roundtrip() {
        let addr = ActorAddr::new(NodeId::new(99), ActorId::new(1234));
        let json = serde_json::to_string(&addr).expect("serialize");
        let decoded: ActorAddr = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(addr, decoded);
    }
}
