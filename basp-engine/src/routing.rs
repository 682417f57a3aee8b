//! Node routing table.
//!
//! Maps node identifiers to the connection they are reachable on — either
//! *directly* (the node is the peer of one of our byte streams) or
//! *indirectly* (some direct peer relays for it).
//!
//! Invariants upheld here:
//!
//! - the local node never appears in either mapping,
//! - direct entries form a bijection: a node is bound to at most one
//!   handle and a handle to at most one node,
//! - a node never has a direct and an indirect entry at the same time
//!   (the engine evicts the indirect entry when it learns a direct route),
//! - every hop in an indirect entry has a direct route of its own; erasing
//!   a direct route drops its node from every hop set and forgets targets
//!   whose hop set drains empty.
//!
//! Forgetting a node is reported through a caller-supplied `FnMut(NodeId)`
//! capability so the engine can fire `purge_state` upcalls exactly once per
//! orphaned node.

use std::collections::{BTreeSet, HashMap, hash_map::Entry};

use basp_core::{ConnectionHandle, NodeId};

/// One resolved path to a destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Physical connection the bytes leave on.
    pub hdl: ConnectionHandle,
    /// Direct peer on that connection. Equals the destination for direct
    /// routes; names the relay for indirect ones.
    pub next_hop: NodeId,
}

/// Direct and indirect routes of one engine instance.
#[derive(Debug)]
pub struct RoutingTable {
    this_node: NodeId,
    direct_by_hdl: HashMap<ConnectionHandle, NodeId>,
    direct_by_node: HashMap<NodeId, ConnectionHandle>,
    /// target -> ordered set of relays that can reach it.
    indirect: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl RoutingTable {
    /// Create an empty table. `this_node` is recorded solely to refuse
    /// self-routes.
    pub fn new(this_node: NodeId) -> Self {
        Self {
            this_node,
            direct_by_hdl: HashMap::new(),
            direct_by_node: HashMap::new(),
            indirect: HashMap::new(),
        }
    }

    /// Bind `node` as the direct peer of `hdl`.
    ///
    /// Returns `false` without mutating if either side is already bound,
    /// if either value is the invalid sentinel, or if `node` is the local
    /// node.
    pub fn add_direct(&mut self, hdl: ConnectionHandle, node: NodeId) -> bool {
        if node == self.this_node || !node.is_valid() || !hdl.is_valid() {
            return false;
        }
        if self.direct_by_hdl.contains_key(&hdl) || self.direct_by_node.contains_key(&node) {
            return false;
        }
        self.direct_by_hdl.insert(hdl, node);
        self.direct_by_node.insert(node, hdl);
        true
    }

    /// Record that `node` is reachable by relaying through `hop`.
    ///
    /// Inserts only if `node` has no direct route and `hop` has one.
    /// Returns `true` if `node` was previously unknown, so the caller can
    /// raise `learned_new_node_indirectly` exactly once.
    pub fn add_indirect(&mut self, hop: NodeId, node: NodeId) -> bool {
        if node == self.this_node || hop == self.this_node || !node.is_valid() {
            return false;
        }
        if self.direct_by_node.contains_key(&node) || !self.direct_by_node.contains_key(&hop) {
            return false;
        }
        match self.indirect.entry(node) {
            Entry::Occupied(mut known) => {
                known.get_mut().insert(hop);
                false
            }
            Entry::Vacant(unknown) => {
                unknown.insert(BTreeSet::from([hop]));
                true
            }
        }
    }

    /// Remove the direct row for `hdl`, reporting every node thereby
    /// rendered unreachable through `on_forgotten` exactly once.
    ///
    /// The direct peer itself is always forgotten (it cannot also hold an
    /// indirect entry); indirect targets whose hop set drains empty are
    /// forgotten with it.
    pub fn erase_direct(&mut self, hdl: ConnectionHandle, mut on_forgotten: impl FnMut(NodeId)) {
        let Some(node) = self.direct_by_hdl.remove(&hdl) else {
            return;
        };
        self.direct_by_node.remove(&node);
        on_forgotten(node);
        self.drop_hop(node, &mut on_forgotten);
    }

    /// Remove every route naming `node` (direct and indirect), reporting
    /// forgotten nodes through `on_forgotten`.
    ///
    /// An unknown node fires no callbacks.
    pub fn erase(&mut self, node: NodeId, mut on_forgotten: impl FnMut(NodeId)) {
        let had_direct = match self.direct_by_node.remove(&node) {
            Some(hdl) => {
                self.direct_by_hdl.remove(&hdl);
                true
            }
            None => false,
        };
        let had_indirect = self.indirect.remove(&node).is_some();
        if !had_direct && !had_indirect {
            return;
        }
        on_forgotten(node);
        if had_direct {
            self.drop_hop(node, &mut on_forgotten);
        }
    }

    /// Remove the indirect row for `node` if one exists; returns whether
    /// it did.
    pub fn erase_indirect(&mut self, node: NodeId) -> bool {
        self.indirect.remove(&node).is_some()
    }

    /// Resolve a route to `node`: the direct route if one exists, else the
    /// first (lowest) indirect hop that still has a direct route.
    pub fn lookup(&self, node: NodeId) -> Option<Route> {
        if let Some(&hdl) = self.direct_by_node.get(&node) {
            return Some(Route {
                hdl,
                next_hop: node,
            });
        }
        let hops = self.indirect.get(&node)?;
        hops.iter().find_map(|&hop| {
            self.direct_by_node.get(&hop).map(|&hdl| Route {
                hdl,
                next_hop: hop,
            })
        })
    }

    /// Direct handle bound to `node`, if any.
    pub fn direct_handle(&self, node: NodeId) -> Option<ConnectionHandle> {
        self.direct_by_node.get(&node).copied()
    }

    /// Direct peer bound to `hdl`, if any.
    pub fn direct_peer(&self, hdl: ConnectionHandle) -> Option<NodeId> {
        self.direct_by_hdl.get(&hdl).copied()
    }

    /// Iterate all direct rows (used for the heartbeat broadcast).
    pub fn direct_routes(&self) -> impl Iterator<Item = (ConnectionHandle, NodeId)> + '_ {
        self.direct_by_hdl.iter().map(|(&hdl, &node)| (hdl, node))
    }

    /// Number of direct rows.
    pub fn direct_count(&self) -> usize {
        self.direct_by_hdl.len()
    }

    /// Number of indirect rows.
    pub fn indirect_count(&self) -> usize {
        self.indirect.len()
    }

    /// Drop `hop` from every hop set; forget targets left without hops.
    fn drop_hop(&mut self, hop: NodeId, on_forgotten: &mut impl FnMut(NodeId)) {
        self.indirect.retain(|&target, hops| {
            hops.remove(&hop);
            if hops.is_empty() {
                on_forgotten(target);
                false
            } else {
                true
            }
        });
    }
}
