//! Upcall surface into the hosting actor system.
//!
//! The engine is pure protocol machinery; everything it learns is reported
//! through this trait before the triggering `handle` call returns. Upcalls
//! observe routing-table mutations in protocol order: `add_direct` happens
//! before `learned_new_node_directly`, which happens before
//! `finalize_handshake`.
//!
//! The callee and the engine are two independent objects linked per call
//! through [`Context`](crate::Context); neither owns the other.

use std::collections::BTreeSet;

use basp_core::{ActorAddr, ActorId, ExitReason, MessageId, NodeId};

/// Receiver of engine upcalls.
pub trait Callee {
    /// A handshake with `peer` completed. `aid` and `signatures` describe
    /// the actor the peer published for the connected port; both are empty
    /// sentinels when nothing was published.
    fn finalize_handshake(&mut self, peer: NodeId, aid: ActorId, signatures: &BTreeSet<String>);

    /// Every route to `node` is gone; drop proxies and any other state
    /// held for it. Fired exactly once per forgotten node.
    fn purge_state(&mut self, node: NodeId);

    /// A user message addressed to a local actor arrived.
    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &mut self,
        source_node: NodeId,
        source_actor: ActorId,
        dest_node: NodeId,
        dest_actor: ActorId,
        mid: MessageId,
        forwarding_stack: &[ActorAddr],
        message: &[u8],
    );

    /// `peer` created a proxy for our actor `aid`.
    fn proxy_announced(&mut self, peer: NodeId, aid: ActorId);

    /// `peer` asks us to tear down our proxy for its actor `aid`.
    fn kill_proxy(&mut self, peer: NodeId, aid: ActorId, reason: ExitReason);

    /// A direct route to `peer` was just added. `was_indirect_before` is
    /// `true` when the node was previously known only through a relay.
    fn learned_new_node_directly(&mut self, peer: NodeId, was_indirect_before: bool);

    /// `peer` became reachable through a relay for the first time.
    fn learned_new_node_indirectly(&mut self, peer: NodeId);

    /// A heartbeat from `peer` arrived.
    fn handle_heartbeat(&mut self, peer: NodeId);
}
