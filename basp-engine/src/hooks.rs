//! Optional observability events.
//!
//! Hooks carry no protocol obligations; every method defaults to a no-op
//! and `()` implements the trait for embedders that want none. Unlike
//! [`Callee`](crate::Callee) upcalls, nothing in the engine depends on what
//! a hook does.

use std::collections::BTreeSet;

use basp_core::{ActorAddr, MessageId, NodeId};

use crate::wire::Header;

/// Sink for observability events.
pub trait Hooks {
    /// A frame for another node was re-emitted on its route.
    fn message_forwarded(&mut self, hdr: &Header, payload: Option<&[u8]>) {
        let _ = (hdr, payload);
    }

    /// A frame for another node could not be routed.
    fn message_forwarding_failed(&mut self, hdr: &Header, payload: Option<&[u8]>) {
        let _ = (hdr, payload);
    }

    /// A locally dispatched message left through `next_hop`.
    fn message_sent(
        &mut self,
        sender: Option<ActorAddr>,
        next_hop: NodeId,
        receiver: ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        let _ = (sender, next_hop, receiver, mid, message);
    }

    /// A locally dispatched message had no route to its receiver.
    fn message_sending_failed(
        &mut self,
        sender: Option<ActorAddr>,
        receiver: ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        let _ = (sender, receiver, mid, message);
    }

    /// An actor was published on a local port.
    fn actor_published(&mut self, addr: ActorAddr, signatures: &BTreeSet<String>, port: u16) {
        let _ = (addr, signatures, port);
    }
}

/// No-op hooks.
impl Hooks for () {}
