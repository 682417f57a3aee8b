//! The protocol engine.
//!
//! An [`Instance`] multiplexes many logical node-to-node relationships over
//! the byte streams a [`Transport`] provides. It owns the routing table and
//! the published-actor registry, parses inbound deliveries through a
//! two-phase state machine (header, then optional payload), and composes
//! outbound frames into per-connection write buffers.
//!
//! The engine is single-threaded and never suspends: every operation runs
//! to completion and returns to the embedder, which serializes all calls
//! for a given instance. Upcalls into the [`Callee`] fire before the
//! triggering call returns.
//!
//! # The `kill_proxy_instance` overloading
//!
//! The `kill_proxy_instance` operation carries two distinct meanings on the
//! wire, disambiguated only by its payload:
//!
//! - no payload: a proxy teardown, `operation_data` = exit reason,
//! - payload = original header + original payload: a dispatch error
//!   reflected back to the source, `operation_data` = error code.
//!
//! Receivers here invoke [`Callee::kill_proxy`] either way and leave the
//! payload to the callee; peers depend on this exact shape.

use std::collections::BTreeSet;

use basp_core::{
    ActorAddr, ActorId, ConnectionHandle, ErrorCode, ExitReason, MessageId, NodeId,
};

use crate::callee::Callee;
use crate::hooks::Hooks;
use crate::published::PublishedActors;
use crate::routing::{Route, RoutingTable};
use crate::transport::Transport;
use crate::wire::{self, HEADER_SIZE, Header, Operation, PROTOCOL_VERSION};

/// What the transport should do with the connection after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Deliver the next fixed-size header when it is complete.
    AwaitHeader,
    /// Deliver exactly `payload_len` payload bytes next.
    AwaitPayload,
    /// Tear down the stream; the engine has already purged its routes.
    CloseConnection,
}

/// External collaborators of one engine call, owned by the embedder.
pub struct Context<'a> {
    /// Per-connection write buffers and flush mechanics.
    pub transport: &'a mut dyn Transport,
    /// Upcall surface into the hosting actor system.
    pub callee: &'a mut dyn Callee,
    /// Observability event sink.
    pub hooks: &'a mut dyn Hooks,
}

/// One BASP protocol engine.
///
/// # Examples
///
/// ```
/// use basp_engine::{ConnectionHandle, Instance, MemoryTransport, NodeId, Transport};
///
/// let instance = Instance::new(NodeId::new(1));
/// let mut transport = MemoryTransport::new();
/// let hdl = ConnectionHandle::new(7);
///
/// instance.write_heartbeat(transport.wr_buf(hdl), NodeId::new(2));
/// transport.flush(hdl);
/// assert_eq!(transport.flushed(hdl).len(), basp_engine::HEADER_SIZE);
/// ```
pub struct Instance {
    this_node: NodeId,
    tbl: RoutingTable,
    published_actors: PublishedActors,
}

impl Instance {
    /// Create an engine for the node identified by `this_node`.
    ///
    /// # Panics
    ///
    /// Panics if `this_node` is the invalid sentinel.
    pub fn new(this_node: NodeId) -> Self {
        assert!(this_node.is_valid(), "instance requires a valid local node id");
        Self {
            this_node,
            tbl: RoutingTable::new(this_node),
            published_actors: PublishedActors::new(),
        }
    }

    /// The local node's identifier.
    pub fn this_node(&self) -> NodeId {
        self.this_node
    }

    /// Read access to the routing table.
    pub fn tbl(&self) -> &RoutingTable {
        &self.tbl
    }

    /// Resolve a route to `node`.
    pub fn lookup(&self, node: NodeId) -> Option<Route> {
        self.tbl.lookup(node)
    }

    /// Push the queued bytes on a route's physical connection.
    pub fn flush(&self, ctx: &mut Context<'_>, route: &Route) {
        ctx.transport.flush(route.hdl);
    }

    /// Process one delivery from the transport.
    ///
    /// `buf` holds either a complete header (`is_payload == false`) or the
    /// payload announced by the previously parsed header in `hdr`
    /// (`is_payload == true`). The embedder keeps `hdr` alive between the
    /// two phases of one frame.
    pub fn handle(
        &mut self,
        ctx: &mut Context<'_>,
        hdl: ConnectionHandle,
        buf: &[u8],
        hdr: &mut Header,
        is_payload: bool,
    ) -> ConnectionState {
        let payload: Option<&[u8]> = if is_payload {
            if buf.len() != hdr.payload_len as usize {
                tracing::warn!(handle = %hdl, "received invalid payload");
                return self.purge_and_close(ctx, hdl);
            }
            Some(buf)
        } else {
            *hdr = match Header::deserialize(buf) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(handle = %hdl, %err, "received unreadable header");
                    return self.purge_and_close(ctx, hdl);
                }
            };
            tracing::debug!(header = ?hdr, "received header");
            if !hdr.valid() {
                tracing::warn!(operation = ?hdr.operation, "received invalid header");
                return self.purge_and_close(ctx, hdl);
            }
            if hdr.payload_len > 0 {
                return ConnectionState::AwaitPayload;
            }
            None
        };
        // needs forwarding?
        if !hdr.is_handshake() && !hdr.is_heartbeat() && hdr.dest_node != self.this_node {
            self.forward(ctx, hdr, payload);
            return ConnectionState::AwaitHeader;
        }
        // handle message to ourselves
        match hdr.operation {
            Operation::ServerHandshake => self.handle_server_handshake(ctx, hdl, hdr, payload),
            Operation::ClientHandshake => self.handle_client_handshake(ctx, hdl, hdr),
            Operation::DispatchMessage => self.handle_dispatch(ctx, hdl, hdr, payload),
            Operation::AnnounceProxyInstance => {
                ctx.callee.proxy_announced(hdr.source_node, hdr.dest_actor);
                ConnectionState::AwaitHeader
            }
            Operation::KillProxyInstance => {
                ctx.callee.kill_proxy(
                    hdr.source_node,
                    hdr.source_actor,
                    ExitReason::from_operation_data(hdr.operation_data),
                );
                ConnectionState::AwaitHeader
            }
            Operation::Heartbeat => {
                tracing::trace!(peer = %hdr.source_node, "received heartbeat");
                ctx.callee.handle_heartbeat(hdr.source_node);
                ConnectionState::AwaitHeader
            }
        }
    }

    /// Append a heartbeat to every direct peer and flush.
    ///
    /// Driven by an embedder-controlled timer; the engine keeps no timers
    /// of its own.
    pub fn handle_heartbeat_broadcast(&mut self, ctx: &mut Context<'_>) {
        for (hdl, node) in self.tbl.direct_routes() {
            tracing::trace!(handle = %hdl, peer = %node, "sending heartbeat");
            self.write_heartbeat(ctx.transport.wr_buf(hdl), node);
            ctx.transport.flush(hdl);
        }
    }

    /// The transport detected that `affected_node` is gone: erase every
    /// route through it and fire `purge_state` for each orphaned peer.
    pub fn handle_node_shutdown(&mut self, ctx: &mut Context<'_>, affected_node: NodeId) {
        if !affected_node.is_valid() {
            return;
        }
        tracing::info!(node = %affected_node, "lost direct connection");
        let callee = &mut *ctx.callee;
        self.tbl.erase(affected_node, |nid| callee.purge_state(nid));
    }

    /// The transport closed the stream behind `hdl`: purge its direct
    /// route and everything reachable only through it.
    pub fn connection_closed(&mut self, ctx: &mut Context<'_>, hdl: ConnectionHandle) {
        let callee = &mut *ctx.callee;
        self.tbl.erase_direct(hdl, |nid| callee.purge_state(nid));
    }

    /// Send a user message to a remote actor.
    ///
    /// Returns `false` (after raising `message_sending_failed`) when no
    /// route to the receiver exists; raises `message_sent` with the chosen
    /// next hop otherwise. An absent `sender` stamps the local node as the
    /// frame's source.
    pub fn dispatch(
        &mut self,
        ctx: &mut Context<'_>,
        sender: Option<ActorAddr>,
        forwarding_stack: &[ActorAddr],
        receiver: ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) -> bool {
        debug_assert!(receiver.node != self.this_node);
        let Some(path) = self.tbl.lookup(receiver.node) else {
            ctx.hooks.message_sending_failed(sender, receiver, mid, message);
            return false;
        };
        let mut hdr = Header {
            source_node: sender.map_or(self.this_node, |s| s.node),
            dest_node: receiver.node,
            source_actor: sender.map_or(ActorId::INVALID, |s| s.id),
            dest_actor: receiver.id,
            payload_len: 0,
            operation: Operation::DispatchMessage,
            operation_data: mid.raw(),
        };
        let mut writer =
            |out: &mut Vec<u8>| wire::write_dispatch_payload(out, forwarding_stack, message);
        write_frame(ctx.transport.wr_buf(path.hdl), &mut hdr, Some(&mut writer));
        ctx.transport.flush(path.hdl);
        ctx.hooks
            .message_sent(sender, path.next_hop, receiver, mid, message);
        true
    }

    // ── Outbound writers ─────────────────────────────────────────────────────

    /// Write a frame through `route` and flush it.
    pub fn write_routed(
        &self,
        ctx: &mut Context<'_>,
        route: &Route,
        hdr: &mut Header,
        payload_writer: Option<&mut dyn FnMut(&mut Vec<u8>)>,
    ) {
        debug_assert!(hdr.payload_len == 0 || payload_writer.is_some());
        write_frame(ctx.transport.wr_buf(route.hdl), hdr, payload_writer);
        ctx.transport.flush(route.hdl);
    }

    /// Append a server handshake advertising whatever is published on
    /// `port` (payload omitted when nothing is).
    pub fn write_server_handshake(&self, buf: &mut Vec<u8>, port: Option<u16>) {
        let published = port.and_then(|p| self.published_actors.get(p));
        let mut hdr = Header {
            source_node: self.this_node,
            dest_node: NodeId::INVALID,
            source_actor: published.map_or(ActorId::INVALID, |p| p.addr.id),
            dest_actor: ActorId::INVALID,
            payload_len: 0,
            operation: Operation::ServerHandshake,
            operation_data: u64::from(PROTOCOL_VERSION),
        };
        match published {
            Some(entry) => {
                let mut writer = |out: &mut Vec<u8>| {
                    wire::write_handshake_payload(out, entry.addr.id, &entry.signatures);
                };
                write_frame(buf, &mut hdr, Some(&mut writer));
            }
            None => write_frame(buf, &mut hdr, None),
        }
    }

    /// Append a client handshake answering `remote_side`'s server
    /// handshake.
    pub fn write_client_handshake(&self, buf: &mut Vec<u8>, remote_side: NodeId) {
        let mut hdr = Header {
            source_node: self.this_node,
            dest_node: remote_side,
            source_actor: ActorId::INVALID,
            dest_actor: ActorId::INVALID,
            payload_len: 0,
            operation: Operation::ClientHandshake,
            operation_data: 0,
        };
        write_frame(buf, &mut hdr, None);
    }

    /// Append a dispatch-error frame reflecting `original_hdr` (and its
    /// payload, if any) back towards `dest_node`.
    pub fn write_dispatch_error(
        &self,
        buf: &mut Vec<u8>,
        source_node: NodeId,
        dest_node: NodeId,
        code: ErrorCode,
        original_hdr: &Header,
        original_payload: Option<&[u8]>,
    ) {
        let mut hdr = Header {
            source_node,
            dest_node,
            source_actor: ActorId::INVALID,
            dest_actor: ActorId::INVALID,
            payload_len: 0,
            operation: Operation::KillProxyInstance,
            operation_data: u64::from(code),
        };
        let mut writer = |out: &mut Vec<u8>| {
            original_hdr.append_to(out);
            if let Some(payload) = original_payload {
                out.extend_from_slice(payload);
            }
        };
        write_frame(buf, &mut hdr, Some(&mut writer));
    }

    /// Append a proxy-teardown frame for our actor `aid` towards
    /// `dest_node`.
    pub fn write_kill_proxy_instance(
        &self,
        buf: &mut Vec<u8>,
        dest_node: NodeId,
        aid: ActorId,
        reason: ExitReason,
    ) {
        let mut hdr = Header {
            source_node: self.this_node,
            dest_node,
            source_actor: aid,
            dest_actor: ActorId::INVALID,
            payload_len: 0,
            operation: Operation::KillProxyInstance,
            operation_data: reason.to_operation_data(),
        };
        write_frame(buf, &mut hdr, None);
    }

    /// Append a heartbeat towards `remote_side`.
    pub fn write_heartbeat(&self, buf: &mut Vec<u8>, remote_side: NodeId) {
        let mut hdr = Header {
            source_node: self.this_node,
            dest_node: remote_side,
            source_actor: ActorId::INVALID,
            dest_actor: ActorId::INVALID,
            payload_len: 0,
            operation: Operation::Heartbeat,
            operation_data: 0,
        };
        write_frame(buf, &mut hdr, None);
    }

    // ── Published actors ─────────────────────────────────────────────────────

    /// Publish `addr` on `port` (last writer wins) and raise the
    /// `actor_published` hook.
    pub fn add_published_actor(
        &mut self,
        ctx: &mut Context<'_>,
        port: u16,
        addr: ActorAddr,
        signatures: BTreeSet<String>,
    ) {
        let entry = self.published_actors.insert(port, addr, signatures);
        ctx.hooks.actor_published(entry.addr, &entry.signatures, port);
    }

    /// Remove whatever is published on `port`; returns the number of
    /// entries removed.
    pub fn remove_published_port(
        &mut self,
        port: u16,
        on_removed: Option<&mut dyn FnMut(ActorAddr, u16)>,
    ) -> usize {
        self.published_actors.remove_port(port, on_removed)
    }

    /// Remove publications of `whom`: all ports when `port == 0`, else the
    /// matching entry at `port`. Returns the number of entries removed.
    pub fn remove_published_actor(
        &mut self,
        whom: ActorAddr,
        port: u16,
        on_removed: Option<&mut dyn FnMut(ActorAddr, u16)>,
    ) -> usize {
        self.published_actors.remove_actor(whom, port, on_removed)
    }

    // ── Receive paths ────────────────────────────────────────────────────────

    /// Purge every route through `hdl` and tell the transport to tear the
    /// stream down.
    fn purge_and_close(&mut self, ctx: &mut Context<'_>, hdl: ConnectionHandle) -> ConnectionState {
        self.connection_closed(ctx, hdl);
        ConnectionState::CloseConnection
    }

    /// Re-emit a frame addressed to another node, or reflect an error back
    /// towards its source when no route exists.
    fn forward(&mut self, ctx: &mut Context<'_>, hdr: &Header, payload: Option<&[u8]>) {
        if let Some(path) = self.tbl.lookup(hdr.dest_node) {
            let buf = ctx.transport.wr_buf(path.hdl);
            hdr.append_to(buf);
            if let Some(payload) = payload {
                buf.extend_from_slice(payload);
            }
            ctx.transport.flush(path.hdl);
            ctx.hooks.message_forwarded(hdr, payload);
        } else {
            tracing::info!(dest = %hdr.dest_node, "cannot forward message, no route to destination");
            if hdr.source_node != self.this_node {
                match self.tbl.lookup(hdr.source_node) {
                    None => {
                        tracing::warn!(source = %hdr.source_node, "cannot send error message, no route to source");
                    }
                    Some(reverse_path) => {
                        // bytes ride along on the connection's next flush
                        let buf = ctx.transport.wr_buf(reverse_path.hdl);
                        self.write_dispatch_error(
                            buf,
                            self.this_node,
                            hdr.source_node,
                            ErrorCode::NoRouteToDestination,
                            hdr,
                            payload,
                        );
                    }
                }
            } else {
                tracing::warn!("lost packet with probably spoofed source");
            }
            ctx.hooks.message_forwarding_failed(hdr, payload);
        }
    }

    fn handle_server_handshake(
        &mut self,
        ctx: &mut Context<'_>,
        hdl: ConnectionHandle,
        hdr: &Header,
        payload: Option<&[u8]>,
    ) -> ConnectionState {
        let mut aid = ActorId::INVALID;
        let mut signatures = BTreeSet::new();
        if let Some(payload) = payload {
            match wire::read_handshake_payload(payload) {
                Ok((decoded_aid, decoded_sigs)) => {
                    aid = decoded_aid;
                    signatures = decoded_sigs;
                }
                Err(err) => {
                    tracing::warn!(%err, "received malformed handshake payload");
                    return self.purge_and_close(ctx, hdl);
                }
            }
        }
        // close self connection after handshake is done
        if hdr.source_node == self.this_node {
            tracing::info!("close connection to self immediately");
            ctx.callee.finalize_handshake(hdr.source_node, aid, &signatures);
            return self.purge_and_close(ctx, hdl);
        }
        // close this connection if we already have a direct connection
        if self.tbl.direct_handle(hdr.source_node).is_some() {
            tracing::info!(peer = %hdr.source_node, "close connection, already have a direct connection");
            ctx.callee.finalize_handshake(hdr.source_node, aid, &signatures);
            return self.purge_and_close(ctx, hdl);
        }
        // add direct route to this node and remove any indirect entry
        tracing::info!(peer = %hdr.source_node, "new direct connection");
        if !self.tbl.add_direct(hdl, hdr.source_node) {
            tracing::warn!(handle = %hdl, "connection handle is already bound to another node");
            return self.purge_and_close(ctx, hdl);
        }
        let was_indirect = self.tbl.erase_indirect(hdr.source_node);
        // write handshake as client in response
        let Some(path) = self.tbl.lookup(hdr.source_node) else {
            tracing::error!("no route to host after server handshake");
            return self.purge_and_close(ctx, hdl);
        };
        self.write_client_handshake(ctx.transport.wr_buf(path.hdl), hdr.source_node);
        ctx.callee.learned_new_node_directly(hdr.source_node, was_indirect);
        ctx.callee.finalize_handshake(hdr.source_node, aid, &signatures);
        ctx.transport.flush(path.hdl);
        ConnectionState::AwaitHeader
    }

    fn handle_client_handshake(
        &mut self,
        ctx: &mut Context<'_>,
        hdl: ConnectionHandle,
        hdr: &Header,
    ) -> ConnectionState {
        if self.tbl.direct_handle(hdr.source_node).is_some() {
            tracing::info!(peer = %hdr.source_node, "received second client handshake");
            return ConnectionState::AwaitHeader;
        }
        tracing::info!(peer = %hdr.source_node, "new direct connection");
        if !self.tbl.add_direct(hdl, hdr.source_node) {
            tracing::warn!(handle = %hdl, "connection handle is already bound to another node");
            return self.purge_and_close(ctx, hdl);
        }
        let was_indirect = self.tbl.erase_indirect(hdr.source_node);
        ctx.callee.learned_new_node_directly(hdr.source_node, was_indirect);
        ConnectionState::AwaitHeader
    }

    fn handle_dispatch(
        &mut self,
        ctx: &mut Context<'_>,
        hdl: ConnectionHandle,
        hdr: &Header,
        payload: Option<&[u8]>,
    ) -> ConnectionState {
        let Some(payload) = payload else {
            // unreachable through `valid()`, but a missing payload is never
            // deliverable
            return self.purge_and_close(ctx, hdl);
        };
        // the relay that gave us this frame can reach its original source
        let last_hop = self.tbl.direct_peer(hdl);
        if hdr.source_node.is_valid()
            && hdr.source_node != self.this_node
            && last_hop != Some(hdr.source_node)
            && self.tbl.direct_handle(hdr.source_node).is_none()
            && let Some(last_hop) = last_hop
            && self.tbl.add_indirect(last_hop, hdr.source_node)
        {
            ctx.callee.learned_new_node_indirectly(hdr.source_node);
        }
        let (forwarding_stack, message) = match wire::read_dispatch_payload(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(%err, "received malformed dispatch payload");
                return self.purge_and_close(ctx, hdl);
            }
        };
        ctx.callee.deliver(
            hdr.source_node,
            hdr.source_actor,
            hdr.dest_node,
            hdr.dest_actor,
            MessageId::from_raw(hdr.operation_data),
            &forwarding_stack,
            &message,
        );
        ConnectionState::AwaitHeader
    }
}

/// Append one frame to `buf`.
///
/// Without a payload writer the header goes out with `payload_len == 0`.
/// With one, [`HEADER_SIZE`] bytes are reserved, the writer appends the
/// payload, and the header is back-patched with the resulting length
/// (which is also stored into `hdr.payload_len`).
pub fn write_frame(
    buf: &mut Vec<u8>,
    hdr: &mut Header,
    payload_writer: Option<&mut dyn FnMut(&mut Vec<u8>)>,
) {
    match payload_writer {
        None => {
            hdr.payload_len = 0;
            hdr.append_to(buf);
        }
        Some(writer) => {
            let hdr_pos = buf.len();
            buf.resize(hdr_pos + HEADER_SIZE, 0);
            let payload_pos = buf.len();
            writer(buf);
            hdr.payload_len = (buf.len() - payload_pos) as u32;
            hdr.serialize_into(&mut buf[hdr_pos..hdr_pos + HEADER_SIZE]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_without_payload_zeroes_length() {
        let mut hdr = Header {
            payload_len: 77, // stale value must not leak onto the wire
            ..Header::default()
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &mut hdr, None);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(hdr.payload_len, 0);
        let decoded = Header::deserialize(&buf).expect("header");
        assert_eq!(decoded.payload_len, 0);
    }

    #[test]
    fn test_write_frame_back_patches_payload_len() {
        let mut hdr = Header::default();
        let mut buf = vec![0xAA; 3]; // frames may follow earlier bytes
        let mut writer = |out: &mut Vec<u8>| out.extend_from_slice(b"payload");
        write_frame(&mut buf, &mut hdr, Some(&mut writer));

        assert_eq!(hdr.payload_len, 7);
        assert_eq!(buf.len(), 3 + HEADER_SIZE + 7);
        let decoded = Header::deserialize(&buf[3..]).expect("header");
        assert_eq!(decoded.payload_len, 7);
        assert_eq!(&buf[3 + HEADER_SIZE..], b"payload");
    }
}
