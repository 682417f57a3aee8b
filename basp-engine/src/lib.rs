//! # basp-engine
//!
//! Wire-level protocol engine for BASP, the Binary Actor System Protocol.
//! Distributed actors on different nodes exchange messages over a mesh of
//! point-to-point byte streams; this crate multiplexes the logical
//! node-to-node relationships over those streams, relays frames through
//! intermediate peers when no direct link exists, and maintains the
//! membership and reachability state that routing depends on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │             Hosting actor system                │
//! │     implements Callee (+ optionally Hooks)      │
//! ├─────────────────────────────────────────────────┤
//! │     Instance (receive state machine)            │
//! │     • two-phase parse: header → payload         │
//! │     • handshake / dispatch / proxy lifecycle    │
//! │     • forwards frames for third nodes           │
//! ├─────────────────────────────────────────────────┤
//! │     RoutingTable + PublishedActors              │
//! │     • direct: node ↔ connection (bijective)     │
//! │     • indirect: node → relay set                │
//! ├─────────────────────────────────────────────────┤
//! │     Transport (per-connection write buffers)    │
//! │     • MemoryTransport for tests                 │
//! │     • broker::Broker over tokio TCP             │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`wire`] | Bit-exact 40-byte header codec and payload formats |
//! | [`RoutingTable`] | Direct and relayed reachability of remote nodes |
//! | [`Instance`] | The engine: receive state machine and frame writers |
//! | [`Callee`] | Upcalls into the hosting actor system |
//! | [`Hooks`] | Optional observability events |
//! | [`broker`] | Tokio TCP embedding of the engine |
//!
//! ## Threading model
//!
//! An [`Instance`] is a single-threaded cooperative component: the embedder
//! serializes every inbound delivery and outbound writer call, and every
//! upcall fires before the triggering call returns. The [`broker`] module
//! provides exactly that discipline on top of tokio; `MemoryTransport`
//! based tests provide it trivially.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export the identifier types; embedders should not need to depend on
// basp-core directly.
pub use basp_core::{
    ActorAddr, ActorId, ConnectionHandle, ErrorCode, ExitReason, MessageId, NodeId,
};

/// Tokio TCP embedding of the engine.
pub mod broker;

/// Upcall surface into the hosting actor system.
pub mod callee;

/// Optional observability events.
pub mod hooks;

/// The protocol engine and its receive state machine.
pub mod instance;

/// Published-actor registry.
pub mod published;

/// Node routing table.
pub mod routing;

/// Byte-stream transport abstraction.
pub mod transport;

/// Bit-exact wire format.
pub mod wire;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerHandle};
pub use callee::Callee;
pub use hooks::Hooks;
pub use instance::{ConnectionState, Context, Instance, write_frame};
pub use published::{PublishedActor, PublishedActors};
pub use routing::{Route, RoutingTable};
pub use transport::{MemoryTransport, Transport};
pub use wire::{HEADER_SIZE, Header, Operation, PROTOCOL_VERSION, WireError};
