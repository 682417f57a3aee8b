//! # basp-core
//!
//! Identifier and addressing types for the BASP (Binary Actor System
//! Protocol) wire protocol.
//!
//! Every process participating in a BASP mesh is a *node* named by a
//! [`NodeId`]; actors live inside nodes and are named by an [`ActorId`]
//! relative to their owner. An [`ActorAddr`] combines both into a globally
//! unique actor address. The transport layer names each byte stream with a
//! [`ConnectionHandle`].
//!
//! All identifier types share the same conventions:
//!
//! - a distinguished invalid sentinel (`INVALID`, the all-zero value),
//! - `Copy` + total ordering, so they can key hash maps and ordered sets,
//! - a fixed-width little-endian wire encoding (applied by the engine's
//!   codec, not by this crate),
//! - serde derives for embedders that put them into their own config or
//!   RPC types.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod actor;
mod handle;
mod message;
mod node;

pub use actor::{ActorAddr, ActorId};
pub use handle::ConnectionHandle;
pub use message::{ErrorCode, ExitReason, MessageId};
pub use node::NodeId;
