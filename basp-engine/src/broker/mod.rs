//! Tokio embedding of the protocol engine.
//!
//! The engine itself is synchronous and single-threaded; this module is the
//! production embedder that feeds it. One central task owns the
//! [`Instance`](crate::Instance), its [`Transport`](crate::Transport)
//! implementation, the callee, and the hooks. Everything else is plumbing
//! that serializes onto that task:
//!
//! ```text
//! ┌────────────┐  accept   ┌───────────────────────────────┐
//! │ accept loop├──────────►│                               │
//! └────────────┘           │        broker task            │
//! ┌────────────┐  frames   │  Instance + write buffers     │
//! │ reader task├──────────►│  + Callee + Hooks             │
//! │ (per conn) │           │                               │
//! └────────────┘           └──────────────┬────────────────┘
//! ┌────────────┐  ticks         flush     │
//! │ heartbeat  ├──────────►               ▼
//! └────────────┘           ┌───────────────────────────────┐
//!                          │  writer task (per conn)       │
//!                          └───────────────────────────────┘
//! ```
//!
//! Reader tasks perform the wire-level two-phase read (fixed header, then
//! exactly the announced payload) and forward both phases to the broker
//! task, which drives the engine's receive state machine. `flush` hands a
//! connection's buffered bytes to its writer task, preserving append order.
//!
//! The accepting side opens the handshake: every accepted connection gets a
//! server handshake for the broker's listen port before any other traffic.
//! Dialed connections stay silent until the peer's server handshake
//! arrives.

pub mod config;
mod core;
pub mod error;

pub use config::BrokerConfig;
pub use core::{Broker, BrokerHandle};
pub use error::BrokerError;
