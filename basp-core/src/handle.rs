//! Transport connection handles.

use serde::{Deserialize, Serialize};

/// Opaque name the transport assigns to one byte stream.
///
/// Handles exist from transport-accept (or dial) until transport-close; a
/// handle's lifetime bounds any direct route using it. Zero is the invalid
/// sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// The invalid sentinel. Never names a real connection.
    pub const INVALID: ConnectionHandle = ConnectionHandle(0);

    /// Create a connection handle from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value of the handle.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Check whether this handle names a real connection.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
