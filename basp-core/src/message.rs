//! Message ids, exit reasons, and wire-visible error codes.

use serde::{Deserialize, Serialize};

/// Identifier correlating a dispatched message with its answer.
///
/// Carried verbatim in the `operation_data` field of dispatch frames; the
/// engine never interprets it beyond round-tripping the 64-bit value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct MessageId(u64);

impl MessageId {
    /// Reconstruct a message id from its wire value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value, as it appears on the wire.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Reason an actor (or its proxy) terminated.
///
/// A 32-bit value on the API surface. Kill-proxy frames zero-extend it into
/// the 64-bit `operation_data` field and receivers truncate it back; the
/// asymmetry is part of the wire format shared with peers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ExitReason(u32);

impl ExitReason {
    /// Regular termination.
    pub const NORMAL: ExitReason = ExitReason(1);
    /// Forced termination.
    pub const KILL: ExitReason = ExitReason(2);

    /// Create an exit reason from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Widen into the 64-bit `operation_data` wire field.
    pub const fn to_operation_data(self) -> u64 {
        self.0 as u64
    }

    /// Recover an exit reason from `operation_data`, truncating the upper
    /// 32 bits.
    pub const fn from_operation_data(data: u64) -> Self {
        Self(data as u32)
    }
}

/// Wire-visible error codes transported in dispatch-error frames.
///
/// Zero is reserved so a zeroed `operation_data` never reads as a valid
/// error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u64)]
pub enum ErrorCode {
    /// The destination node of a forwarded message is unreachable.
    NoRouteToDestination = 1,
}

impl From<ErrorCode> for u64 {
    fn from(code: ErrorCode) -> u64 {
        code as u64
    }
}

impl TryFrom<u64> for ErrorCode {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::NoRouteToDestination),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_width_asymmetry() {
        let reason = ExitReason::new(0xDEAD_BEEF);
        assert_eq!(reason.to_operation_data(), 0x0000_0000_DEAD_BEEF);
        // receivers truncate whatever the peer put into the upper half
        assert_eq!(
            ExitReason::from_operation_data(0xFFFF_FFFF_DEAD_BEEF),
            reason
        );
    }

    #[test]
    fn test_error_code_roundtrip() {
        assert_eq!(u64::from(ErrorCode::NoRouteToDestination), 1);
        assert_eq!(
            ErrorCode::try_from(1),
            Ok(ErrorCode::NoRouteToDestination)
        );
        assert_eq!(ErrorCode::try_from(0), Err(0));
        assert_eq!(ErrorCode::try_from(99), Err(99));
    }

    #[test]
    fn test_message_id_roundtrip() {
        let mid = MessageId::from_raw(0x0102_0304_0506_0708);
        assert_eq!(MessageId::from_raw(mid.raw()), mid);
    }
}
