//! BASP wire format.
//!
//! Frame format: `[header:40][payload:N]`
//!
//! The header is exactly [`HEADER_SIZE`] bytes, fields little-endian in
//! this order:
//!
//! | Offset | Size | Field |
//! |--------|------|----------------------|
//! | 0      | 8    | `source_node`        |
//! | 8      | 8    | `dest_node`          |
//! | 16     | 4    | `source_actor`       |
//! | 20     | 4    | `dest_actor`         |
//! | 24     | 4    | `payload_len`        |
//! | 28     | 4    | `operation`          |
//! | 32     | 8    | `operation_data`     |
//!
//! `payload_len == 0` means no payload follows. Every byte here is shared
//! with peer implementations; nothing in this module may change without a
//! protocol version bump.

use std::collections::BTreeSet;

use basp_core::{ActorAddr, ActorId, NodeId};

/// Header size in bytes. Every frame starts with exactly this many.
pub const HEADER_SIZE: usize = 40;

/// Protocol version exchanged in the server handshake's `operation_data`.
///
/// Peers with a different version are disconnected during handshake
/// validation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to decode the value.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to decode.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// The operation field holds a code outside the protocol enum.
    #[error("unknown operation code: {0}")]
    UnknownOperation(u32),

    /// An interface signature was not valid UTF-8.
    #[error("interface signature is not valid UTF-8")]
    InvalidSignature,
}

/// Operation code of a frame.
///
/// Concrete values are wire-visible and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Operation {
    /// First message on a connection, sent by the accepting side.
    #[default]
    ServerHandshake = 0,
    /// Reply to a server handshake, sent by the dialing side.
    ClientHandshake = 1,
    /// User message addressed to an actor.
    DispatchMessage = 2,
    /// A remote proxy for one of our actors came into existence.
    AnnounceProxyInstance = 3,
    /// Tear down a proxy, or transport a dispatch error (see
    /// [`Instance`](crate::Instance) docs for the payload overloading).
    KillProxyInstance = 4,
    /// Liveness signal between direct peers.
    Heartbeat = 5,
}

impl TryFrom<u32> for Operation {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::ServerHandshake),
            1 => Ok(Operation::ClientHandshake),
            2 => Ok(Operation::DispatchMessage),
            3 => Ok(Operation::AnnounceProxyInstance),
            4 => Ok(Operation::KillProxyInstance),
            5 => Ok(Operation::Heartbeat),
            other => Err(WireError::UnknownOperation(other)),
        }
    }
}

impl From<Operation> for u32 {
    fn from(op: Operation) -> u32 {
        op as u32
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Node that produced the frame.
    pub source_node: NodeId,
    /// Node the frame is addressed to. Invalid in server handshakes.
    pub dest_node: NodeId,
    /// Sending actor, if any.
    pub source_actor: ActorId,
    /// Receiving actor, if any.
    pub dest_actor: ActorId,
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// Operation code.
    pub operation: Operation,
    /// Operation-specific data: protocol version, message id, exit reason,
    /// or error code depending on `operation`.
    pub operation_data: u64,
}

impl Header {
    /// Serialize into a buffer (must be at least [`HEADER_SIZE`] bytes).
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the buffer is too small.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..8].copy_from_slice(&self.source_node.raw().to_le_bytes());
        buf[8..16].copy_from_slice(&self.dest_node.raw().to_le_bytes());
        buf[16..20].copy_from_slice(&self.source_actor.raw().to_le_bytes());
        buf[20..24].copy_from_slice(&self.dest_actor.raw().to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[28..32].copy_from_slice(&u32::from(self.operation).to_le_bytes());
        buf[32..40].copy_from_slice(&self.operation_data.to_le_bytes());
    }

    /// Append the serialized header to a growable buffer.
    pub fn append_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + HEADER_SIZE, 0);
        self.serialize_into(&mut buf[start..]);
    }

    /// Deserialize a header from a buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` for short input and `UnknownOperation`
    /// for an operation code outside the protocol enum. Everything else is
    /// structurally infallible.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let source_node = NodeId::new(r.u64()?);
        let dest_node = NodeId::new(r.u64()?);
        let source_actor = ActorId::new(r.u32()?);
        let dest_actor = ActorId::new(r.u32()?);
        let payload_len = r.u32()?;
        let operation = Operation::try_from(r.u32()?)?;
        let operation_data = r.u64()?;
        Ok(Self {
            source_node,
            dest_node,
            source_actor,
            dest_actor,
            payload_len,
            operation,
            operation_data,
        })
    }

    /// Whether this frame is part of the handshake sub-protocol.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.operation,
            Operation::ServerHandshake | Operation::ClientHandshake
        )
    }

    /// Whether this frame is a heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.operation == Operation::Heartbeat
    }

    /// Check the per-operation field constraints.
    ///
    /// - server handshake: `operation_data` carries the protocol version
    ///   and the destination node is not yet known,
    /// - client handshake: `operation_data` is zero,
    /// - dispatch: a payload must follow,
    /// - everything else: unconstrained beyond a known operation code.
    pub fn valid(&self) -> bool {
        match self.operation {
            Operation::ServerHandshake => {
                self.operation_data == u64::from(PROTOCOL_VERSION) && !self.dest_node.is_valid()
            }
            Operation::ClientHandshake => self.operation_data == 0,
            Operation::DispatchMessage => self.payload_len > 0,
            Operation::AnnounceProxyInstance
            | Operation::KillProxyInstance
            | Operation::Heartbeat => true,
        }
    }
}

// ── Payload codecs ───────────────────────────────────────────────────────────

/// Append a server-handshake payload: the published actor's id followed by
/// its interface signatures.
///
/// Layout: `aid:4`, `sig_count:4`, then per signature `len:4` + UTF-8 bytes.
pub fn write_handshake_payload(buf: &mut Vec<u8>, aid: ActorId, signatures: &BTreeSet<String>) {
    buf.extend_from_slice(&aid.raw().to_le_bytes());
    buf.extend_from_slice(&(signatures.len() as u32).to_le_bytes());
    for sig in signatures {
        buf.extend_from_slice(&(sig.len() as u32).to_le_bytes());
        buf.extend_from_slice(sig.as_bytes());
    }
}

/// Decode a server-handshake payload. Trailing bytes are ignored.
///
/// # Errors
///
/// Returns `InsufficientData` for truncated input and `InvalidSignature`
/// for non-UTF-8 signature bytes.
pub fn read_handshake_payload(buf: &[u8]) -> Result<(ActorId, BTreeSet<String>), WireError> {
    let mut r = Reader::new(buf);
    let aid = ActorId::new(r.u32()?);
    let count = r.u32()?;
    let mut signatures = BTreeSet::new();
    for _ in 0..count {
        let len = r.u32()? as usize;
        let bytes = r.bytes(len)?;
        let sig = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidSignature)?;
        signatures.insert(sig.to_owned());
    }
    Ok((aid, signatures))
}

/// Append a dispatch payload: the forwarding stack followed by the opaque
/// user message.
///
/// Layout: `stack_len:4`, per entry `node:8` + `actor:4`, then `msg_len:4`
/// + message bytes.
pub fn write_dispatch_payload(buf: &mut Vec<u8>, forwarding_stack: &[ActorAddr], message: &[u8]) {
    buf.extend_from_slice(&(forwarding_stack.len() as u32).to_le_bytes());
    for addr in forwarding_stack {
        buf.extend_from_slice(&addr.node.raw().to_le_bytes());
        buf.extend_from_slice(&addr.id.raw().to_le_bytes());
    }
    buf.extend_from_slice(&(message.len() as u32).to_le_bytes());
    buf.extend_from_slice(message);
}

/// Decode a dispatch payload. Trailing bytes are ignored.
///
/// # Errors
///
/// Returns `InsufficientData` for truncated input.
pub fn read_dispatch_payload(buf: &[u8]) -> Result<(Vec<ActorAddr>, Vec<u8>), WireError> {
    let mut r = Reader::new(buf);
    let count = r.u32()?;
    let mut forwarding_stack = Vec::new();
    for _ in 0..count {
        let node = NodeId::new(r.u64()?);
        let id = ActorId::new(r.u32()?);
        forwarding_stack.push(ActorAddr::new(node, id));
    }
    let msg_len = r.u32()? as usize;
    let message = r.bytes(msg_len)?.to_vec();
    Ok((forwarding_stack, message))
}

/// Bounds-checked little-endian cursor over a payload buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::InsufficientData {
            needed: usize::MAX,
            have: self.buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(WireError::InsufficientData {
                needed: end,
                have: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            source_node: NodeId::new(0x1111),
            dest_node: NodeId::new(0x2222),
            source_actor: ActorId::new(3),
            dest_actor: ActorId::new(4),
            payload_len: 5,
            operation: Operation::DispatchMessage,
            operation_data: 0xABCD_EF01_2345_6789,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let hdr = sample_header();
        let mut buf = [0u8; HEADER_SIZE];
        hdr.serialize_into(&mut buf);
        let decoded = Header::deserialize(&buf).expect("deserialize");
        assert_eq!(hdr, decoded);
    }

    #[test]
    fn test_header_field_offsets() {
        // The offsets below are the protocol; peers depend on every one.
        let hdr = sample_header();
        let mut buf = [0u8; HEADER_SIZE];
        hdr.serialize_into(&mut buf);

        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().expect("slice")), 0x1111);
        assert_eq!(u64::from_le_bytes(buf[8..16].try_into().expect("slice")), 0x2222);
        assert_eq!(u32::from_le_bytes(buf[16..20].try_into().expect("slice")), 3);
        assert_eq!(u32::from_le_bytes(buf[20..24].try_into().expect("slice")), 4);
        assert_eq!(u32::from_le_bytes(buf[24..28].try_into().expect("slice")), 5);
        assert_eq!(u32::from_le_bytes(buf[28..32].try_into().expect("slice")), 2);
        assert_eq!(
            u64::from_le_bytes(buf[32..40].try_into().expect("slice")),
            0xABCD_EF01_2345_6789
        );
    }

    #[test]
    fn test_header_short_input() {
        let result = Header::deserialize(&[0u8; 10]);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }

    #[test]
    fn test_header_unknown_operation() {
        let mut buf = [0u8; HEADER_SIZE];
        sample_header().serialize_into(&mut buf);
        buf[28..32].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(
            Header::deserialize(&buf),
            Err(WireError::UnknownOperation(99))
        );
    }

    #[test]
    fn test_operation_codes_are_fixed() {
        assert_eq!(u32::from(Operation::ServerHandshake), 0);
        assert_eq!(u32::from(Operation::ClientHandshake), 1);
        assert_eq!(u32::from(Operation::DispatchMessage), 2);
        assert_eq!(u32::from(Operation::AnnounceProxyInstance), 3);
        assert_eq!(u32::from(Operation::KillProxyInstance), 4);
        assert_eq!(u32::from(Operation::Heartbeat), 5);
    }

    #[test]
    fn test_valid_server_handshake() {
        let mut hdr = Header {
            operation: Operation::ServerHandshake,
            operation_data: u64::from(PROTOCOL_VERSION),
            source_node: NodeId::new(1),
            ..Header::default()
        };
        assert!(hdr.valid());

        // version mismatch closes the connection
        hdr.operation_data = u64::from(PROTOCOL_VERSION) + 1;
        assert!(!hdr.valid());

        // a server handshake never names its destination
        hdr.operation_data = u64::from(PROTOCOL_VERSION);
        hdr.dest_node = NodeId::new(2);
        assert!(!hdr.valid());
    }

    #[test]
    fn test_valid_client_handshake() {
        let mut hdr = Header {
            operation: Operation::ClientHandshake,
            ..Header::default()
        };
        assert!(hdr.valid());
        hdr.operation_data = 1;
        assert!(!hdr.valid());
    }

    #[test]
    fn test_valid_dispatch_requires_payload() {
        let mut hdr = Header {
            operation: Operation::DispatchMessage,
            payload_len: 0,
            ..Header::default()
        };
        assert!(!hdr.valid());
        hdr.payload_len = 1;
        assert!(hdr.valid());
    }

    #[test]
    fn test_handshake_payload_roundtrip() {
        let sigs: BTreeSet<String> = ["Sig1".to_owned(), "Sig2".to_owned()].into();
        let mut buf = Vec::new();
        write_handshake_payload(&mut buf, ActorId::new(42), &sigs);

        let (aid, decoded) = read_handshake_payload(&buf).expect("decode");
        assert_eq!(aid, ActorId::new(42));
        assert_eq!(decoded, sigs);
    }

    #[test]
    fn test_handshake_payload_empty_signatures() {
        let mut buf = Vec::new();
        write_handshake_payload(&mut buf, ActorId::new(7), &BTreeSet::new());
        assert_eq!(buf.len(), 8);

        let (aid, sigs) = read_handshake_payload(&buf).expect("decode");
        assert_eq!(aid, ActorId::new(7));
        assert!(sigs.is_empty());
    }

    #[test]
    fn test_handshake_payload_truncated() {
        let sigs: BTreeSet<String> = ["Signature".to_owned()].into();
        let mut buf = Vec::new();
        write_handshake_payload(&mut buf, ActorId::new(1), &sigs);

        let result = read_handshake_payload(&buf[..buf.len() - 1]);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }

    #[test]
    fn test_handshake_payload_bad_utf8() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes()); // aid
        buf.extend_from_slice(&1u32.to_le_bytes()); // one signature
        buf.extend_from_slice(&2u32.to_le_bytes()); // of two bytes
        buf.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(read_handshake_payload(&buf), Err(WireError::InvalidSignature));
    }

    #[test]
    fn test_handshake_payload_huge_count_is_rejected() {
        // a hostile count must run out of input, not out of memory
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            read_handshake_payload(&buf),
            Err(WireError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_dispatch_payload_roundtrip() {
        let stack = vec![
            ActorAddr::new(NodeId::new(1), ActorId::new(10)),
            ActorAddr::new(NodeId::new(2), ActorId::new(20)),
        ];
        let mut buf = Vec::new();
        write_dispatch_payload(&mut buf, &stack, b"user message");

        let (decoded_stack, msg) = read_dispatch_payload(&buf).expect("decode");
        assert_eq!(decoded_stack, stack);
        assert_eq!(msg, b"user message");
    }

    #[test]
    fn test_dispatch_payload_empty_stack_and_message() {
        let mut buf = Vec::new();
        write_dispatch_payload(&mut buf, &[], b"");
        assert_eq!(buf.len(), 8);

        let (stack, msg) = read_dispatch_payload(&buf).expect("decode");
        assert!(stack.is_empty());
        assert!(msg.is_empty());
    }

    #[test]
    fn test_dispatch_payload_truncated_message() {
        let mut buf = Vec::new();
        write_dispatch_payload(&mut buf, &[], b"full message");
        let result = read_dispatch_payload(&buf[..buf.len() - 4]);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }
}
