//! Packet framing types for the bus protocol.
//!
//! A packet is a fixed seven-byte header followed by up to 255 payload bytes.
//! The header travels as a flat byte sequence:
//!
//! `[destination][source][status][command][id][length][checksum]`
//!
//! All fields are one byte wide. The checksum is the XOR of the other six
//! header bytes, so integrity of the header can be checked without buffering
//! the payload. Payload bytes are not covered by the checksum.
//!
//! Payload ownership moves with the packet: the reassembler builds the buffer,
//! hands it to the receive slot, and the consuming call hands it to the
//! application. Dropping the packet on any path releases the buffer.

use crate::checksum::header_checksum;
use crate::consts::HEADER_LEN_USIZE;
#[cfg(not(feature = "std"))]
use crate::consts::MAX_PAYLOAD_LEN_USIZE;

#[cfg(not(feature = "std"))]
use heapless::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Owned payload buffer of a packet.
#[cfg(not(feature = "std"))]
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN_USIZE>;

/// Owned payload buffer of a packet.
#[cfg(feature = "std")]
pub type Payload = Vec<u8>;

/// Wire-visible packet kind.
///
/// `Check` and `Acknowledge` are control packets and exempt from the standard
/// acknowledgment discipline; `Request` and `Response` carry application data
/// and must be acknowledged by their recipient.
///
/// Local packet matching treats an absent filter as "any"; that wildcard never
/// appears on the wire, which is why there is no variant for it.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
pub enum Status {
    /// Probe whether a bus address is currently claimed. Answered directly by
    /// the receiver's reassembly path with an `Acknowledge`.
    Check = 0x01,
    /// Confirms reception of a packet. Never acknowledged itself.
    Acknowledge = 0x02,
    /// Application request expecting a `Response` with the same command.
    Request = 0x03,
    /// Application reply to a `Request`.
    Response = 0x04,
}

impl Status {
    /// Decodes a wire status byte. Returns `None` for values outside the
    /// protocol, which invalidates the frame carrying them.
    pub fn from_wire(byte: u8) -> Option<Status> {
        match byte {
            0x01 => Some(Status::Check),
            0x02 => Some(Status::Acknowledge),
            0x03 => Some(Status::Request),
            0x04 => Some(Status::Response),
            _ => None,
        }
    }
}

/// The fixed-size packet header, transmitted before the payload.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct PacketHeader {
    /// Target address, or [`ADDRESS_BROADCAST`](crate::consts::ADDRESS_BROADCAST).
    pub destination: u8,
    /// The sender's claimed address, or
    /// [`ADDRESS_NONE`](crate::consts::ADDRESS_NONE) while the sender is still
    /// probing for one.
    pub source: u8,
    /// Packet kind.
    pub status: Status,
    /// Application-defined opcode;
    /// [`COMMAND_NONE`](crate::consts::COMMAND_NONE) on control packets.
    pub command: u8,
    /// Per-sender sequence number, used to correlate an acknowledge or reply
    /// with the packet that caused it. Wraps at 8 bits.
    pub id: u8,
    /// Number of payload bytes following the header.
    pub length: u8,
    /// XOR of all other header bytes.
    pub checksum: u8,
}

impl PacketHeader {
    /// Builds a header with its checksum filled in.
    pub fn new(
        destination: u8,
        source: u8,
        status: Status,
        command: u8,
        id: u8,
        length: u8,
    ) -> Self {
        let mut header = Self {
            destination,
            source,
            status,
            command,
            id,
            length,
            checksum: 0,
        };
        header.checksum = header_checksum(&header.to_wire());
        header
    }

    /// Serializes the header into its on-wire byte order.
    pub fn to_wire(&self) -> [u8; HEADER_LEN_USIZE] {
        [
            self.destination,
            self.source,
            self.status as u8,
            self.command,
            self.id,
            self.length,
            self.checksum,
        ]
    }

    /// Parses a header from its on-wire byte order.
    ///
    /// Returns `None` when the transmitted checksum does not match the
    /// recomputed one, or when the status byte is not a protocol value.
    pub fn from_wire(bytes: &[u8; HEADER_LEN_USIZE]) -> Option<Self> {
        if header_checksum(bytes) != bytes[HEADER_LEN_USIZE - 1] {
            return None;
        }
        Some(Self {
            destination: bytes[0],
            source: bytes[1],
            status: Status::from_wire(bytes[2])?,
            command: bytes[3],
            id: bytes[4],
            length: bytes[5],
            checksum: bytes[6],
        })
    }
}

/// A received request, as handed to the application by
/// [`get_request`](crate::connection::Connection::get_request).
///
/// Owns its payload; answer it with
/// [`send_response`](crate::connection::Connection::send_response).
#[derive(Debug)]
pub struct RequestData {
    /// Address of the requesting node.
    pub source: u8,
    /// Address the request was sent to (this node, or broadcast).
    pub destination: u8,
    /// Application opcode of the request; echoed by the response.
    pub command: u8,
    /// Request payload.
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::HEADER_LEN_USIZE;

    fn header() -> PacketHeader {
        PacketHeader::new(0x05, 0x02, Status::Request, 0x30, 0x11, 3)
    }

    #[test]
    fn test_header_round_trip() {
        let wire = header().to_wire();
        assert_eq!(wire.len(), HEADER_LEN_USIZE);
        let parsed = PacketHeader::from_wire(&wire).unwrap();
        assert_eq!(parsed, header());
    }

    #[test]
    fn test_checksum_is_xor_of_other_bytes() {
        let wire = header().to_wire();
        let folded = wire[..6].iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(wire[6], folded);
    }

    #[test]
    fn test_corrupting_any_byte_rejects_header() {
        let wire = header().to_wire();
        for i in 0..HEADER_LEN_USIZE {
            let mut corrupt = wire;
            corrupt[i] ^= 0x40;
            assert!(
                PacketHeader::from_wire(&corrupt).is_none(),
                "byte {} corruption went undetected",
                i
            );
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut wire = header().to_wire();
        wire[2] = 0x09;
        wire[6] = wire[..6].iter().fold(0u8, |acc, b| acc ^ b);
        assert!(PacketHeader::from_wire(&wire).is_none());
    }

    #[test]
    fn test_status_wire_values() {
        for status in [
            Status::Check,
            Status::Acknowledge,
            Status::Request,
            Status::Response,
        ] {
            assert_eq!(Status::from_wire(status as u8), Some(status));
        }
        assert_eq!(Status::from_wire(0x00), None);
        assert_eq!(Status::from_wire(0x05), None);
    }
}
