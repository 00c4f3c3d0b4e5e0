//! Constants used across the bus protocol implementation.
//!
//! This module defines the protocol-wide constants for addressing, control
//! commands, retry limits, timeouts, and frame sizing.
//!
//! ## Key Concepts
//!
//! - **Addresses**: One byte per node. `ADDRESS_NONE` marks a node that has not
//!   claimed an address yet (and is also the destination such a node answers
//!   to while probing). `ADDRESS_BROADCAST` reaches every node. Claimable
//!   addresses lie in `[ADDRESS_MIN, ADDRESS_MAX]`.
//! - **Attempt Limits**: Bound the retry loops for collision recovery at the
//!   frame-write level and for unacknowledged sends at the dispatch level.
//! - **Timeouts**: Expressed in polling ticks of [`POLL_INTERVAL_MS`]
//!   milliseconds each.
//!
//! These values should be used wherever framing or dispatch logic is
//! implemented so that all nodes on a bus agree on frame boundaries and
//! retry dynamics.

/// Address value of a node that has not (yet) claimed a bus address.
///
/// While a node probes for a free address it answers to this value, which is
/// how two booting nodes exchange their probe handshakes.
pub const ADDRESS_NONE: u8 = 0x00;

/// Destination address that every node on the bus accepts.
///
/// Packets sent here are never acknowledged.
pub const ADDRESS_BROADCAST: u8 = u8::MAX;

/// Lowest claimable bus address.
pub const ADDRESS_MIN: u8 = 0x01;

/// Highest claimable bus address.
pub const ADDRESS_MAX: u8 = 0x7F;

/// Command value carried by control packets that have no application opcode.
pub const COMMAND_NONE: u8 = 0x00;

/// Length (in bytes) of the fixed packet header as laid out on the wire.
pub const HEADER_LEN: u8 = 7;

/// See [`HEADER_LEN`]
pub const HEADER_LEN_USIZE: usize = HEADER_LEN as usize;

/// Maximum payload size in bytes, capped by the 8-bit length field.
pub const MAX_PAYLOAD_LEN: u8 = u8::MAX;

/// See [`MAX_PAYLOAD_LEN`]
pub const MAX_PAYLOAD_LEN_USIZE: usize = MAX_PAYLOAD_LEN as usize;

/// Number of times a whole send (transmission plus acknowledge wait) is
/// attempted before giving up with a timeout error.
pub const SEND_ATTEMPTS: u8 = 3;

/// Number of times a frame write is attempted when the bus reports collisions.
pub const WRITE_ATTEMPTS: u8 = 3;

/// Interval between receive-slot polls, in milliseconds.
///
/// One timeout tick corresponds to one such interval.
pub const POLL_INTERVAL_MS: u32 = 1;

/// Ticks to wait for the acknowledge that answers an address probe.
///
/// Kept short: an absent node is the common case during the address scan and
/// every claim pays this wait once per probed address.
pub const CHECK_TIMEOUT_TICKS: u16 = 10;

/// Ticks to wait for the acknowledge of a transmitted packet before the send
/// is retried.
pub const ACKNOWLEDGE_TIMEOUT_TICKS: u16 = 25;
