//! Seam between the protocol engine and the bit-level physical layer.
//!
//! The protocol core never touches the line itself. Everything the hardware
//! layer must provide (driving the wire, sampling bits on a timer, detecting
//! that another node drove the line at the same time) sits behind [`BusPort`]:
//! byte egress with collision reporting, and a non-blocking hand-off of the
//! bytes the receive path has assembled.
//!
//! Inbound bytes reach the core through
//! [`Connection::process_byte`](crate::connection::Connection::process_byte),
//! either pumped out of [`BusPort::read_byte`] by the blocking operations or
//! called directly from a platform ISR (see [`crate::isr`]).

use thiserror::Error;

/// Errors reported by the physical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    /// Another node drove the line during the write; the frame on the wire is
    /// garbage for every listener.
    #[error("transmission collided")]
    Collision,
    /// The byte could not be clocked onto the line.
    #[error("line write failed")]
    Write,
}

/// Byte-level access to the shared bus line.
///
/// Implementations are expected to serialize line access across collision
/// detection so that at most one node completes any given transmission
/// attempt. How bits are clocked (timer interrupts, bit banging, a UART) is
/// entirely the implementation's business.
pub trait BusPort {
    /// Writes one byte to the bus, blocking until it has been clocked out.
    fn write_byte(&mut self, byte: u8) -> Result<(), PortError>;

    /// Hands over the next inbound byte assembled by the receive path.
    ///
    /// Returns [`nb::Error::WouldBlock`] while nothing is pending. An error
    /// byte (framing damage, sampling fault) is reported as
    /// [`nb::Error::Other`] in place of the byte it would have been.
    fn read_byte(&mut self) -> nb::Result<u8, PortError>;

    /// Writes a whole buffer, stopping at the first failed byte.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }
}
