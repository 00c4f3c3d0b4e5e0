//! Byte-level frame reassembly.
//!
//! The physical layer delivers inbound traffic one byte at a time, with no
//! lookahead and no buffering of its own. [`Reassembler`] turns that stream
//! back into validated packets: it accumulates the seven header bytes, checks
//! the destination and checksum, collects the payload, and reports how many
//! bytes of a rejected frame remain so the caller can discard them and
//! re-synchronize on the next frame boundary.
//!
//! All parsing state lives in the struct and is threaded through each call,
//! so the machine can be driven from an interrupt context without hidden
//! storage.

use crate::consts::{ADDRESS_BROADCAST, HEADER_LEN_USIZE};
use crate::packet::{PacketHeader, Payload};

/// Outcome of feeding one byte to the reassembler.
#[derive(Debug)]
pub(crate) enum Step {
    /// The frame is still in progress.
    Pending,
    /// A frame completed and passed validation.
    Complete(PacketHeader, Payload),
    /// The current frame was discarded. The caller must drop this many
    /// subsequent stream bytes without re-entering the reassembler; parsing
    /// resumes at the byte after them.
    Skip(u8),
}

/// Incremental parser for one frame at a time.
///
/// Frames not addressed to this node, with a bad checksum, or with an unknown
/// status byte are discarded as a whole: the header is still absorbed so the
/// payload length is known, then the payload is skipped via [`Step::Skip`].
/// A discarded frame therefore consumes exactly header plus `length` bytes of
/// the stream, which is what keeps the parser aligned with frame boundaries
/// on a bus it shares with unrelated traffic.
#[derive(Debug, Default)]
pub(crate) struct Reassembler {
    /// Bytes of the current frame consumed so far; 0 when idle.
    index: usize,
    header_buf: [u8; HEADER_LEN_USIZE],
    header: Option<PacketHeader>,
    payload: Payload,
    invalid: bool,
    /// Frames discarded since startup.
    pub(crate) bad: u16,
}

impl Reassembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds one inbound byte.
    ///
    /// `own_address` decides which destinations are accepted alongside
    /// broadcast. `poisoned` marks the byte as damaged by the physical layer;
    /// the in-progress frame is then discarded once its extent is known.
    pub(crate) fn push(&mut self, own_address: u8, poisoned: bool, byte: u8) -> Step {
        if poisoned {
            return self.poison();
        }

        if self.index < HEADER_LEN_USIZE {
            self.header_buf[self.index] = byte;
            self.index += 1;

            if self.index == 2 {
                // Destination known; frames for other nodes still get their
                // header absorbed so the payload length can be skipped.
                let destination = self.header_buf[0];
                if destination != own_address && destination != ADDRESS_BROADCAST {
                    self.invalid = true;
                }
            } else if self.index == HEADER_LEN_USIZE {
                return self.finish_header();
            }
            return Step::Pending;
        }

        let Some(header) = self.header else {
            self.reset();
            return Step::Pending;
        };
        let _ = self.payload.push(byte);
        self.index += 1;

        if self.payload.len() >= header.length as usize {
            let payload = core::mem::take(&mut self.payload);
            self.reset();
            return Step::Complete(header, payload);
        }
        Step::Pending
    }

    /// Runs once the seventh header byte has arrived.
    fn finish_header(&mut self) -> Step {
        let length = self.header_buf[5];
        let header = match PacketHeader::from_wire(&self.header_buf) {
            Some(header) if !self.invalid => header,
            _ => {
                self.bad = self.bad.wrapping_add(1);
                self.reset();
                #[cfg(feature = "log")]
                log::debug!("dropping inbound frame, skipping {} payload bytes", length);
                return Step::Skip(length);
            }
        };

        if header.length == 0 {
            self.reset();
            return Step::Complete(header, Payload::new());
        }
        self.header = Some(header);
        Step::Pending
    }

    /// Discards the in-progress frame after a physical-layer error.
    ///
    /// During the payload phase the remaining extent is known and skipped
    /// right away. During the header phase the frame is only marked invalid;
    /// the remaining header bytes are still absorbed so the length field can
    /// drive the skip. Between frames there is nothing to discard.
    fn poison(&mut self) -> Step {
        if self.index == 0 {
            return Step::Pending;
        }
        if let Some(header) = self.header {
            // The damaged byte takes the place of one payload byte.
            let remaining = header.length as usize - self.payload.len() - 1;
            self.bad = self.bad.wrapping_add(1);
            self.reset();
            return Step::Skip(remaining as u8);
        }
        self.invalid = true;
        self.header_buf[self.index] = 0;
        self.index += 1;
        if self.index == HEADER_LEN_USIZE {
            return self.finish_header();
        }
        Step::Pending
    }

    fn reset(&mut self) {
        self.index = 0;
        self.invalid = false;
        self.header = None;
        self.payload.clear();
    }
}
