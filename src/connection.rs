//! Bus connection: dispatch, addressing, and the receive slot.
//!
//! This module provides the [`Connection`] struct, which implements the
//! packet protocol for one node on a shared single-wire bus: claiming an
//! address at startup, sending packets with acknowledgment and bounded retry,
//! and serving the synchronous request/response API on top of the single-slot
//! receive mailbox.
//!
//! The connection is an explicit, owned object. It is generic over the
//! physical layer ([`BusPort`]) and a timing source
//! ([`embedded_hal::delay::DelayNs`]), so the same engine runs against a
//! bit-banged line, a UART, or a test double.
//!
//! ## Inbound path
//!
//! The physical layer delivers one byte at a time. Two integration styles are
//! supported, both ending in [`Connection::process_byte`]:
//!
//! - the platform ISR enqueues raw bytes and the blocking operations drain
//!   them through [`BusPort::read_byte`] between receive-slot polls, or
//! - the ISR calls [`Connection::process_byte`] itself through a
//!   `critical-section` singleton (see [`crate::isr`]), honoring the returned
//!   skip count.
//!
//! ## Blocking model
//!
//! [`Connection::wait_for_packet`] and the acknowledge wait inside
//! [`Connection::send`] are the only blocking operations. They poll the
//! receive slot every [`POLL_INTERVAL_MS`] milliseconds and give up when
//! their [`Timeout`] lapses; nothing in the crate parks a thread or disables
//! interrupts for longer than one byte of work.
//!
//! ## Known limitation
//!
//! A packet sitting in the receive slot that matches no active waiter blocks
//! delivery of further packets until some waiter consumes it; the reassembler
//! drops arrivals while the slot is full, and senders cover the loss with
//! their retry loop. Draining mismatches instead would change those retry
//! dynamics for every other node on the bus, so the behavior is deliberate.

use crate::consts::{
    ACKNOWLEDGE_TIMEOUT_TICKS, ADDRESS_BROADCAST, ADDRESS_MAX, ADDRESS_MIN, ADDRESS_NONE,
    CHECK_TIMEOUT_TICKS, COMMAND_NONE, MAX_PAYLOAD_LEN_USIZE, POLL_INTERVAL_MS, SEND_ATTEMPTS,
    WRITE_ATTEMPTS,
};
use crate::error::Error;
use crate::packet::{PacketHeader, Payload, RequestData, Status};
use crate::reassembler::{Reassembler, Step};
use crate::transport::{BusPort, PortError};
use embedded_hal::delay::DelayNs;

/// How long a blocking operation keeps polling the receive slot.
///
/// One tick is one poll interval of
/// [`POLL_INTERVAL_MS`](crate::consts::POLL_INTERVAL_MS) milliseconds.
/// `Ticks(0)` checks the slot exactly once without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Poll until a matching packet arrives.
    Infinite,
    /// Give up with [`Error::TimeoutExceeded`] after this many ticks.
    Ticks(u16),
}

/// Pause policy between transmission attempts that collided.
///
/// Receives the attempt number (starting at 1) and returns milliseconds to
/// wait before the line is retried. The default policy returns zero; a real
/// deployment will want something address-seeded so two colliding nodes do
/// not collide again in lockstep.
pub type CollisionBackoff = fn(attempt: u8) -> u32;

fn no_backoff(_attempt: u8) -> u32 {
    0
}

/// One node's connection to the bus.
///
/// Created uninitialized; [`initialize`](Connection::initialize) claims a bus
/// address and unlocks the other operations. There is exactly one connection
/// per node; it owns the receive slot that the whole protocol synchronizes
/// on.
#[derive(Debug)]
pub struct Connection<P, D>
where
    P: BusPort,
    D: DelayNs,
{
    /// Physical layer handle.
    pub port: P,
    delay: D,
    address: u8,
    last_id: u8,
    is_initialized: bool,
    reassembler: Reassembler,
    /// The single-slot receive mailbox. Written only by the reassembly path
    /// once a frame is complete; emptied only by a matching waiter.
    slot: Option<(PacketHeader, Payload)>,
    /// Bytes the pump still has to discard after a rejected frame.
    pending_skip: u8,
    backoff: CollisionBackoff,
}

impl<P, D> Connection<P, D>
where
    P: BusPort,
    D: DelayNs,
{
    /// Creates an uninitialized connection over the given port and timing
    /// source.
    pub fn new(port: P, delay: D) -> Self {
        Self {
            port,
            delay,
            address: ADDRESS_NONE,
            last_id: 0,
            is_initialized: false,
            reassembler: Reassembler::new(),
            slot: None,
            pending_skip: 0,
            backoff: no_backoff,
        }
    }

    /// Installs the pause policy applied between colliding write attempts.
    pub fn set_collision_backoff(&mut self, backoff: CollisionBackoff) {
        self.backoff = backoff;
    }

    /// Claims a bus address by probing every candidate in
    /// `[ADDRESS_MIN, ADDRESS_MAX]` and keeping the first one nobody answers
    /// for.
    ///
    /// A no-op when already initialized. While probing, the node answers to
    /// [`ADDRESS_NONE`]. When every candidate is claimed the connection is
    /// left uninitialized and [`Error::NoAddressAvailable`] is returned.
    ///
    /// Two nodes probing the same address inside the same timeout window can
    /// both claim it; the probe is a liveness check, not an arbiter.
    pub fn initialize(&mut self) -> Result<(), Error> {
        if self.is_initialized {
            return Ok(());
        }
        self.address = ADDRESS_NONE;
        self.last_id = 0;
        self.slot = None;
        // Probe traffic must flow before any address is claimed.
        self.is_initialized = true;

        for candidate in ADDRESS_MIN..=ADDRESS_MAX {
            if !self.check(candidate) {
                self.address = candidate;
                #[cfg(feature = "log")]
                log::info!("claimed bus address {:#04x}", candidate);
                return Ok(());
            }
        }
        self.is_initialized = false;
        Err(Error::NoAddressAvailable)
    }

    /// Asks the bus whether `address` is already claimed.
    ///
    /// Sends a [`Status::Check`] probe and waits a short, fixed time for the
    /// owner's acknowledge. Only a clean timeout counts as "free"; any other
    /// outcome (including a failed write) reports the address as in use so a
    /// flaky line can not hand out duplicates.
    pub fn check(&mut self, address: u8) -> bool {
        let probe = self
            .send(address, Status::Check, COMMAND_NONE, &[])
            .and_then(|()| {
                self.wait_for_packet(
                    Some(address),
                    Some(Status::Acknowledge),
                    None,
                    None,
                    Timeout::Ticks(CHECK_TIMEOUT_TICKS),
                )
                .map(|_| ())
            });
        !matches!(probe, Err(Error::TimeoutExceeded))
    }

    /// The claimed bus address.
    pub fn get_address(&self) -> Result<u8, Error> {
        self.ensure_initialized()?;
        Ok(self.address)
    }

    /// Inbound frames discarded since startup (bad checksum, foreign
    /// destination, damaged bytes).
    pub fn bad_frames(&self) -> u16 {
        self.reassembler.bad
    }

    /// Transmits a packet and, for non-control packets, waits for the
    /// recipient's acknowledge.
    ///
    /// The header gets a freshly incremented sequence id. Collisions are
    /// retried at the frame-write level (see
    /// [`set_collision_backoff`](Connection::set_collision_backoff)); a
    /// missing acknowledge retries the whole transmission up to
    /// [`SEND_ATTEMPTS`](crate::consts::SEND_ATTEMPTS) times before
    /// [`Error::TimeoutExceeded`].
    ///
    /// [`Status::Check`], [`Status::Acknowledge`], and broadcast packets are
    /// never awaited; for those the call returns as soon as the frame is on
    /// the wire.
    ///
    /// Payloads longer than 255 bytes do not fit the wire length field.
    pub fn send(
        &mut self,
        destination: u8,
        status: Status,
        command: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        self.ensure_initialized()?;
        debug_assert!(data.len() <= MAX_PAYLOAD_LEN_USIZE);

        self.last_id = self.last_id.wrapping_add(1);
        let header = PacketHeader::new(
            destination,
            self.address,
            status,
            command,
            self.last_id,
            data.len() as u8,
        );

        let mut attempts = 0;
        loop {
            let outcome = self
                .write_packet(&header, data)
                .and_then(|()| self.wait_for_acknowledge(&header));
            attempts += 1;
            match outcome {
                Err(Error::TimeoutExceeded) if attempts < SEND_ATTEMPTS => {}
                other => return other,
            }
        }
    }

    /// Sends a request and returns the matching response's payload.
    ///
    /// Requests to [`ADDRESS_BROADCAST`] cannot have a single response; they
    /// return an empty payload as soon as the request is on the wire.
    pub fn get_response(
        &mut self,
        address: u8,
        command: u8,
        request: &[u8],
        timeout: Timeout,
    ) -> Result<Payload, Error> {
        self.ensure_initialized()?;
        self.send(address, Status::Request, command, request)?;
        if address == ADDRESS_BROADCAST {
            return Ok(Payload::new());
        }
        let (_, payload) = self.wait_for_packet(
            Some(address),
            Some(Status::Response),
            Some(command),
            None,
            timeout,
        )?;
        Ok(payload)
    }

    /// Waits for the next request addressed to this node (or broadcast),
    /// from any source and with any command.
    ///
    /// Answer it with [`send_response`](Connection::send_response).
    pub fn get_request(&mut self, timeout: Timeout) -> Result<RequestData, Error> {
        self.ensure_initialized()?;
        let (header, payload) =
            self.wait_for_packet(None, Some(Status::Request), None, None, timeout)?;
        Ok(RequestData {
            source: header.source,
            destination: header.destination,
            command: header.command,
            payload,
        })
    }

    /// Replies to a received request, echoing its command.
    pub fn send_response(&mut self, request: &RequestData, data: &[u8]) -> Result<(), Error> {
        self.ensure_initialized()?;
        self.send(request.source, Status::Response, request.command, data)
    }

    /// Polls the receive slot until a packet passes every given filter, then
    /// consumes and returns it.
    ///
    /// `None` filters match anything. A slot occupant that fails the filters
    /// is left in place for whichever waiter it belongs to (see the module
    /// notes on the resulting starvation hazard). Consuming a packet
    /// acknowledges it back to its source unless it was an acknowledge or a
    /// broadcast.
    pub fn wait_for_packet(
        &mut self,
        source: Option<u8>,
        status: Option<Status>,
        command: Option<u8>,
        id: Option<u8>,
        timeout: Timeout,
    ) -> Result<(PacketHeader, Payload), Error> {
        self.ensure_initialized()?;
        let mut remaining = timeout;
        loop {
            self.pump();
            if let Some((header, payload)) = self.take_matching(source, status, command, id) {
                // A lost acknowledge shows up as the sender's retry, not as a
                // failure of this wait.
                let _ = self.acknowledge(&header);
                return Ok((header, payload));
            }
            match remaining {
                Timeout::Infinite => {}
                Timeout::Ticks(0) => return Err(Error::TimeoutExceeded),
                Timeout::Ticks(ticks) => remaining = Timeout::Ticks(ticks - 1),
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// Feeds one inbound byte from the physical layer.
    ///
    /// `error` reports the byte as damaged (framing fault, sampling fault);
    /// the reassembler then discards the frame it belongs to. The returned
    /// count is the number of subsequent stream bytes the caller must drop
    /// without calling this function, after which parsing resumes on a frame
    /// boundary.
    ///
    /// Completed [`Status::Check`] frames are answered with an acknowledge
    /// straight from this path; that handshake never touches the receive
    /// slot. Any other completed frame is published to the slot if it is
    /// empty and dropped otherwise (the sender times out and retries).
    pub fn process_byte(&mut self, error: Option<PortError>, byte: u8) -> u8 {
        match self.reassembler.push(self.address, error.is_some(), byte) {
            Step::Pending => 0,
            Step::Skip(skip) => skip,
            Step::Complete(header, payload) => {
                self.accept(header, payload);
                0
            }
        }
    }

    /// Routes a completed inbound frame.
    fn accept(&mut self, header: PacketHeader, payload: Payload) {
        if header.status == Status::Check {
            // Answered directly; a check/acknowledge handshake must not
            // trigger a second acknowledge round.
            let _ = self.send(header.source, Status::Acknowledge, COMMAND_NONE, &[]);
        } else if self.slot.is_none() {
            self.slot = Some((header, payload));
        } else {
            #[cfg(feature = "log")]
            log::trace!("receive slot full, dropping packet from {:#04x}", header.source);
        }
    }

    /// Drains every byte the physical layer has pending, honoring skip
    /// counts from rejected frames.
    fn pump(&mut self) {
        loop {
            let read = self.port.read_byte();
            let (error, byte) = match read {
                Ok(byte) => (None, byte),
                Err(nb::Error::Other(error)) => (Some(error), 0),
                Err(nb::Error::WouldBlock) => return,
            };
            if self.pending_skip > 0 {
                self.pending_skip -= 1;
                continue;
            }
            self.pending_skip = self.process_byte(error, byte);
        }
    }

    /// Takes the slot occupant if it passes all filters; leaves it otherwise.
    fn take_matching(
        &mut self,
        source: Option<u8>,
        status: Option<Status>,
        command: Option<u8>,
        id: Option<u8>,
    ) -> Option<(PacketHeader, Payload)> {
        let (header, _) = self.slot.as_ref()?;
        let matches = source.map_or(true, |want| want == header.source)
            && status.map_or(true, |want| want == header.status)
            && command.map_or(true, |want| want == header.command)
            && id.map_or(true, |want| want == header.id);
        if matches { self.slot.take() } else { None }
    }

    /// Acknowledges a consumed packet back to its source, echoing command
    /// and id so the sender can correlate. Broadcasts and acknowledges are
    /// exempt.
    fn acknowledge(&mut self, packet: &PacketHeader) -> Result<(), Error> {
        if packet.destination == ADDRESS_BROADCAST || packet.status == Status::Acknowledge {
            return Ok(());
        }
        let header = PacketHeader::new(
            packet.source,
            self.address,
            Status::Acknowledge,
            packet.command,
            packet.id,
            0,
        );
        self.write_packet(&header, &[])
    }

    /// Waits for the acknowledge matching a just-transmitted packet.
    ///
    /// Control packets and broadcasts are exempt from the acknowledgment
    /// discipline and return immediately.
    fn wait_for_acknowledge(&mut self, sent: &PacketHeader) -> Result<(), Error> {
        if sent.status == Status::Check
            || sent.status == Status::Acknowledge
            || sent.destination == ADDRESS_BROADCAST
        {
            return Ok(());
        }
        self.wait_for_packet(
            Some(sent.destination),
            Some(Status::Acknowledge),
            Some(sent.command),
            Some(sent.id),
            Timeout::Ticks(ACKNOWLEDGE_TIMEOUT_TICKS),
        )
        .map(|_| ())
    }

    /// Puts one frame on the wire, retrying collisions with the configured
    /// back-off.
    fn write_packet(&mut self, header: &PacketHeader, data: &[u8]) -> Result<(), Error> {
        let mut attempts = 0;
        loop {
            let outcome = self
                .port
                .write_bytes(&header.to_wire())
                .and_then(|()| self.port.write_bytes(data));
            attempts += 1;
            match outcome {
                Err(PortError::Collision) if attempts < WRITE_ATTEMPTS => {
                    let pause = (self.backoff)(attempts);
                    if pause > 0 {
                        self.delay.delay_ms(pause);
                    }
                }
                other => return other.map_err(Error::from),
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{ADDRESS_MAX, HEADER_LEN_USIZE};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::vec::Vec;

    /// Captures written bytes and replays a scripted inbound stream.
    #[derive(Debug, Default)]
    struct MockPort {
        written: Vec<u8>,
        inbound: VecDeque<Result<u8, PortError>>,
        write_errors: VecDeque<PortError>,
    }

    impl BusPort for MockPort {
        fn write_byte(&mut self, byte: u8) -> Result<(), PortError> {
            if let Some(err) = self.write_errors.pop_front() {
                return Err(err);
            }
            self.written.push(byte);
            Ok(())
        }

        fn read_byte(&mut self) -> nb::Result<u8, PortError> {
            match self.inbound.pop_front() {
                Some(Ok(byte)) => Ok(byte),
                Some(Err(err)) => Err(nb::Error::Other(err)),
                None => Err(nb::Error::WouldBlock),
            }
        }
    }

    fn initialized() -> Connection<MockPort, NoopDelay> {
        let mut connection = Connection::new(MockPort::default(), NoopDelay::new());
        connection.initialize().unwrap();
        connection.port.written.clear();
        connection
    }

    fn frame(
        destination: u8,
        source: u8,
        status: Status,
        command: u8,
        id: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let header =
            PacketHeader::new(destination, source, status, command, id, payload.len() as u8);
        let mut bytes = header.to_wire().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Feeds a byte stream through `process_byte`, honoring skip counts the
    /// way a bit-transport caller must.
    fn feed(connection: &mut Connection<MockPort, NoopDelay>, bytes: &[u8]) {
        let mut skip = 0u8;
        for &byte in bytes {
            if skip > 0 {
                skip -= 1;
                continue;
            }
            skip = connection.process_byte(None, byte);
        }
    }

    /// Splits captured egress back into (header, payload) frames.
    fn written_frames(bytes: &[u8]) -> Vec<(PacketHeader, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let mut header_bytes = [0u8; HEADER_LEN_USIZE];
            header_bytes.copy_from_slice(&rest[..HEADER_LEN_USIZE]);
            let header = PacketHeader::from_wire(&header_bytes).expect("malformed egress frame");
            let end = HEADER_LEN_USIZE + header.length as usize;
            frames.push((header, rest[HEADER_LEN_USIZE..end].to_vec()));
            rest = &rest[end..];
        }
        frames
    }

    #[test]
    fn test_operations_require_initialization() {
        let mut connection = Connection::new(MockPort::default(), NoopDelay::new());
        assert_eq!(connection.get_address(), Err(Error::NotInitialized));
        assert_eq!(
            connection.send(0x10, Status::Request, 0x21, b"x"),
            Err(Error::NotInitialized)
        );
        assert!(matches!(
            connection.get_request(Timeout::Ticks(0)),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            connection.get_response(0x10, 0x21, b"x", Timeout::Ticks(0)),
            Err(Error::NotInitialized)
        ));
        assert!(connection.port.written.is_empty());
    }

    #[test]
    fn test_initialize_claims_first_address_on_silent_bus() {
        let mut connection = Connection::new(MockPort::default(), NoopDelay::new());
        connection.initialize().unwrap();
        assert_eq!(connection.get_address(), Ok(ADDRESS_MIN));

        // One probe went out: a check for the claimed address, sent while the
        // node still had no address of its own.
        let frames = written_frames(&connection.port.written);
        assert_eq!(frames.len(), 1);
        let (probe, payload) = &frames[0];
        assert_eq!(probe.destination, ADDRESS_MIN);
        assert_eq!(probe.source, ADDRESS_NONE);
        assert_eq!(probe.status, Status::Check);
        assert_eq!(probe.command, COMMAND_NONE);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_initialize_twice_is_a_no_op() {
        let mut connection = initialized();
        connection.initialize().unwrap();
        assert!(connection.port.written.is_empty());
        assert_eq!(connection.get_address(), Ok(ADDRESS_MIN));
    }

    #[test]
    fn test_check_frame_is_acknowledged_directly() {
        let mut connection = initialized();
        feed(
            &mut connection,
            &frame(ADDRESS_MIN, 0x30, Status::Check, COMMAND_NONE, 9, b""),
        );

        let frames = written_frames(&connection.port.written);
        assert_eq!(frames.len(), 1);
        let (ack, _) = &frames[0];
        assert_eq!(ack.destination, 0x30);
        assert_eq!(ack.source, ADDRESS_MIN);
        assert_eq!(ack.status, Status::Acknowledge);
        assert_eq!(ack.command, COMMAND_NONE);
        assert_eq!(ack.length, 0);

        // The handshake never touches the receive slot.
        assert!(matches!(
            connection.wait_for_packet(None, None, None, None, Timeout::Ticks(0)),
            Err(Error::TimeoutExceeded)
        ));
    }

    #[test]
    fn test_request_reaches_get_request_and_is_acknowledged() {
        let mut connection = initialized();
        feed(
            &mut connection,
            &frame(ADDRESS_MIN, 0x30, Status::Request, 0x21, 5, b"hi"),
        );

        let request = connection.get_request(Timeout::Ticks(0)).unwrap();
        assert_eq!(request.source, 0x30);
        assert_eq!(request.destination, ADDRESS_MIN);
        assert_eq!(request.command, 0x21);
        assert_eq!(request.payload.as_slice(), b"hi");

        let frames = written_frames(&connection.port.written);
        assert_eq!(frames.len(), 1);
        let (ack, _) = &frames[0];
        assert_eq!(ack.destination, 0x30);
        assert_eq!(ack.status, Status::Acknowledge);
        assert_eq!(ack.command, 0x21);
        assert_eq!(ack.id, 5);
    }

    #[test]
    fn test_broadcast_request_is_not_acknowledged() {
        let mut connection = initialized();
        feed(
            &mut connection,
            &frame(ADDRESS_BROADCAST, 0x30, Status::Request, 0x21, 5, b"all"),
        );

        let request = connection.get_request(Timeout::Ticks(0)).unwrap();
        assert_eq!(request.destination, ADDRESS_BROADCAST);
        assert!(connection.port.written.is_empty());
    }

    #[test]
    fn test_send_to_unreachable_address_times_out_after_attempts() {
        let mut connection = initialized();
        let result = connection.send(0x40, Status::Request, 0x21, b"x");
        assert_eq!(result, Err(Error::TimeoutExceeded));

        let frames = written_frames(&connection.port.written);
        assert_eq!(frames.len(), SEND_ATTEMPTS as usize);
        // Retries retransmit the same packet, id included.
        assert!(frames.iter().all(|(header, payload)| {
            header.id == frames[0].0.id && payload.as_slice() == b"x"
        }));
    }

    #[test]
    fn test_broadcast_send_returns_immediately() {
        let mut connection = initialized();
        connection
            .send(ADDRESS_BROADCAST, Status::Request, 0x21, b"news")
            .unwrap();
        let frames = written_frames(&connection.port.written);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1.as_slice(), b"news");
    }

    #[test]
    fn test_broadcast_get_response_skips_response_wait() {
        let mut connection = initialized();
        let response = connection
            .get_response(ADDRESS_BROADCAST, 0x21, b"ping", Timeout::Ticks(0))
            .unwrap();
        assert!(response.is_empty());
        assert_eq!(written_frames(&connection.port.written).len(), 1);
    }

    #[test]
    fn test_collision_retries_invoke_backoff_then_succeed() {
        static BACKOFF_CALLS: AtomicU32 = AtomicU32::new(0);
        let mut connection = initialized();
        connection.set_collision_backoff(|_attempt| {
            let _ = BACKOFF_CALLS.fetch_add(1, Ordering::SeqCst);
            0
        });
        connection
            .port
            .write_errors
            .extend([PortError::Collision, PortError::Collision]);

        connection
            .send(ADDRESS_BROADCAST, Status::Request, 0x21, b"x")
            .unwrap();
        assert_eq!(BACKOFF_CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(written_frames(&connection.port.written).len(), 1);
    }

    #[test]
    fn test_collision_exhaustion_fails_the_send() {
        let mut connection = initialized();
        connection.port.write_errors.extend([
            PortError::Collision,
            PortError::Collision,
            PortError::Collision,
        ]);
        let result = connection.send(ADDRESS_BROADCAST, Status::Request, 0x21, b"x");
        assert_eq!(result, Err(Error::CollisionDetected));
    }

    #[test]
    fn test_write_error_surfaces_without_retry() {
        let mut connection = initialized();
        connection.port.write_errors.push_back(PortError::Write);
        let result = connection.send(ADDRESS_BROADCAST, Status::Request, 0x21, b"x");
        assert_eq!(result, Err(Error::WriteError));
    }

    #[test]
    fn test_nonmatching_packet_stays_in_slot() {
        let mut connection = initialized();
        feed(
            &mut connection,
            &frame(ADDRESS_MIN, 0x30, Status::Response, 0x05, 7, b"late"),
        );

        // A waiter with different filters starves rather than draining it.
        assert!(matches!(
            connection.wait_for_packet(Some(0x31), None, None, None, Timeout::Ticks(2)),
            Err(Error::TimeoutExceeded)
        ));

        // The occupant is still there for the waiter it belongs to.
        let (header, payload) = connection
            .wait_for_packet(Some(0x30), Some(Status::Response), Some(0x05), Some(7), Timeout::Ticks(0))
            .unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(payload.as_slice(), b"late");
    }

    #[test]
    fn test_second_arrival_is_dropped_while_slot_full() {
        let mut connection = initialized();
        feed(
            &mut connection,
            &frame(ADDRESS_MIN, 0x30, Status::Request, 0x21, 1, b"first"),
        );
        feed(
            &mut connection,
            &frame(ADDRESS_MIN, 0x30, Status::Request, 0x21, 2, b"second"),
        );

        let request = connection.get_request(Timeout::Ticks(0)).unwrap();
        assert_eq!(request.payload.as_slice(), b"first");
        assert!(matches!(
            connection.get_request(Timeout::Ticks(0)),
            Err(Error::TimeoutExceeded)
        ));
    }

    #[test]
    fn test_pump_drains_port_and_resynchronizes_after_corruption() {
        let mut connection = initialized();

        let mut corrupt = frame(ADDRESS_MIN, 0x30, Status::Response, 0x05, 3, b"bad");
        corrupt[1] ^= 0xFF; // source byte damaged in transit
        let clean = frame(ADDRESS_MIN, 0x30, Status::Request, 0x21, 4, b"good");

        for byte in corrupt.into_iter().chain(clean) {
            connection.port.inbound.push_back(Ok(byte));
        }

        let request = connection.get_request(Timeout::Ticks(0)).unwrap();
        assert_eq!(request.payload.as_slice(), b"good");
        assert_eq!(connection.bad_frames(), 1);
    }

    /// A port wired to its peers through channels, so several nodes can share
    /// one simulated bus across threads.
    #[derive(Debug)]
    struct ChannelPort {
        rx: Receiver<u8>,
        peers: Vec<Sender<u8>>,
    }

    impl BusPort for ChannelPort {
        fn write_byte(&mut self, byte: u8) -> Result<(), PortError> {
            for peer in &self.peers {
                let _ = peer.send(byte);
            }
            Ok(())
        }

        fn read_byte(&mut self) -> nb::Result<u8, PortError> {
            self.rx.try_recv().map_err(|_| nb::Error::WouldBlock)
        }
    }

    #[derive(Debug)]
    struct SleepDelay;

    impl DelayNs for SleepDelay {
        fn delay_ns(&mut self, ns: u32) {
            std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
        }
    }

    fn bus_pair() -> (ChannelPort, ChannelPort) {
        let (to_a, rx_a) = mpsc::channel();
        let (to_b, rx_b) = mpsc::channel();
        (
            ChannelPort { rx: rx_a, peers: vec![to_b] },
            ChannelPort { rx: rx_b, peers: vec![to_a] },
        )
    }

    #[test]
    fn test_two_nodes_claim_distinct_addresses_and_exchange_request_response() {
        let (port_a, port_b) = bus_pair();
        let (ready_tx, ready_rx) = mpsc::channel();

        let server = std::thread::spawn(move || {
            let mut node = Connection::new(port_a, SleepDelay);
            node.initialize().unwrap();
            ready_tx.send(node.get_address().unwrap()).unwrap();

            let request = node.get_request(Timeout::Ticks(2000)).unwrap();
            let reply = node.send_response(&request, b"pong");
            (request, reply)
        });

        let address_a = ready_rx.recv().unwrap();
        let mut node_b = Connection::new(port_b, SleepDelay);
        node_b.initialize().unwrap();
        let address_b = node_b.get_address().unwrap();

        // Claims on a shared bus with staggered startup stay distinct.
        assert_ne!(address_a, address_b);
        assert!((ADDRESS_MIN..=ADDRESS_MAX).contains(&address_a));
        assert!((ADDRESS_MIN..=ADDRESS_MAX).contains(&address_b));

        let response = node_b
            .get_response(address_a, 0x21, b"ping", Timeout::Ticks(2000))
            .unwrap();
        assert_eq!(response.as_slice(), b"pong");

        let (request, reply) = server.join().unwrap();
        assert!(reply.is_ok());
        assert_eq!(request.source, address_b);
        assert_eq!(request.command, 0x21);
        assert_eq!(request.payload.as_slice(), b"ping");
    }
}
