//! # wirebus
//!
//! A portable, no_std packet protocol engine for a shared single-wire bus
//! connecting several microcontrollers, with no central arbiter on the bus.
//!
//! The crate implements the protocol layer only:
//! - dynamic address self-assignment by probing the bus at startup
//! - framed packets with an XOR header checksum
//! - acknowledged delivery with bounded retry and timeouts
//! - a single-slot receive mailbox with synchronous request/response calls
//! - byte-at-a-time frame reassembly designed to be fed from an interrupt
//!
//! The bit-level physical layer (line driving, bit sampling, collision
//! detection) stays behind the [`transport::BusPort`] trait, so the engine
//! runs unchanged on top of a bit-banged pin, a UART, or a test double.
//!
//! ## Crate features
//! | Feature         | Description |
//! |-----------------|-------------|
//! | `std`           | Disables `#![no_std]` support and replaces `heapless::Vec`s with `std::vec::Vec`s |
//! | `isr` (default) | `critical-section` helpers for driving the byte entry point from an ISR |
//! | `defmt-0-3`     | Uses `defmt` logging |
//! | `log`           | Uses `log` logging |
//!
//! ## Usage
//!
//! ```rust
//! # use wirebus::connection::{Connection, Timeout};
//! # use wirebus::transport::{BusPort, PortError};
//! # struct SilentPort;
//! # impl BusPort for SilentPort {
//! #     fn write_byte(&mut self, _byte: u8) -> Result<(), PortError> {
//! #         Ok(())
//! #     }
//! #     fn read_byte(&mut self) -> nb::Result<u8, PortError> {
//! #         Err(nb::Error::WouldBlock)
//! #     }
//! # }
//! # struct NoDelay;
//! # impl embedded_hal::delay::DelayNs for NoDelay {
//! #     fn delay_ns(&mut self, _ns: u32) {}
//! # }
//! let mut connection = Connection::new(SilentPort, NoDelay);
//! connection.initialize()?;
//!
//! let address = connection.get_address()?;
//! match connection.get_request(Timeout::Ticks(10)) {
//!     Ok(request) => connection.send_response(&request, b"pong")?,
//!     Err(wirebus::error::Error::TimeoutExceeded) => {} // nothing asked
//!     Err(err) => return Err(err),
//! }
//! # assert_eq!(address, wirebus::consts::ADDRESS_MIN);
//! # Ok::<(), wirebus::error::Error>(())
//! ```
//!
//! ## Integration Notes
//!
//! - Inbound bytes reach the engine through
//!   [`connection::Connection::process_byte`], either pumped out of
//!   [`transport::BusPort::read_byte`] by the blocking calls or invoked
//!   directly from a platform ISR (see [`isr`] with the default `isr`
//!   feature).
//! - Blocking operations poll at a fixed interval paced by an
//!   [`embedded_hal::delay::DelayNs`]; timing precision only affects timeout
//!   granularity, not protocol correctness.
//! - Exactly one [`connection::Connection`] must exist per node: it owns the
//!   receive slot every operation synchronizes on.
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded
//! environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "isr")]
pub use critical_section;

#[cfg(not(feature = "std"))]
pub use heapless;

pub(crate) mod checksum;
pub mod connection;
pub mod consts;
pub mod error;
#[cfg(feature = "isr")]
pub mod isr;
pub mod packet;
pub(crate) mod reassembler;
pub mod transport;
