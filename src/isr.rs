//! Interrupt-context plumbing for the byte entry point.
//!
//! The reassembly path must run for every inbound byte, and on most targets
//! the byte is assembled inside a timer or edge interrupt. This module holds
//! the `critical-section` glue for sharing one
//! [`Connection`](crate::connection::Connection) between that ISR and the
//! thread-mode code issuing the blocking operations.
//!
//! The ISR hands each byte to [`global_process_byte`] and discards as many
//! following bytes as the call returns, without re-entering it. Platforms
//! that would rather keep their ISR minimal can skip this module entirely:
//! enqueue raw bytes in the ISR and let the blocking operations drain them
//! through [`BusPort::read_byte`](crate::transport::BusPort::read_byte).

use crate::connection::Connection;
use crate::transport::{BusPort, PortError};
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

/// Used to initialize the global static `Connection` for use with
/// `critical_section`.
///
/// # Returns
/// * An empty mutable ref-cell
///
/// # Example
/// ```rust,ignore
/// use wirebus::connection::Connection;
/// use wirebus::isr::global_connection_init;
/// use core::cell::RefCell;
/// use critical_section::Mutex;
/// use some_hal::{LinePort, TickDelay};
///
/// static BUS: Mutex<RefCell<Option<Connection<LinePort, TickDelay>>>> =
///     global_connection_init::<LinePort, TickDelay>();
/// ```
pub const fn global_connection_init<P: BusPort, D: DelayNs>()
-> Mutex<RefCell<Option<Connection<P, D>>>> {
    Mutex::new(RefCell::new(None))
}

/// Places a connection into the global static declared with
/// [`global_connection_init`].
///
/// # Arguments
/// * The global static connection slot
/// * The bus port
/// * The delay provider pacing the blocking operations
pub fn global_connection_setup<P: BusPort, D: DelayNs>(
    global: &'static Mutex<RefCell<Option<Connection<P, D>>>>,
    port: P,
    delay: D,
) {
    critical_section::with(|cs| {
        let _ = global.borrow(cs).replace(Some(Connection::new(port, delay)));
    });
}

/// Feeds one inbound byte to the global connection from an ISR.
///
/// Returns the number of subsequent bytes the ISR must discard without
/// calling back in; returns 0 when the connection has not been set up yet.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIM2() {
///     let byte = read_line_byte();
///     SKIP.set(match SKIP.get() {
///         0 => global_process_byte(&BUS, None, byte),
///         n => n - 1,
///     });
/// }
/// ```
pub fn global_process_byte<P: BusPort, D: DelayNs>(
    global: &'static Mutex<RefCell<Option<Connection<P, D>>>>,
    error: Option<PortError>,
    byte: u8,
) -> u8 {
    critical_section::with(|cs| {
        match global.borrow(cs).borrow_mut().as_mut() {
            Some(connection) => connection.process_byte(error, byte),
            None => 0,
        }
    })
}

/// Declares a static global `BUS_CONNECTION` protected by a
/// `critical_section` mutex.
///
/// # Arguments
/// - `$port`: The concrete type of the bus port (must implement `BusPort`)
/// - `$delay`: The concrete type of the delay provider (must implement
///   `DelayNs`)
///
/// # Example
/// ```rust,ignore
/// init_bus_connection!(LinePort, TickDelay);
/// ```
#[macro_export]
macro_rules! init_bus_connection {
    ( $port:ty, $delay:ty ) => {
        pub static BUS_CONNECTION: $crate::critical_section::Mutex<
            core::cell::RefCell<Option<$crate::connection::Connection<$port, $delay>>>,
        > = $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
    };
}

/// Feeds one byte to the `BUS_CONNECTION` declared with
/// [`init_bus_connection!`], evaluating to the skip count.
///
/// Safe to call before setup; it evaluates to 0 until a connection is
/// placed into the global.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIM2() {
///     let skip = bus_process_byte!(None, read_line_byte());
///     // discard `skip` following bytes before calling again
/// }
/// ```
#[macro_export]
macro_rules! bus_process_byte {
    ( $error:expr, $byte:expr ) => {
        $crate::critical_section::with(|cs| {
            match BUS_CONNECTION.borrow(cs).borrow_mut().as_mut() {
                Some(connection) => connection.process_byte($error, $byte),
                None => 0,
            }
        })
    };
}
