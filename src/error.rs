//! Caller-visible error type for bus operations.

use crate::transport::PortError;
use thiserror::Error;

/// Failures surfaced by [`Connection`](crate::connection::Connection)
/// operations.
///
/// Timeouts are the normal outcome of talking to an unreachable peer and are
/// distinct from the startup failures `NotInitialized` and
/// `NoAddressAvailable`, which block all protocol operations until corrected.
/// Malformed inbound frames and empty-slot polls are handled internally by
/// resynchronization and retry; they never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The connection has not claimed a bus address yet.
    #[error("connection is not initialized")]
    NotInitialized,

    /// Every address in the claimable range answered the probe.
    #[error("no bus address available")]
    NoAddressAvailable,

    /// The awaited packet did not arrive within the timeout.
    #[error("timeout exceeded")]
    TimeoutExceeded,

    /// The bus reported colliding transmissions for every write attempt.
    #[error("collision detected on the bus")]
    CollisionDetected,

    /// The physical layer failed to clock a byte onto the line.
    #[error("bus write failed")]
    WriteError,
}

impl From<PortError> for Error {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Collision => Error::CollisionDetected,
            PortError::Write => Error::WriteError,
        }
    }
}
