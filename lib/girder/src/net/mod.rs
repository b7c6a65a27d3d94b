//! The connection engine: one background worker multiplexing every open
//! connection through readiness selection, with per-connection queues and
//! main-thread notification fan-out.

use crate::proto::ProtoError;
use std::io;
use std::sync::Arc;

pub mod connection;
pub mod frame;
pub mod manager;

pub use self::connection::{Connection, ConnectionId};
pub use self::manager::ConnectionManager;

/// Events delivered to a connection's observer, in the order they were
/// raised. `Closed` is always last and arrives exactly once.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Notification {
    /// A connection attempt is under way.
    Connecting,
    /// The connection attempt succeeded.
    Connected,
    /// The connection attempt failed at the socket level.
    ConnectionFailed,
    /// A decoded message is waiting in the inbound queue.
    Message,
    /// Socket write failure after connecting.
    SendError,
    /// Socket read or decode failure after connecting.
    RecvError,
    /// The connection is gone, gracefully or otherwise.
    Closed,
}

/// Observer callback registered at connection creation. Runs on the host's
/// main thread via the injected dispatch, never on the I/O worker.
pub type Observer = Box<dyn Fn(&Arc<Connection>, Notification) + Send + Sync>;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetError {
    /// Not enough data or buffer space right now; try again later.
    Wait,
    /// The connection is beyond saving.
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    /// A frame header announced a payload beyond the sanity bound.
    PayloadTooLarge,
    /// The peer sent bytes the codec would not accept.
    Proto(ProtoError),
    /// The host name did not resolve to any usable address.
    AddrResolve,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetError::Wait,
            kind => NetError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<ProtoError> for NetError {
    #[inline]
    fn from(proto_error: ProtoError) -> Self {
        NetError::Fatal(ErrorType::Proto(proto_error))
    }
}
