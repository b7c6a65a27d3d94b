//! The wire protocol spoken with the build host. Every message is a typed
//! record with a numeric kind; payloads are self describing and the decoder
//! dispatches through a registry keyed on the kind. Framing (the outer length
//! prefix) is the transport's job and lives in `net::frame`.

use std::io;

pub mod message;
pub mod registry;
mod wire;

pub use self::message::{
    Acknowledge, BuildComplete, BuildOutput, ErrorReport, ExecuteBuild, FileContent, Introduction,
    Message, Notice, SetBuild,
};
pub use self::registry::{decode, encode, Registry};

/// Protocol revision announced in the introduction handshake.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProtoError {
    /// The decoder saw a kind with no registered message type.
    UnknownKind(u16),
    /// Two message types claimed the same kind at registration time.
    DuplicateKind(u16),
    /// A value does not fit its fixed-width wire field. Overlong input is
    /// rejected outright rather than silently truncated.
    FieldTooLong {
        field: &'static str,
        limit: usize,
        actual: usize,
    },
    /// The payload ended before the message did.
    Truncated,
    /// Bytes were left over after the message body.
    TrailingData,
    /// A string field did not hold valid UTF-8.
    Utf8,
    Io(io::ErrorKind),
}

impl From<io::Error> for ProtoError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        ProtoError::Io(io_error.kind())
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
