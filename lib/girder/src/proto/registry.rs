//! Registry mapping message kinds to their decoders. The standard table is
//! assembled once at startup and read-only afterwards; separate instances can
//! be built for endpoints that speak a restricted or extended dialect.

use crate::proto::message::{
    Acknowledge, BuildComplete, BuildOutput, ErrorReport, ExecuteBuild, FileContent, Introduction,
    Message, Notice, SetBuild,
};
use crate::proto::{wire, ProtoError, ProtoResult};
use hashbrown::HashMap;
use lazy_static::lazy_static;
use std::io::Cursor;

type DecodeFn = fn(&mut Cursor<&[u8]>) -> ProtoResult<Message>;

pub struct Registry {
    decoders: HashMap<u16, DecodeFn>,
}

impl Registry {
    /// An empty registry with no kinds wired in.
    pub fn new() -> Registry {
        Registry {
            decoders: HashMap::new(),
        }
    }

    /// The full standard message table.
    pub fn standard() -> Registry {
        const TABLE: &[(u16, DecodeFn)] = &[
            (Introduction::KIND, Introduction::decode_body),
            (Notice::KIND, Notice::decode_body),
            (ErrorReport::KIND, ErrorReport::decode_body),
            (SetBuild::KIND, SetBuild::decode_body),
            (Acknowledge::KIND, Acknowledge::decode_body),
            (FileContent::KIND, FileContent::decode_body),
            (ExecuteBuild::KIND, ExecuteBuild::decode_body),
            (BuildOutput::KIND, BuildOutput::decode_body),
            (BuildComplete::KIND, BuildComplete::decode_body),
        ];

        let mut registry = Registry::new();
        for &(kind, decode) in TABLE {
            registry
                .register(kind, decode)
                .expect("Standard message kinds must not collide");
        }

        registry
    }

    /// Registers a decoder for a kind. Claiming a kind twice is a programmer
    /// error and is reported rather than silently overwritten.
    pub fn register(&mut self, kind: u16, decode: DecodeFn) -> ProtoResult<()> {
        if self.decoders.contains_key(&kind) {
            return Err(ProtoError::DuplicateKind(kind));
        }

        self.decoders.insert(kind, decode);
        Ok(())
    }

    /// Decodes a payload: reads the kind tag off the front and dispatches to
    /// the registered decoder. The body must consume the payload exactly.
    pub fn decode(&self, payload: &[u8]) -> ProtoResult<Message> {
        let mut cursor = Cursor::new(payload);
        let kind = wire::get_u16(&mut cursor)?;

        let decode = self
            .decoders
            .get(&kind)
            .ok_or(ProtoError::UnknownKind(kind))?;

        let message = decode(&mut cursor)?;
        wire::expect_end(&cursor)?;

        Ok(message)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::standard()
    }
}

lazy_static! {
    static ref STANDARD: Registry = Registry::standard();
}

/// Decodes a payload against the standard message table.
#[inline]
pub fn decode(payload: &[u8]) -> ProtoResult<Message> {
    STANDARD.decode(payload)
}

/// Encodes a message into its wire payload: the kind tag followed by the
/// body. The outer frame length is the transport's business.
pub fn encode(message: &Message) -> ProtoResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    wire::put_u16(&mut buf, message.kind());
    message.encode_body(&mut buf)?;

    Ok(buf)
}
