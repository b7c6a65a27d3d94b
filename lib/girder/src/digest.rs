//! SHA-1 content digests, emitted as lowercase hex the way the build host
//! keys its caches.

use sha1::{Digest, Sha1};
use std::fmt::Write as FmtWrite;
use std::io::{self, Read};

const CHUNK_SIZE: usize = 256 * 1024;

/// Renders a raw digest as lowercase hex.
pub fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Streams a reader through SHA-1 in fixed-size chunks and returns the hex
/// digest. File handles passed in are dropped by the caller as soon as this
/// returns.
pub fn stream<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha1::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let count = reader.read(&mut chunk)?;
        if count == 0 {
            break;
        }
        hasher.update(&chunk[..count]);
    }

    Ok(hex(&hasher.finalize()))
}

/// Digest over a sequence of string parts, concatenated without separators.
pub fn concat<'a, I: IntoIterator<Item = &'a str>>(parts: I) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex(&hasher.finalize())
}
