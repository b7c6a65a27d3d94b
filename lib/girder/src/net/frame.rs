//! Length-prefixed framing. Every block on the wire is a big-endian u32
//! payload length followed by exactly that many payload bytes.

use crate::net::{ErrorType, NetError, NetResult};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

pub const HEADER_SIZE: usize = 4;

// Sanity bound on a single payload. Anything bigger is taken as stream
// corruption rather than a legitimate message.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Wraps an encoded payload in its wire frame.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(HEADER_SIZE + payload.len());
    block
        .write_u32::<BigEndian>(payload.len() as u32)
        .expect("in-memory write");
    block.extend_from_slice(payload);

    block
}

/// The stateful half of framing: accumulates whatever byte chunks the socket
/// hands over and splits complete payloads back out, however the chunk
/// boundaries fell.
pub struct Unframer {
    buffer: Vec<u8>,
    expected: Option<usize>,
}

impl Unframer {
    pub fn new() -> Unframer {
        Unframer {
            buffer: Vec::new(),
            expected: None,
        }
    }

    /// Appends freshly received bytes.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Takes the next complete payload out of the buffer, or `None` when more
    /// bytes are needed. Call repeatedly; a single chunk can complete several
    /// frames.
    pub fn next_payload(&mut self) -> NetResult<Option<Vec<u8>>> {
        if self.expected.is_none() {
            if self.buffer.len() < HEADER_SIZE {
                return Ok(None);
            }

            let length = BigEndian::read_u32(&self.buffer[..HEADER_SIZE]) as usize;
            if length > MAX_PAYLOAD {
                return Err(NetError::Fatal(ErrorType::PayloadTooLarge));
            }

            self.buffer.drain(..HEADER_SIZE);
            self.expected = Some(length);
        }

        match self.expected {
            Some(length) if self.buffer.len() >= length => {
                let payload: Vec<u8> = self.buffer.drain(..length).collect();
                self.expected = None;
                Ok(Some(payload))
            }
            _ => Ok(None),
        }
    }

    /// Discards all partial state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.expected = None;
    }

    /// True when no partial frame is pending.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.expected.is_none()
    }
}

impl Default for Unframer {
    fn default() -> Unframer {
        Unframer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn drain(unframer: &mut Unframer) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        while let Some(payload) = unframer.next_payload().unwrap() {
            payloads.push(payload);
        }
        payloads
    }

    #[test]
    fn test_roundtrip() {
        let payload = b"hello frame".to_vec();
        let block = frame(&payload);

        assert_eq!(block.len(), HEADER_SIZE + payload.len());
        assert_eq!(&block[..4], &[0, 0, 0, 11]);

        let mut unframer = Unframer::new();
        unframer.extend(&block);

        assert_eq!(drain(&mut unframer), vec![payload]);
        assert!(unframer.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let block = frame(&[]);
        let mut unframer = Unframer::new();
        unframer.extend(&block);

        assert_eq!(drain(&mut unframer), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_split_across_fixed_chunks() {
        // Two adjacent frames of payload lengths 10 and 20, delivered in
        // chunks of 3, 3, 3, 1, 4, 10 and 10 bytes.
        let first = vec![1u8; 10];
        let second = vec![2u8; 20];

        let mut wire = frame(&first);
        wire.extend_from_slice(&frame(&second));
        assert_eq!(wire.len(), 38);

        let mut unframer = Unframer::new();
        let mut payloads = Vec::new();
        let mut offset = 0;

        for chunk in &[3usize, 3, 3, 1, 4, 10, 10] {
            unframer.extend(&wire[offset..offset + chunk]);
            offset += chunk;
            payloads.extend(drain(&mut unframer));
        }

        assert_eq!(payloads, vec![first, second]);
        assert!(unframer.is_empty());
    }

    #[test]
    fn test_split_across_random_chunks() {
        let mut rng = StdRng::seed_from_u64(0x6f2c);

        let originals: Vec<Vec<u8>> = (0..20)
            .map(|_| {
                let len = rng.gen_range(0..200);
                (0..len).map(|_| rng.gen()).collect()
            })
            .collect();

        let mut wire = Vec::new();
        for payload in &originals {
            wire.extend_from_slice(&frame(payload));
        }

        let mut unframer = Unframer::new();
        let mut payloads = Vec::new();
        let mut offset = 0;

        while offset < wire.len() {
            let chunk = rng.gen_range(1..=7).min(wire.len() - offset);
            unframer.extend(&wire[offset..offset + chunk]);
            offset += chunk;
            payloads.extend(drain(&mut unframer));
        }

        assert_eq!(payloads, originals);
        assert!(unframer.is_empty());
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let mut header = Vec::new();
        header
            .write_u32::<BigEndian>((MAX_PAYLOAD + 1) as u32)
            .unwrap();

        let mut unframer = Unframer::new();
        unframer.extend(&header);

        assert_eq!(
            unframer.next_payload().unwrap_err(),
            NetError::Fatal(ErrorType::PayloadTooLarge)
        );
    }

    #[test]
    fn test_clear_resets_partial_state() {
        let mut unframer = Unframer::new();
        unframer.extend(&frame(b"partial")[..6]);

        assert_eq!(unframer.next_payload().unwrap(), None);
        assert!(!unframer.is_empty());

        unframer.clear();
        assert!(unframer.is_empty());
        assert_eq!(unframer.next_payload().unwrap(), None);
    }
}
