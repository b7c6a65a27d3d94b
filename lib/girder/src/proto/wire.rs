//! Field-level primitives shared by the message codecs. Integers are big
//! endian; strings are UTF-8, either length-prefixed or stored in fixed-width
//! NUL-padded fields.

use crate::proto::{ProtoError, ProtoResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

#[inline]
pub(crate) fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

#[inline]
pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.write_u16::<BigEndian>(value).expect("in-memory write");
}

#[inline]
pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.write_u32::<BigEndian>(value).expect("in-memory write");
}

#[inline]
pub(crate) fn put_bool(buf: &mut Vec<u8>, value: bool) {
    buf.push(value as u8);
}

/// Writes a string into a fixed-width field, right-padded with NUL bytes.
/// Values longer than the field are an error, not a truncation.
pub(crate) fn put_fixed_str(
    buf: &mut Vec<u8>,
    field: &'static str,
    value: &str,
    width: usize,
) -> ProtoResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(ProtoError::FieldTooLong {
            field,
            limit: width,
            actual: bytes.len(),
        });
    }

    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (width - bytes.len()), 0);
    Ok(())
}

/// Writes a length-prefixed UTF-8 string (u32 length, then the bytes).
pub(crate) fn put_str(buf: &mut Vec<u8>, field: &'static str, value: &str) -> ProtoResult<()> {
    put_blob(buf, field, value.as_bytes())
}

/// Writes a length-prefixed opaque byte block.
pub(crate) fn put_blob(buf: &mut Vec<u8>, field: &'static str, value: &[u8]) -> ProtoResult<()> {
    if value.len() > u32::max_value() as usize {
        return Err(ProtoError::FieldTooLong {
            field,
            limit: u32::max_value() as usize,
            actual: value.len(),
        });
    }

    put_u32(buf, value.len() as u32);
    buf.extend_from_slice(value);
    Ok(())
}

#[inline]
pub(crate) fn get_u8(cursor: &mut Cursor<&[u8]>) -> ProtoResult<u8> {
    cursor.read_u8().map_err(|_| ProtoError::Truncated)
}

#[inline]
pub(crate) fn get_u16(cursor: &mut Cursor<&[u8]>) -> ProtoResult<u16> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|_| ProtoError::Truncated)
}

#[inline]
pub(crate) fn get_u32(cursor: &mut Cursor<&[u8]>) -> ProtoResult<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| ProtoError::Truncated)
}

#[inline]
pub(crate) fn get_bool(cursor: &mut Cursor<&[u8]>) -> ProtoResult<bool> {
    Ok(get_u8(cursor)? != 0)
}

#[inline]
pub(crate) fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len() as u64;
    (len - cursor.position().min(len)) as usize
}

fn take(cursor: &mut Cursor<&[u8]>, count: usize) -> ProtoResult<Vec<u8>> {
    if remaining(cursor) < count {
        return Err(ProtoError::Truncated);
    }

    let start = cursor.position() as usize;
    let bytes = cursor.get_ref()[start..start + count].to_vec();
    cursor.set_position((start + count) as u64);
    Ok(bytes)
}

/// Reads a fixed-width string field and strips its trailing NUL padding.
pub(crate) fn get_fixed_str(cursor: &mut Cursor<&[u8]>, width: usize) -> ProtoResult<String> {
    let mut raw = take(cursor, width)?;
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |idx| idx + 1);
    raw.truncate(end);

    String::from_utf8(raw).map_err(|_| ProtoError::Utf8)
}

/// Reads a length-prefixed UTF-8 string.
pub(crate) fn get_str(cursor: &mut Cursor<&[u8]>) -> ProtoResult<String> {
    String::from_utf8(get_blob(cursor)?).map_err(|_| ProtoError::Utf8)
}

/// Reads a length-prefixed opaque byte block.
pub(crate) fn get_blob(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Vec<u8>> {
    let len = get_u32(cursor)? as usize;
    take(cursor, len)
}

/// Decoding must consume the payload exactly.
pub(crate) fn expect_end(cursor: &Cursor<&[u8]>) -> ProtoResult<()> {
    match remaining(cursor) {
        0 => Ok(()),
        _ => Err(ProtoError::TrailingData),
    }
}
