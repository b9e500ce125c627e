//! Binary encoding primitives for block templates
//!
//! Varints are LEB128 (7 bits per byte, high bit set on every byte but the
//! last). Fixed-width integers are little-endian.

use crate::{Error, Hash, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Longest valid encoding of a u64 varint
const MAX_VARINT_LEN: usize = 10;

/// Upper bound on element counts read from untrusted input
pub const MAX_ARRAY_LEN: u64 = 1 << 20;

/// Write a LEB128 varint
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> Result<()> {
    while value >= 0x80 {
        writer.write_u8((value as u8 & 0x7f) | 0x80)?;
        value >>= 7;
    }
    writer.write_u8(value as u8)?;
    Ok(())
}

/// Read a LEB128 varint, rejecting overlong and non-canonical encodings
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;

    for index in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().map_err(truncated)?;
        let shift = 7 * index as u32;
        let bits = (byte & 0x7f) as u64;

        if shift == 63 && bits > 1 {
            return Err(Error::serialization("Varint overflows u64"));
        }
        value |= bits << shift;

        if byte & 0x80 == 0 {
            if byte == 0 && index > 0 {
                return Err(Error::serialization("Non-canonical varint encoding"));
            }
            return Ok(value);
        }
    }

    Err(Error::serialization("Varint is too long"))
}

/// Encoded size of a varint
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read a varint that must fit in a u8
pub fn read_varint_u8<R: Read>(reader: &mut R, field: &str) -> Result<u8> {
    let value = read_varint(reader)?;
    u8::try_from(value)
        .map_err(|_| Error::serialization(format!("{} out of range: {}", field, value)))
}

/// Read a collection length, bounded by [`MAX_ARRAY_LEN`]
pub fn read_len<R: Read>(reader: &mut R, field: &str) -> Result<usize> {
    let len = read_varint(reader)?;
    if len > MAX_ARRAY_LEN {
        return Err(Error::serialization(format!(
            "{} length {} exceeds limit {}",
            field, len, MAX_ARRAY_LEN
        )));
    }
    Ok(len as usize)
}

pub fn write_hash<W: Write>(writer: &mut W, hash: &Hash) -> Result<()> {
    writer.write_all(hash.as_bytes())?;
    Ok(())
}

pub fn read_hash<R: Read>(reader: &mut R) -> Result<Hash> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes).map_err(truncated)?;
    Ok(Hash::new(bytes))
}

/// Write a length-prefixed list of hashes
pub fn write_hashes<W: Write>(writer: &mut W, hashes: &[Hash]) -> Result<()> {
    write_varint(writer, hashes.len() as u64)?;
    for hash in hashes {
        write_hash(writer, hash)?;
    }
    Ok(())
}

/// Read a length-prefixed list of hashes
pub fn read_hashes<R: Read>(reader: &mut R, field: &str) -> Result<Vec<Hash>> {
    let len = read_len(reader, field)?;
    let mut hashes = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        hashes.push(read_hash(reader)?);
    }
    Ok(hashes)
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_u32::<LittleEndian>(value)?;
    Ok(())
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    reader.read_u32::<LittleEndian>().map_err(truncated)
}

/// Write a length-prefixed byte string
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    write_varint(writer, bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Read a length-prefixed byte string
pub fn read_bytes<R: Read>(reader: &mut R, field: &str) -> Result<Vec<u8>> {
    let len = read_len(reader, field)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(truncated)?;
    Ok(bytes)
}

fn truncated(error: std::io::Error) -> Error {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::serialization("Unexpected end of data")
    } else {
        Error::Io(error)
    }
}
