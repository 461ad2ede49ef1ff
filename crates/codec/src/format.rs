//! Delta record wire format.
//!
//! ```text
//! [magic: u8 = 0xD7][tag: u16 LE][target_len: u32 LE][crc32(target): u32 LE][ops ...]
//! ```
//!
//! Ops (all integers little-endian):
//!
//! ```text
//! COPY   [0x01][offset: u32][len: u32]   append base[offset .. offset + len]
//! INSERT [0x02][len: u32][bytes]         append the literal bytes
//! ```
//!
//! The CRC covers the reconstructed target, so a decode against the wrong
//! base is detected rather than silently returning garbage.
use std::io::{self, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::{CodecError, Tag};

/// First byte of every delta record.
pub const DELTA_MAGIC: u8 = 0xD7;

/// Size of the fixed header: magic + tag + target_len + crc.
pub const HEADER_BYTES: usize = 1 + 2 + 4 + 4;

pub const OP_COPY: u8 = 0x01;
pub const OP_INSERT: u8 = 0x02;

/// Encoded size of a COPY op.
pub const COPY_OP_BYTES: usize = 1 + 4 + 4;

/// Encoded size of an INSERT op without its payload.
pub const INSERT_OP_OVERHEAD: usize = 1 + 4;

/// Fixed header of a delta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub target_len: u32,
    pub crc: u32,
}

/// One reconstruction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op<'a> {
    Copy { offset: u32, len: u32 },
    Insert(&'a [u8]),
}

/// CRC32 of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn write_header<W: Write>(w: &mut W, header: &Header) -> io::Result<()> {
    w.write_u8(DELTA_MAGIC)?;
    w.write_u16::<LittleEndian>(header.tag.to_wire())?;
    w.write_u32::<LittleEndian>(header.target_len)?;
    w.write_u32::<LittleEndian>(header.crc)?;
    Ok(())
}

pub fn write_op<W: Write>(w: &mut W, op: &Op<'_>) -> io::Result<()> {
    match op {
        Op::Copy { offset, len } => {
            w.write_u8(OP_COPY)?;
            w.write_u32::<LittleEndian>(*offset)?;
            w.write_u32::<LittleEndian>(*len)?;
        }
        Op::Insert(bytes) => {
            w.write_u8(OP_INSERT)?;
            w.write_u32::<LittleEndian>(bytes.len() as u32)?;
            w.write_all(bytes)?;
        }
    }
    Ok(())
}

/// Parses the header and returns it with the remaining op bytes.
pub fn read_header(record: &[u8]) -> Result<(Header, &[u8]), CodecError> {
    if record.len() < HEADER_BYTES {
        return Err(CodecError::Truncated);
    }
    let mut r = record;
    let magic = r.read_u8().map_err(|_| CodecError::Truncated)?;
    if magic != DELTA_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let tag = Tag::from_wire(r.read_u16::<LittleEndian>().map_err(|_| CodecError::Truncated)?);
    let target_len = r.read_u32::<LittleEndian>().map_err(|_| CodecError::Truncated)?;
    let crc = r.read_u32::<LittleEndian>().map_err(|_| CodecError::Truncated)?;
    Ok((
        Header {
            tag,
            target_len,
            crc,
        },
        r,
    ))
}

/// Iterator over the ops following a header.
pub struct OpReader<'a> {
    rest: &'a [u8],
}

impl<'a> OpReader<'a> {
    pub fn new(ops: &'a [u8]) -> Self {
        Self { rest: ops }
    }

    fn read_op(&mut self) -> Result<Op<'a>, CodecError> {
        let code = self.rest.read_u8().map_err(|_| CodecError::Truncated)?;
        match code {
            OP_COPY => {
                let offset = self
                    .rest
                    .read_u32::<LittleEndian>()
                    .map_err(|_| CodecError::Truncated)?;
                let len = self
                    .rest
                    .read_u32::<LittleEndian>()
                    .map_err(|_| CodecError::Truncated)?;
                Ok(Op::Copy { offset, len })
            }
            OP_INSERT => {
                let len = self
                    .rest
                    .read_u32::<LittleEndian>()
                    .map_err(|_| CodecError::Truncated)? as usize;
                if len > self.rest.len() {
                    return Err(CodecError::Truncated);
                }
                let (bytes, rest) = self.rest.split_at(len);
                self.rest = rest;
                Ok(Op::Insert(bytes))
            }
            other => Err(CodecError::UnknownOp(other)),
        }
    }
}

impl<'a> Iterator for OpReader<'a> {
    type Item = Result<Op<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let op = self.read_op();
        if op.is_err() {
            self.rest = &[];
        }
        Some(op)
    }
}
