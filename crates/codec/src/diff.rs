use std::collections::HashMap;

use crate::format::{
    checksum, read_header, write_header, write_op, Header, Op, OpReader, COPY_OP_BYTES,
    HEADER_BYTES, INSERT_OP_OVERHEAD,
};
use crate::{Codec, CodecError, Tag};

/// Width of the anchor used to find match candidates in the base.
const ANCHOR: usize = 4;

/// Shortest run worth a COPY op (a COPY costs 9 bytes on the wire).
const DEFAULT_MIN_MATCH: usize = 12;

/// Upper bound on the capacity reserved from an untrusted header.
const MAX_PREALLOC: usize = 1 << 20;

/// Copy/insert byte diff.
///
/// The encoder indexes every 4-byte window of the base by its first
/// occurrence, then walks the target greedily. At each position it first
/// tries the base offset lined up with the previous copy, then the window
/// index; a run of at least `min_match` bytes becomes a COPY, everything else
/// accumulates into INSERT literals. The extra pass also tries a single prefix/suffix trim
/// (good for in-place edits of large values) and keeps the smaller result.
#[derive(Debug, Clone, Copy)]
pub struct DiffCodec {
    min_match: usize,
}

impl DiffCodec {
    pub fn new() -> Self {
        Self {
            min_match: DEFAULT_MIN_MATCH,
        }
    }

    /// Overrides the shortest run encoded as a COPY.
    pub fn with_min_match(min_match: usize) -> Self {
        Self {
            min_match: min_match.max(ANCHOR),
        }
    }
}

impl Default for DiffCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for DiffCodec {
    fn encode(&self, tag: Tag, base: &[u8], target: &[u8], extra_pass: bool) -> Option<Vec<u8>> {
        let target_len = u32::try_from(target.len()).ok()?;
        u32::try_from(base.len()).ok()?;

        let ops = if tag.is_keyframe() {
            literal_ops(target)
        } else {
            let greedy = anchor_ops(base, target, self.min_match);
            if extra_pass {
                let trimmed = trim_ops(base, target);
                if encoded_len(&trimmed) < encoded_len(&greedy) {
                    trimmed
                } else {
                    greedy
                }
            } else {
                greedy
            }
        };

        let mut out = Vec::with_capacity(encoded_len(&ops));
        let header = Header {
            tag,
            target_len,
            crc: checksum(target),
        };
        // Writes into a Vec cannot fail.
        write_header(&mut out, &header).ok()?;
        for op in &ops {
            write_op(&mut out, op).ok()?;
        }
        Some(out)
    }

    fn decode(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (header, ops) = read_header(delta)?;
        let base: &[u8] = if header.tag.is_keyframe() { &[] } else { base };
        let expected = header.target_len as usize;

        let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC));
        for op in OpReader::new(ops) {
            match op? {
                Op::Copy { offset, len } => {
                    let start = offset as usize;
                    let end = start
                        .checked_add(len as usize)
                        .filter(|end| *end <= base.len())
                        .ok_or(CodecError::CopyOutOfRange {
                            offset,
                            len,
                            base_len: base.len(),
                        })?;
                    out.extend_from_slice(&base[start..end]);
                }
                Op::Insert(bytes) => out.extend_from_slice(bytes),
            }
            if out.len() > expected {
                return Err(CodecError::LengthMismatch {
                    expected: header.target_len,
                    actual: out.len(),
                });
            }
        }

        if out.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected: header.target_len,
                actual: out.len(),
            });
        }
        if checksum(&out) != header.crc {
            return Err(CodecError::ChecksumMismatch);
        }
        Ok(out)
    }

    fn tag_of(&self, delta: &[u8]) -> Result<Tag, CodecError> {
        read_header(delta).map(|(header, _)| header.tag)
    }
}

fn encoded_len(ops: &[Op<'_>]) -> usize {
    HEADER_BYTES
        + ops
            .iter()
            .map(|op| match op {
                Op::Copy { .. } => COPY_OP_BYTES,
                Op::Insert(bytes) => INSERT_OP_OVERHEAD + bytes.len(),
            })
            .sum::<usize>()
}

fn literal_ops(target: &[u8]) -> Vec<Op<'_>> {
    if target.is_empty() {
        Vec::new()
    } else {
        vec![Op::Insert(target)]
    }
}

fn window(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn anchor_ops<'t>(base: &[u8], target: &'t [u8], min_match: usize) -> Vec<Op<'t>> {
    if base.len() < ANCHOR || target.len() < ANCHOR {
        return literal_ops(target);
    }

    let mut index: HashMap<u32, u32> = HashMap::with_capacity(base.len());
    for at in 0..=base.len() - ANCHOR {
        index.entry(window(base, at)).or_insert(at as u32);
    }

    let mut ops = Vec::new();
    let mut literal_start = 0;
    // Base offset lined up with `literal_start`; pending literals are assumed
    // to overwrite the same number of base bytes.
    let mut base_cursor = 0;
    let mut pos = 0;
    while pos + ANCHOR <= target.len() {
        let aligned = base_cursor + (pos - literal_start);
        let mut found = None;
        if aligned < base.len() {
            let len = common_prefix(&base[aligned..], &target[pos..]);
            if len >= min_match {
                found = Some((aligned, len));
            }
        }
        if found.is_none() {
            if let Some(&offset) = index.get(&window(target, pos)) {
                let len = common_prefix(&base[offset as usize..], &target[pos..]);
                if len >= min_match {
                    found = Some((offset as usize, len));
                }
            }
        }

        match found {
            Some((offset, len)) => {
                if literal_start < pos {
                    ops.push(Op::Insert(&target[literal_start..pos]));
                }
                ops.push(Op::Copy {
                    offset: offset as u32,
                    len: len as u32,
                });
                pos += len;
                literal_start = pos;
                base_cursor = offset + len;
            }
            None => pos += 1,
        }
    }
    if literal_start < target.len() {
        ops.push(Op::Insert(&target[literal_start..]));
    }
    ops
}

fn trim_ops<'t>(base: &[u8], target: &'t [u8]) -> Vec<Op<'t>> {
    let prefix = common_prefix(base, target);
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(target[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut ops = Vec::with_capacity(3);
    if prefix > 0 {
        ops.push(Op::Copy {
            offset: 0,
            len: prefix as u32,
        });
    }
    let middle = &target[prefix..target.len() - suffix];
    if !middle.is_empty() {
        ops.push(Op::Insert(middle));
    }
    if suffix > 0 {
        ops.push(Op::Copy {
            offset: (base.len() - suffix) as u32,
            len: suffix as u32,
        });
    }
    ops
}
