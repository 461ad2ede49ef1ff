//! # Codec - Delta Record Encoding
//!
//! The storage engine treats the byte-level compressor as a pure function
//! behind the [`Codec`] trait: no I/O, no shared state, safe to call from any
//! thread. Every encoded record carries its [`Tag`]:
//!
//! ```text
//! Tag::Keyframe   wire 0   full content, decoded against an empty base
//! Tag::Back(n)    wire n   diff against the version n sequences back
//! ```
//!
//! [`DiffCodec`] is the bundled implementation: a framed copy/insert diff
//! with a CRC32 over the reconstructed content. See [`format`] for the wire
//! layout.
//!
//! ## Example
//!
//! ```rust
//! use codec::{Codec, DiffCodec, Tag};
//!
//! let codec = DiffCodec::new();
//! let base = b"the quick brown fox jumps over the lazy dog".to_vec();
//! let target = b"the quick brown cat jumps over the lazy dog".to_vec();
//!
//! let delta = codec.encode(Tag::Back(1), &base, &target, false).unwrap();
//! assert_eq!(codec.tag_of(&delta).unwrap(), Tag::Back(1));
//! assert_eq!(codec.decode(&base, &delta).unwrap(), target);
//! ```
use std::fmt;

use thiserror::Error;

mod diff;
pub mod format;

pub use diff::DiffCodec;

/// Which base a delta record was encoded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// Full snapshot against an empty base.
    Keyframe,
    /// Diff against the version `n` sequences back (`n >= 1`).
    Back(u16),
}

impl Tag {
    /// Builds a back-reference tag; `None` for a distance of zero.
    #[must_use]
    pub fn back(distance: u16) -> Option<Tag> {
        (distance > 0).then_some(Tag::Back(distance))
    }

    #[must_use]
    pub fn from_wire(raw: u16) -> Tag {
        match raw {
            0 => Tag::Keyframe,
            n => Tag::Back(n),
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u16 {
        match self {
            Tag::Keyframe => 0,
            Tag::Back(n) => n,
        }
    }

    #[must_use]
    pub fn is_keyframe(self) -> bool {
        matches!(self, Tag::Keyframe | Tag::Back(0))
    }

    /// Sequence of the base this record was encoded against, if any.
    ///
    /// `None` for keyframes and for distances reaching below sequence 1.
    #[must_use]
    pub fn base_seq(self, seq: u64) -> Option<u64> {
        match self {
            Tag::Keyframe | Tag::Back(0) => None,
            Tag::Back(n) => seq.checked_sub(u64::from(n)).filter(|s| *s >= 1),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Keyframe => write!(f, "KEYFRAME"),
            Tag::Back(n) => write!(f, "-{n}"),
        }
    }
}

/// Errors raised while reading a stored delta record.
///
/// Every variant means the stored bytes are unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The record ended before a header field or op was complete.
    #[error("delta record truncated")]
    Truncated,

    /// The record does not start with the expected magic byte.
    #[error("bad delta magic: {0:#04x}")]
    BadMagic(u8),

    /// An op code outside the known set.
    #[error("unknown delta op: {0:#04x}")]
    UnknownOp(u8),

    /// A copy op referenced bytes outside the base.
    #[error("copy [{offset}, +{len}) outside base of {base_len} bytes")]
    CopyOutOfRange { offset: u32, len: u32, base_len: usize },

    /// The reconstructed content has the wrong length.
    #[error("reconstructed {actual} bytes, header says {expected}")]
    LengthMismatch { expected: u32, actual: usize },

    /// The reconstructed content failed CRC validation.
    #[error("content checksum mismatch")]
    ChecksumMismatch,
}

/// Byte-level delta compressor.
///
/// Implementations must be pure: no I/O, no interior mutability visible
/// across calls. Buffers returned to the caller are owned by it.
pub trait Codec: Send + Sync {
    /// Encodes `target` against `base` under `tag`.
    ///
    /// For [`Tag::Keyframe`] the base is ignored. Returns `None` if this
    /// candidate cannot be encoded; the caller then tries others.
    fn encode(&self, tag: Tag, base: &[u8], target: &[u8], extra_pass: bool) -> Option<Vec<u8>>;

    /// Reconstructs the target from `base` and a record produced by
    /// [`encode`](Codec::encode).
    fn decode(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Reads the tag embedded in a record.
    fn tag_of(&self, delta: &[u8]) -> Result<Tag, CodecError>;
}

#[cfg(test)]
mod tests;
