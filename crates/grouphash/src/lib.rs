//! # GroupHash - Group Key Fingerprinting
//!
//! Every delta-compressed table partitions its rows into *groups*. All rows
//! sharing a group key form one version chain ordered by a 1-based sequence
//! number. The caches, the staging buffer and the chain resolver never look at
//! the key itself: they work with a 128-bit fingerprint, the [`GroupHash`].
//!
//! ## Canonical bytes
//!
//! The fingerprint is computed over the *decoded* content of the key, never
//! over a transient address or a particular storage encoding:
//!
//! ```text
//! Null                      -> GroupHash::ZERO (the single implicit group)
//! Bool / IntN / Float64     -> raw little-endian bits (floats canonicalised)
//! Uuid                      -> the 16 bytes
//! Text / Bytes / Inline     -> the bytes as-is
//! Compressed / External     -> Detoast::decompress / fetch_external, then bytes
//! ```
//!
//! so `Text("abc")`, `Varlena::Inline(b"abc")` and a compressed or
//! out-of-line copy of the same bytes all produce the same hash.
//!
//! ## Example
//!
//! ```rust
//! use grouphash::{GroupKeyHasher, KeyValue, GroupHash};
//!
//! let hasher = GroupKeyHasher::inline_only();
//! let h = hasher.hash(&KeyValue::Text("sensor-7".into())).unwrap();
//! assert_ne!(h, GroupHash::ZERO);
//! assert_eq!(hasher.hash(&KeyValue::Null).unwrap(), GroupHash::ZERO);
//! ```
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

/// Identifier of a delta-compressed table (relation).
pub type TableId = u32;

/// 1-based version number within a group. `0` is never a valid sequence.
pub type Seq = u64;

/// 128-bit fingerprint of a group key, stored as two 64-bit halves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GroupHash {
    hi: u64,
    lo: u64,
}

impl GroupHash {
    /// Fingerprint of the null / absent group key.
    pub const ZERO: GroupHash = GroupHash { hi: 0, lo: 0 };

    #[must_use]
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    #[must_use]
    pub const fn from_u128(v: u128) -> Self {
        Self {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }

    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        ((self.hi as u128) << 64) | self.lo as u128
    }

    #[must_use]
    pub const fn hi(&self) -> u64 {
        self.hi
    }

    #[must_use]
    pub const fn lo(&self) -> u64 {
        self.lo
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }
}

impl fmt::Debug for GroupHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupHash({:016x}{:016x})", self.hi, self.lo)
    }
}

impl fmt::Display for GroupHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// Folds the table id and both hash halves into one 64-bit key for an
/// external per-group advisory lock.
///
/// This crate does not take the lock; writers of the same `(table, group)`
/// are expected to hold it around sequence allocation and staging writes.
#[must_use]
pub fn lock_id(table: TableId, group: GroupHash) -> u64 {
    group.hi ^ group.lo ^ u64::from(table)
}

/// Handle to a value stored out of line by the row-storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalRef {
    /// Identifier of the out-of-line value in its side store.
    pub value_id: u64,
    /// Decoded length in bytes, used to sanity-check the fetched value.
    pub raw_len: u32,
}

/// Variable-length datum as the row-storage layer hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Varlena {
    /// Plain bytes stored in the row.
    Inline(Vec<u8>),
    /// Bytes compressed in place by the row-storage layer.
    Compressed(Vec<u8>),
    /// Pointer to a value stored elsewhere.
    External(ExternalRef),
}

/// A group-column datum.
///
/// A table's group column has one type, so two variants of different width
/// (e.g. `Int32(5)` and `Int64(5)`) are not expected to meet in one table and
/// do not hash equal.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Uuid([u8; 16]),
    Text(String),
    Bytes(Vec<u8>),
    Varlena(Varlena),
}

/// Error type returned by [`Detoast`] implementations.
pub type DetoastError = Box<dyn StdError + Send + Sync>;

/// Resolves indirect variable-length values to their canonical bytes.
///
/// Supplied by the row-storage layer, which owns the compression format and
/// the side store for out-of-line values.
pub trait Detoast {
    /// Decompresses an in-row compressed value.
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, DetoastError>;

    /// Fetches an out-of-line value.
    fn fetch_external(&self, reference: &ExternalRef) -> Result<Vec<u8>, DetoastError>;
}

impl<T: Detoast + ?Sized> Detoast for Arc<T> {
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, DetoastError> {
        (**self).decompress(payload)
    }

    fn fetch_external(&self, reference: &ExternalRef) -> Result<Vec<u8>, DetoastError> {
        (**self).fetch_external(reference)
    }
}

/// A [`Detoast`] for callers whose keys are always inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineOnly;

impl Detoast for InlineOnly {
    fn decompress(&self, _payload: &[u8]) -> Result<Vec<u8>, DetoastError> {
        Err("compressed group keys are not supported".into())
    }

    fn fetch_external(&self, _reference: &ExternalRef) -> Result<Vec<u8>, DetoastError> {
        Err("out-of-line group keys are not supported".into())
    }
}

/// Errors raised while fingerprinting a group key.
#[derive(Debug, Error)]
pub enum HashError {
    /// The compressed or out-of-line value could not be resolved.
    #[error("failed to resolve group key: {0}")]
    Detoast(#[source] DetoastError),

    /// An out-of-line value resolved to a different length than recorded.
    #[error("out-of-line group key length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },
}

/// Computes [`GroupHash`] fingerprints for group keys.
#[derive(Debug, Clone, Default)]
pub struct GroupKeyHasher<D = InlineOnly> {
    detoast: D,
}

impl GroupKeyHasher<InlineOnly> {
    /// A hasher that rejects compressed and out-of-line keys.
    #[must_use]
    pub fn inline_only() -> Self {
        Self { detoast: InlineOnly }
    }
}

impl<D: Detoast> GroupKeyHasher<D> {
    pub fn new(detoast: D) -> Self {
        Self { detoast }
    }

    /// Fingerprints a group key.
    ///
    /// `KeyValue::Null` maps to [`GroupHash::ZERO`]. A non-null key never
    /// maps to zero, so the null group stays distinct from every other.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if an indirect value cannot be resolved.
    pub fn hash(&self, value: &KeyValue) -> Result<GroupHash, HashError> {
        let h = match value {
            KeyValue::Null => return Ok(GroupHash::ZERO),
            KeyValue::Bool(b) => hash_bytes(&[u8::from(*b)]),
            KeyValue::Int16(v) => hash_bytes(&v.to_le_bytes()),
            KeyValue::Int32(v) => hash_bytes(&v.to_le_bytes()),
            KeyValue::Int64(v) => hash_bytes(&v.to_le_bytes()),
            KeyValue::Float64(v) => hash_bytes(&canonical_f64_bits(*v).to_le_bytes()),
            KeyValue::Uuid(bytes) => hash_bytes(bytes),
            KeyValue::Text(s) => hash_bytes(s.as_bytes()),
            KeyValue::Bytes(b) => hash_bytes(b),
            KeyValue::Varlena(v) => self.hash_varlena(v)?,
        };
        Ok(h)
    }

    fn hash_varlena(&self, value: &Varlena) -> Result<GroupHash, HashError> {
        match value {
            Varlena::Inline(bytes) => Ok(hash_bytes(bytes)),
            Varlena::Compressed(payload) => {
                let raw = self
                    .detoast
                    .decompress(payload)
                    .map_err(HashError::Detoast)?;
                Ok(hash_bytes(&raw))
            }
            Varlena::External(reference) => {
                let raw = self
                    .detoast
                    .fetch_external(reference)
                    .map_err(HashError::Detoast)?;
                if raw.len() != reference.raw_len as usize {
                    return Err(HashError::LengthMismatch {
                        expected: reference.raw_len,
                        actual: raw.len(),
                    });
                }
                Ok(hash_bytes(&raw))
            }
        }
    }
}

/// Fingerprints already-canonical key bytes.
///
/// The zero hash is reserved for the null group; a zero digest is remapped.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> GroupHash {
    match xxh3_128(bytes) {
        0 => GroupHash::new(0, 1),
        v => GroupHash::from_u128(v),
    }
}

/// `-0.0` folds onto `+0.0` and every NaN onto the canonical quiet NaN.
fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

#[cfg(test)]
mod tests;
