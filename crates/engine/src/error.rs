//! Typed failures surfaced by the engine.
//!
//! Cache misses, full caches, stolen staging slots and missing chain bases are
//! all absorbed where they happen. Only a stored record the codec cannot read
//! aborts an operation; it is reported as [`ChainError::Corruption`] inside
//! the returned `anyhow::Error`, so callers can tell it apart with
//! `err.downcast_ref::<ChainError>()`.
use codec::CodecError;
use grouphash::{GroupHash, Seq, TableId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// A stored delta record failed to decode.
    #[error("corrupt delta record: table {table}, group {group}, seq {seq}, column {column}")]
    Corruption {
        table: TableId,
        group: GroupHash,
        seq: Seq,
        column: usize,
        #[source]
        source: CodecError,
    },
}
