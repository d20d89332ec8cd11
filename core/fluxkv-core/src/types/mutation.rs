//! Buffered mutations.

use super::range::KeyRange;
use crate::error::{FluxError, FluxResult};
use bytes::Bytes;

/// Atomic operations applied by the engine at commit without a prior read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Little-endian integer addition
    Add,
    BitAnd,
    BitOr,
    BitXor,
    /// Append unless the result would exceed the value size limit
    AppendIfFits,
    /// Little-endian unsigned maximum
    Max,
    /// Little-endian unsigned minimum
    Min,
    /// Key template completed with the commit versionstamp
    SetVersionstampedKey,
    /// Value template completed with the commit versionstamp
    SetVersionstampedValue,
    /// Lexicographic minimum
    ByteMin,
    /// Lexicographic maximum
    ByteMax,
    /// Clear the key if its value equals the operand
    CompareAndClear,
}

impl MutationType {
    pub fn code(&self) -> i32 {
        match self {
            MutationType::Add => 2,
            MutationType::BitAnd => 6,
            MutationType::BitOr => 7,
            MutationType::BitXor => 8,
            MutationType::AppendIfFits => 9,
            MutationType::Max => 12,
            MutationType::Min => 13,
            MutationType::SetVersionstampedKey => 14,
            MutationType::SetVersionstampedValue => 15,
            MutationType::ByteMin => 16,
            MutationType::ByteMax => 17,
            MutationType::CompareAndClear => 20,
        }
    }

    pub fn from_code(code: i32) -> FluxResult<Self> {
        Ok(match code {
            2 => MutationType::Add,
            6 => MutationType::BitAnd,
            7 => MutationType::BitOr,
            8 => MutationType::BitXor,
            9 => MutationType::AppendIfFits,
            12 => MutationType::Max,
            13 => MutationType::Min,
            14 => MutationType::SetVersionstampedKey,
            15 => MutationType::SetVersionstampedValue,
            16 => MutationType::ByteMin,
            17 => MutationType::ByteMax,
            20 => MutationType::CompareAndClear,
            other => return Err(FluxError::InvalidMutationType(other)),
        })
    }

    pub fn is_versionstamp(&self) -> bool {
        matches!(
            self,
            MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue
        )
    }
}

/// One buffered write, kept in submission order until commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: Bytes, value: Bytes },
    Clear { key: Bytes },
    ClearRange(KeyRange),
    Atomic {
        key: Bytes,
        operand: Bytes,
        op: MutationType,
    },
}

impl Mutation {
    /// Bytes counted against the transaction size limit.
    pub fn byte_size(&self) -> usize {
        match self {
            Mutation::Set { key, value } => key.len() + value.len(),
            Mutation::Clear { key } => key.len(),
            Mutation::ClearRange(range) => range.begin().len() + range.end().len(),
            Mutation::Atomic { key, operand, .. } => key.len() + operand.len(),
        }
    }

    /// The written key, when the mutation targets exactly one.
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            Mutation::Set { key, .. } | Mutation::Clear { key } | Mutation::Atomic { key, .. } => {
                Some(key)
            }
            Mutation::ClearRange(_) => None,
        }
    }
}
