//! Atomic mutation semantics.
//!
//! Integer ops read both sides as little-endian unsigned integers of the
//! operand's width: a shorter existing value is zero-extended, a longer one
//! truncated. A missing value behaves as zero for `Add` and as "take the
//! operand" for everything else.

use crate::error::{FluxError, FluxResult};
use crate::types::{MutationType, VERSIONSTAMP_LEN, Versionstamp};
use bytes::Bytes;
use std::cmp::Ordering;

/// Largest value the engine stores.
pub const VALUE_SIZE_LIMIT: usize = 100_000;

/// Largest key the engine stores.
pub const KEY_SIZE_LIMIT: usize = 10_000;

/// New value of a key after `op`; `None` clears it.
///
/// Versionstamp ops are completed into plain sets before they reach here.
pub(crate) fn apply(op: MutationType, existing: Option<&[u8]>, operand: &[u8]) -> Option<Bytes> {
    let Some(existing) = existing else {
        return match op {
            MutationType::Add => Some(add(&[], operand)),
            MutationType::CompareAndClear => None,
            _ => Some(Bytes::copy_from_slice(operand)),
        };
    };

    let value = match op {
        MutationType::Add => add(existing, operand),
        MutationType::BitAnd => bitwise(existing, operand, |a, b| a & b),
        MutationType::BitOr => bitwise(existing, operand, |a, b| a | b),
        MutationType::BitXor => bitwise(existing, operand, |a, b| a ^ b),
        MutationType::AppendIfFits => {
            if existing.len() + operand.len() > VALUE_SIZE_LIMIT {
                Bytes::copy_from_slice(existing)
            } else {
                [existing, operand].concat().into()
            }
        }
        MutationType::Max => pick_int(existing, operand, Ordering::Greater),
        MutationType::Min => pick_int(existing, operand, Ordering::Less),
        MutationType::ByteMax => Bytes::copy_from_slice(existing.max(operand)),
        MutationType::ByteMin => Bytes::copy_from_slice(existing.min(operand)),
        MutationType::CompareAndClear => {
            if existing == operand {
                return None;
            }
            Bytes::copy_from_slice(existing)
        }
        MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue => {
            Bytes::copy_from_slice(operand)
        }
    };
    Some(value)
}

fn widened(existing: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let n = existing.len().min(width);
    out[..n].copy_from_slice(&existing[..n]);
    out
}

fn add(existing: &[u8], operand: &[u8]) -> Bytes {
    let mut out = widened(existing, operand.len());
    let mut carry = 0u16;
    for (slot, &b) in out.iter_mut().zip(operand) {
        let sum = u16::from(*slot) + u16::from(b) + carry;
        *slot = sum as u8;
        carry = sum >> 8;
    }
    out.into()
}

fn bitwise(existing: &[u8], operand: &[u8], f: impl Fn(u8, u8) -> u8) -> Bytes {
    let mut out = widened(existing, operand.len());
    for (slot, &b) in out.iter_mut().zip(operand) {
        *slot = f(*slot, b);
    }
    out.into()
}

/// Little-endian comparison: most significant byte last.
fn cmp_le(a: &[u8], b: &[u8]) -> Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

fn pick_int(existing: &[u8], operand: &[u8], keep_operand_when: Ordering) -> Bytes {
    let current = widened(existing, operand.len());
    if cmp_le(operand, &current) == keep_operand_when {
        Bytes::copy_from_slice(operand)
    } else {
        current.into()
    }
}

/// Check a versionstamp template: a 4-byte little-endian offset suffix that
/// leaves room for the stamp inside the body.
pub(crate) fn validate_template(template: &[u8]) -> FluxResult<()> {
    template_offset(template).map(|_| ())
}

fn template_offset(template: &[u8]) -> FluxResult<(usize, &[u8])> {
    let invalid = || {
        FluxError::invalid_operation(
            "versionstamp offset does not fit the template",
            format!("template of {} bytes", template.len()),
        )
    };
    let split = template.len().checked_sub(4).ok_or_else(invalid)?;
    let (body, suffix) = template.split_at(split);
    let mut raw = [0u8; 4];
    raw.copy_from_slice(suffix);
    let offset = u32::from_le_bytes(raw) as usize;
    if offset + VERSIONSTAMP_LEN > body.len() {
        return Err(invalid());
    }
    Ok((offset, body))
}

/// Write `stamp` into the template and strip the offset suffix.
pub(crate) fn fill_versionstamp(template: &[u8], stamp: &Versionstamp) -> FluxResult<Bytes> {
    let (offset, body) = template_offset(template)?;
    let mut out = body.to_vec();
    out[offset..offset + VERSIONSTAMP_LEN].copy_from_slice(stamp.as_bytes());
    Ok(out.into())
}
