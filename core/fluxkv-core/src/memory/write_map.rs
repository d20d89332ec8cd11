//! Read-your-writes overlay.
//!
//! Holds what a transaction has written but not committed, in a form reads
//! can merge over the committed snapshot. Cleared ranges hide committed keys;
//! point entries override them; atomic ops stack on top of whatever the
//! snapshot holds.

use super::atomic;
use crate::error::{FluxError, FluxResult};
use crate::types::{KeyRange, KeyValue, MutationType};
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    /// Final value known locally; `None` for a cleared key
    Value(Option<Bytes>),
    /// Ops to apply over the snapshot value, in submission order
    Atomic(SmallVec<[(MutationType, Bytes); 2]>),
    /// Value depends on the commit versionstamp
    Unreadable,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WriteMap {
    entries: BTreeMap<Bytes, PendingWrite>,
    cleared: Vec<KeyRange>,
}

impl WriteMap {
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.cleared.is_empty()
    }

    pub(crate) fn contains_write(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key) || self.is_cleared(key)
    }

    fn is_cleared(&self, key: &[u8]) -> bool {
        self.cleared.iter().any(|range| range.contains(key))
    }

    pub(crate) fn set(&mut self, key: Bytes, value: Bytes) {
        self.entries.insert(key, PendingWrite::Value(Some(value)));
    }

    pub(crate) fn clear(&mut self, key: Bytes) {
        self.entries.insert(key, PendingWrite::Value(None));
    }

    pub(crate) fn clear_range(&mut self, range: &KeyRange) {
        if range.is_empty() {
            return;
        }
        let doomed: Vec<Bytes> = self
            .entries
            .range::<[u8], _>((
                Bound::Included(range.begin().as_ref()),
                Bound::Excluded(range.end().as_ref()),
            ))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.entries.remove(&key);
        }
        self.cleared.push(range.clone());
    }

    pub(crate) fn atomic(&mut self, key: Bytes, op: MutationType, operand: Bytes) {
        let cleared = self.is_cleared(&key);
        let entry = self.entries.entry(key);
        match entry {
            std::collections::btree_map::Entry::Occupied(mut slot) => match slot.get_mut() {
                PendingWrite::Value(value) => {
                    *value = atomic::apply(op, value.as_deref(), &operand);
                }
                PendingWrite::Atomic(ops) => ops.push((op, operand)),
                PendingWrite::Unreadable => {}
            },
            std::collections::btree_map::Entry::Vacant(slot) => {
                if cleared {
                    slot.insert(PendingWrite::Value(atomic::apply(op, None, &operand)));
                } else {
                    slot.insert(PendingWrite::Atomic(SmallVec::from_elem((op, operand), 1)));
                }
            }
        }
    }

    /// The key's value now depends on the commit versionstamp.
    pub(crate) fn mark_unreadable(&mut self, key: Bytes) {
        self.entries.insert(key, PendingWrite::Unreadable);
    }

    /// Value of `key` as this transaction sees it; `snapshot` supplies the
    /// committed value when the overlay does not settle it.
    pub(crate) fn read<F>(&self, key: &[u8], snapshot: F) -> FluxResult<Option<Bytes>>
    where
        F: FnOnce() -> Option<Bytes>,
    {
        match self.entries.get(key) {
            Some(PendingWrite::Value(value)) => Ok(value.clone()),
            Some(PendingWrite::Unreadable) => Err(FluxError::AccessedUnreadable),
            Some(PendingWrite::Atomic(ops)) => Ok(fold(ops, snapshot())),
            None if self.is_cleared(key) => Ok(None),
            None => Ok(snapshot()),
        }
    }

    /// True when a key in `range` only gets its value at commit.
    pub(crate) fn has_unreadable(&self, range: &KeyRange) -> bool {
        self.entries
            .range::<[u8], _>((
                Bound::Included(range.begin().as_ref()),
                Bound::Excluded(range.end().as_ref()),
            ))
            .any(|(_, write)| matches!(write, PendingWrite::Unreadable))
    }

    /// Merge the overlay over `committed`, the ascending snapshot of `range`.
    ///
    /// Unreadable keys are left out; callers that return rows check
    /// [`has_unreadable`](Self::has_unreadable) on the span they return.
    pub(crate) fn merge_range(&self, range: &KeyRange, committed: Vec<KeyValue>) -> Vec<KeyValue> {
        if self.is_empty() {
            return committed;
        }
        let mut merged: BTreeMap<Bytes, Bytes> = committed
            .into_iter()
            .filter(|kv| !self.is_cleared(&kv.key))
            .map(|kv| (kv.key, kv.value))
            .collect();

        let overlay = self.entries.range::<[u8], _>((
            Bound::Included(range.begin().as_ref()),
            Bound::Excluded(range.end().as_ref()),
        ));
        for (key, write) in overlay {
            let value = match write {
                PendingWrite::Value(value) => value.clone(),
                PendingWrite::Atomic(ops) => fold(ops, merged.get(key).cloned()),
                PendingWrite::Unreadable => None,
            };
            match value {
                Some(value) => merged.insert(key.clone(), value),
                None => merged.remove(key),
            };
        }
        merged
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect()
    }
}

fn fold(ops: &[(MutationType, Bytes)], base: Option<Bytes>) -> Option<Bytes> {
    ops.iter()
        .fold(base, |value, (op, operand)| atomic::apply(*op, value.as_deref(), operand))
}
