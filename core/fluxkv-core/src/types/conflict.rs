//! ConflictSet: read and write conflict ranges a transaction has touched.

use super::range::KeyRange;

/// Which side of the resolver check a range participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    Read,
    Write,
}

/// Conflict ranges in submission order.
///
/// Purely additive while the transaction lives; only a reset empties it.
/// Implicit ranges (from reads and writes) and explicit ones land in the same
/// lists; the resolver does not distinguish them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    reads: Vec<KeyRange>,
    writes: Vec<KeyRange>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty ranges carry no conflict and are skipped.
    pub fn add(&mut self, kind: ConflictKind, range: KeyRange) {
        if range.is_empty() {
            return;
        }
        match kind {
            ConflictKind::Read => self.reads.push(range),
            ConflictKind::Write => self.writes.push(range),
        }
    }

    pub fn add_key(&mut self, kind: ConflictKind, key: &[u8]) {
        self.add(kind, KeyRange::single_key(key));
    }

    pub fn reads(&self) -> &[KeyRange] {
        &self.reads
    }

    pub fn writes(&self) -> &[KeyRange] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    /// True if any read range intersects any of `committed_writes`.
    pub fn reads_intersect(&self, committed_writes: &[KeyRange]) -> bool {
        self.reads
            .iter()
            .any(|read| committed_writes.iter().any(|write| read.intersects(write)))
    }

    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }
}
