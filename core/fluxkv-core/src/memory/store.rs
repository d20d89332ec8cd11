//! Multi-version ordered store.
//!
//! Backed by a lock-free `SkipMap` keyed by [`VersionedKey`]. Every commit
//! writes new entries at its version; nothing is updated in place. A read at
//! version `v` sees, per key, the newest entry at or below `v`. A `None`
//! value is a tombstone.

use crate::types::{KeyRange, KeyValue, Version};
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;

/// User key plus the version that wrote it.
///
/// Ordered by key ascending, then version descending, so the newest version
/// of a key is met first during a forward scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionedKey {
    pub(crate) key: Bytes,
    pub(crate) version: Version,
}

impl VersionedKey {
    pub(crate) fn new(key: Bytes, version: Version) -> Self {
        Self { key, version }
    }
}

impl PartialOrd for VersionedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            // Descending: higher versions first
            Ordering::Equal => other.version.cmp(&self.version),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub(crate) struct VersionedStore {
    entries: SkipMap<VersionedKey, Option<Bytes>>,
}

impl VersionedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Write `value` (or a tombstone) for `key` at `version`. A second write
    /// at the same version replaces the first.
    pub(crate) fn put(&self, key: Bytes, version: Version, value: Option<Bytes>) {
        self.entries.insert(VersionedKey::new(key, version), value);
    }

    /// Value of `key` as of `version`.
    pub(crate) fn get(&self, key: &[u8], version: Version) -> Option<Bytes> {
        let seek = VersionedKey::new(Bytes::copy_from_slice(key), version);
        let entry = self.entries.range(seek..).next()?;
        if entry.key().key.as_ref() != key {
            return None;
        }
        entry.value().clone()
    }

    /// Live pairs in `range` as of `version`, ascending.
    pub(crate) fn scan(&self, range: &KeyRange, version: Version) -> Vec<KeyValue> {
        if range.is_empty() {
            return Vec::new();
        }
        let lo = VersionedKey::new(range.begin().clone(), Version::MAX);
        let hi = VersionedKey::new(range.end().clone(), Version::MAX);

        let entries: Vec<_> = self.entries.range(lo..hi).collect();
        let mut out = Vec::new();
        let mut decided: Option<&Bytes> = None;
        for entry in &entries {
            let vk = entry.key();
            if vk.version > version || decided == Some(&vk.key) {
                continue;
            }
            decided = Some(&vk.key);
            if let Some(value) = entry.value() {
                out.push(KeyValue::new(vk.key.clone(), value.clone()));
            }
        }
        out
    }

    /// Drop versions no reader at or above `horizon` can see.
    ///
    /// Per key, everything at or above the horizon stays, plus the newest
    /// entry below it unless that entry is a tombstone. Returns the number of
    /// entries removed.
    pub(crate) fn collect_garbage(&self, horizon: Version) -> usize {
        let mut doomed = Vec::new();
        let mut floor_seen: Option<Bytes> = None;
        for entry in self.entries.iter() {
            let vk = entry.key();
            if vk.version >= horizon {
                continue;
            }
            if floor_seen.as_ref() == Some(&vk.key) {
                doomed.push(vk.clone());
                continue;
            }
            floor_seen = Some(vk.key.clone());
            if entry.value().is_none() {
                doomed.push(vk.clone());
            }
        }
        for vk in &doomed {
            self.entries.remove(vk);
        }
        doomed.len()
    }

    /// Number of stored versions across all keys.
    #[cfg(test)]
    pub(crate) fn version_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_versioned_key_ordering() {
        let newer = VersionedKey::new(b("k"), 200);
        let older = VersionedKey::new(b("k"), 100);
        assert!(newer < older);
        assert!(VersionedKey::new(b("a"), 1) < VersionedKey::new(b("b"), 9));
    }

    #[test]
    fn test_get_sees_newest_at_or_below() {
        let store = VersionedStore::new();
        store.put(b("k"), 1, Some(b("v1")));
        store.put(b("k"), 5, Some(b("v5")));
        store.put(b("k"), 9, None);

        assert_eq!(store.get(b"k", 0), None);
        assert_eq!(store.get(b"k", 1), Some(b("v1")));
        assert_eq!(store.get(b"k", 7), Some(b("v5")));
        assert_eq!(store.get(b"k", 9), None);
        assert_eq!(store.get(b"j", 9), None);
    }

    #[test]
    fn test_scan_collapses_versions() {
        let store = VersionedStore::new();
        store.put(b("a"), 1, Some(b("a1")));
        store.put(b("b"), 1, Some(b("b1")));
        store.put(b("b"), 3, None);
        store.put(b("c"), 2, Some(b("c2")));
        store.put(b("d"), 1, Some(b("d1")));

        let range = KeyRange::new(b("a"), b("d")).unwrap();
        let at2: Vec<_> = store.scan(&range, 2).into_iter().map(|kv| kv.key).collect();
        assert_eq!(at2, vec![b("a"), b("b"), b("c")]);

        let at3: Vec<_> = store.scan(&range, 3).into_iter().map(|kv| kv.key).collect();
        assert_eq!(at3, vec![b("a"), b("c")]);
    }

    #[test]
    fn test_garbage_collection_keeps_visible_floor() {
        let store = VersionedStore::new();
        store.put(b("k"), 1, Some(b("v1")));
        store.put(b("k"), 2, Some(b("v2")));
        store.put(b("k"), 6, Some(b("v6")));
        store.put(b("gone"), 1, Some(b("x")));
        store.put(b("gone"), 2, None);

        let removed = store.collect_garbage(5);
        assert_eq!(removed, 3);
        assert_eq!(store.get(b"k", 5), Some(b("v2")));
        assert_eq!(store.get(b"k", 6), Some(b("v6")));
        assert_eq!(store.get(b"gone", 5), None);
        assert_eq!(store.version_count(), 2);
    }
}
