//! KeySelector: ordinal key lookups relative to a reference key.

use super::key_after;
use bytes::Bytes;
use std::ops::{Add, Sub};

/// End-of-keyspace marker returned when a selector resolves past the last key.
pub const KEYSPACE_END: &[u8] = b"\xff";

/// "The key at `offset` positions from the last key that is `<` (or `<=`
/// when `or_equal`) the reference key."
///
/// | constructor | or_equal | offset |
/// |-------------|----------|--------|
/// | `last_less_than` | false | 0 |
/// | `last_less_or_equal` | true | 0 |
/// | `first_greater_than` | true | 1 |
/// | `first_greater_or_equal` | false | 1 |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySelector {
    key: Bytes,
    or_equal: bool,
    offset: i32,
}

impl KeySelector {
    pub fn new(key: impl Into<Bytes>, or_equal: bool, offset: i32) -> Self {
        Self {
            key: key.into(),
            or_equal,
            offset,
        }
    }

    pub fn last_less_than(key: impl Into<Bytes>) -> Self {
        Self::new(key, false, 0)
    }

    pub fn last_less_or_equal(key: impl Into<Bytes>) -> Self {
        Self::new(key, true, 0)
    }

    pub fn first_greater_than(key: impl Into<Bytes>) -> Self {
        Self::new(key, true, 1)
    }

    pub fn first_greater_or_equal(key: impl Into<Bytes>) -> Self {
        Self::new(key, false, 1)
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn or_equal(&self) -> bool {
        self.or_equal
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Resolve against a sorted, de-duplicated list of keys.
    ///
    /// Before the first key resolves to `b""`, past the last to [`KEYSPACE_END`].
    pub fn resolve(&self, keys: &[Bytes]) -> Bytes {
        self.resolve_within(keys, &Bytes::from_static(KEYSPACE_END))
    }

    /// Like [`resolve`](Self::resolve) with a caller-chosen past-the-end key,
    /// for readers allowed beyond the user keyspace.
    pub fn resolve_within(&self, keys: &[Bytes], past_end: &Bytes) -> Bytes {
        let target = self.target_index(keys);
        if target < 0 {
            Bytes::new()
        } else if target as usize >= keys.len() {
            past_end.clone()
        } else {
            keys[target as usize].clone()
        }
    }

    /// Exclusive upper bound when this selector ends a range read.
    ///
    /// Forward-looking selectors (offset >= 1) name the first key left out;
    /// backward-looking ones (offset <= 0) name the last key taken in, so
    /// `last_less_than("d")` ends the range just below `"d"`.
    pub fn resolve_range_end(&self, keys: &[Bytes], past_end: &Bytes) -> Bytes {
        if self.offset >= 1 {
            return self.resolve_within(keys, past_end);
        }
        match usize::try_from(self.target_index(keys)) {
            Ok(last) if last < keys.len() => key_after(&keys[last]),
            Ok(_) => past_end.clone(),
            Err(_) => Bytes::new(),
        }
    }

    fn target_index(&self, keys: &[Bytes]) -> i64 {
        let anchor = keys.partition_point(|k| {
            if self.or_equal {
                k.as_ref() <= self.key.as_ref()
            } else {
                k.as_ref() < self.key.as_ref()
            }
        });
        anchor as i64 - 1 + i64::from(self.offset)
    }
}

impl Add<i32> for KeySelector {
    type Output = KeySelector;

    fn add(mut self, rhs: i32) -> KeySelector {
        self.offset = self.offset.saturating_add(rhs);
        self
    }
}

impl Sub<i32> for KeySelector {
    type Output = KeySelector;

    fn sub(mut self, rhs: i32) -> KeySelector {
        self.offset = self.offset.saturating_sub(rhs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<Bytes> {
        [b"b", b"c", b"d"]
            .iter()
            .map(|k| Bytes::copy_from_slice(*k))
            .collect()
    }

    #[test]
    fn test_basic_constructors() {
        let keys = keys();
        assert_eq!(KeySelector::first_greater_or_equal(&b"c"[..]).resolve(&keys), "c");
        assert_eq!(KeySelector::first_greater_than(&b"c"[..]).resolve(&keys), "d");
        assert_eq!(KeySelector::last_less_than(&b"c"[..]).resolve(&keys), "b");
        assert_eq!(KeySelector::last_less_or_equal(&b"c"[..]).resolve(&keys), "c");
    }

    #[test]
    fn test_reference_key_absent() {
        let keys = keys();
        assert_eq!(KeySelector::first_greater_or_equal(&b"bb"[..]).resolve(&keys), "c");
        assert_eq!(KeySelector::last_less_or_equal(&b"bb"[..]).resolve(&keys), "b");
    }

    #[test]
    fn test_offsets_and_clamping() {
        let keys = keys();
        let sel = KeySelector::first_greater_or_equal(&b"b"[..]) + 2;
        assert_eq!(sel.offset(), 3);
        assert_eq!(sel.resolve(&keys), "d");
        assert_eq!((sel + 1).resolve(&keys), KEYSPACE_END);
        assert_eq!(
            (KeySelector::last_less_than(&b"b"[..]) - 1).resolve(&keys),
            Bytes::new()
        );
    }

    #[test]
    fn test_range_end_bounds() {
        let keys = keys();
        let past_end = Bytes::from_static(KEYSPACE_END);
        let end = |sel: KeySelector| sel.resolve_range_end(&keys, &past_end);
        assert_eq!(end(KeySelector::first_greater_or_equal(&b"d"[..])), "d");
        assert_eq!(end(KeySelector::last_less_than(&b"d"[..])), "c\0");
        assert_eq!(end(KeySelector::last_less_or_equal(&b"d"[..])), "d\0");
        assert_eq!(end(KeySelector::last_less_than(&b"b"[..])), Bytes::new());
        assert_eq!(end(KeySelector::first_greater_than(&b"d"[..])), KEYSPACE_END);
    }

    #[test]
    fn test_offset_arithmetic_saturates() {
        let sel = KeySelector::first_greater_or_equal(&b"a"[..]) + i32::MAX;
        assert_eq!(sel.offset(), i32::MAX);
        let sel = KeySelector::last_less_than(&b"a"[..]) - i32::MAX - i32::MAX;
        assert_eq!(sel.offset(), i32::MIN);
        assert_eq!(sel.resolve(&keys()), Bytes::new());
    }

    #[test]
    fn test_empty_keyspace() {
        assert_eq!(KeySelector::first_greater_or_equal(&b"a"[..]).resolve(&[]), KEYSPACE_END);
        assert_eq!(KeySelector::last_less_than(&b"a"[..]).resolve(&[]), Bytes::new());
    }
}
