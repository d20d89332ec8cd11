//! Key ranges, range-read limits and range-read results.

use crate::error::{FluxError, FluxResult};
use bytes::{BufMut, Bytes, BytesMut};

/// The smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Bytes {
    let mut next = BytesMut::with_capacity(key.len() + 1);
    next.put_slice(key);
    next.put_u8(0);
    next.freeze()
}

/// The first key not prefixed by `prefix`: strip trailing `0xff` bytes and
/// increment the last remaining byte.
pub fn strinc(prefix: &[u8]) -> FluxResult<Bytes> {
    let Some(last) = prefix.iter().rposition(|&b| b != 0xff) else {
        return Err(FluxError::invalid_operation(
            "key must contain at least one byte not equal to 0xff",
            "strinc",
        ));
    };
    let mut next = prefix[..=last].to_vec();
    next[last] += 1;
    Ok(Bytes::from(next))
}

/// Half-open key range `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    begin: Bytes,
    end: Bytes,
}

impl KeyRange {
    /// Fails with `InvertedRange` when `begin > end`.
    pub fn new(begin: impl Into<Bytes>, end: impl Into<Bytes>) -> FluxResult<Self> {
        let (begin, end) = (begin.into(), end.into());
        if begin > end {
            return Err(FluxError::InvertedRange);
        }
        Ok(Self { begin, end })
    }

    /// `[key, key\0)`: exactly one key.
    pub fn single_key(key: &[u8]) -> Self {
        Self {
            begin: Bytes::copy_from_slice(key),
            end: key_after(key),
        }
    }

    /// Every key starting with `prefix`.
    pub fn starts_with(prefix: &[u8]) -> FluxResult<Self> {
        Ok(Self {
            begin: Bytes::copy_from_slice(prefix),
            end: strinc(prefix)?,
        })
    }

    /// The whole user keyspace `["", "\xff")`.
    pub fn all() -> Self {
        Self {
            begin: Bytes::new(),
            end: Bytes::from_static(super::KEYSPACE_END),
        }
    }

    pub fn begin(&self) -> &Bytes {
        &self.begin
    }

    pub fn end(&self) -> &Bytes {
        &self.end
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_ref() <= key && key < self.end.as_ref()
    }

    /// Two non-empty ranges intersect when each begins before the other ends.
    pub fn intersects(&self, other: &KeyRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.begin < other.end
            && other.begin < self.end
    }
}

/// Engine batching advice for range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamingMode {
    /// Transfer the whole range in one batch
    WantAll,
    /// Batches grow as iteration continues
    Iterator,
    /// Exactly the row limit, in one batch; requires a row limit
    Exact,
    Small,
    Medium,
    Large,
    /// Minimal look-ahead
    #[default]
    Serial,
}

impl StreamingMode {
    pub fn code(&self) -> i32 {
        match self {
            StreamingMode::WantAll => -2,
            StreamingMode::Iterator => -1,
            StreamingMode::Exact => 0,
            StreamingMode::Small => 1,
            StreamingMode::Medium => 2,
            StreamingMode::Large => 3,
            StreamingMode::Serial => 4,
        }
    }

    pub fn from_code(code: i32) -> FluxResult<Self> {
        Ok(match code {
            -2 => StreamingMode::WantAll,
            -1 => StreamingMode::Iterator,
            0 => StreamingMode::Exact,
            1 => StreamingMode::Small,
            2 => StreamingMode::Medium,
            3 => StreamingMode::Large,
            4 => StreamingMode::Serial,
            other => {
                return Err(FluxError::invalid_operation(
                    format!("unknown streaming mode {other}"),
                    "StreamingMode::from_code",
                ));
            }
        })
    }
}

/// Row and byte bounds for one range read. Zero means unlimited.
///
/// `mode` defaults to [`StreamingMode::Serial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetRangeLimits {
    pub rows: u32,
    pub bytes: u32,
    pub mode: StreamingMode,
}

impl GetRangeLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn rows(rows: u32) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn with_bytes(mut self, bytes: u32) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn with_mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.rows == 0 && self.bytes == 0
    }

    /// `Exact` mode is only meaningful with a row limit.
    pub fn validate(&self) -> FluxResult<()> {
        if self.mode == StreamingMode::Exact && self.rows == 0 {
            return Err(FluxError::ExactModeWithoutLimits);
        }
        Ok(())
    }

    /// True once `rows` rows totalling `bytes` bytes exhaust either bound.
    /// At least one row is always allowed through the byte bound.
    pub fn is_reached(&self, rows: usize, bytes: usize) -> bool {
        (self.rows > 0 && rows >= self.rows as usize)
            || (self.bytes > 0 && rows > 0 && bytes >= self.bytes as usize)
    }
}

/// One key/value pair owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Fully materialized result of one range read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeResult {
    /// Rows in iteration order (descending when read in reverse)
    pub kvs: Vec<KeyValue>,
    /// A limit cut the read short; more rows may exist in the range
    pub more: bool,
}

impl RangeResult {
    pub fn len(&self) -> usize {
        self.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kvs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.kvs.iter().map(|kv| &kv.key)
    }
}

impl IntoIterator for RangeResult {
    type Item = KeyValue;
    type IntoIter = std::vec::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.kvs.into_iter()
    }
}
