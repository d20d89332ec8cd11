use crate::types::Version;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of monotonically increasing commit versions.
///
/// - `read_version`: the newest committed version, handed to transactions
///   that have not pinned one.
/// - `next_commit_version`: allocated by the resolver for each write commit.
#[derive(Debug)]
pub(crate) struct VersionOracle {
    /// Last version handed out for a commit.
    latest: AtomicI64,
}

impl VersionOracle {
    pub(crate) fn new(start: Version) -> Self {
        Self {
            latest: AtomicI64::new(start),
        }
    }

    /// Allocate the next commit version. Returns the new value.
    pub(crate) fn next_commit_version(&self) -> Version {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Newest committed version, without allocating.
    pub(crate) fn read_version(&self) -> Version {
        self.latest.load(Ordering::SeqCst)
    }
}

impl Default for VersionOracle {
    fn default() -> Self {
        Self::new(0)
    }
}
