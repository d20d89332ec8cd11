//! Shared state behind one descriptor.
//!
//! Every database opened with the same descriptor talks to the same
//! [`Cluster`]: one versioned store, one version oracle, the resolver's
//! write history and the watch registry. Commits are resolved one at a time
//! on the network thread.

use super::atomic::{self, KEY_SIZE_LIMIT, VALUE_SIZE_LIMIT};
use super::oracle::VersionOracle;
use super::store::VersionedStore;
use super::write_map::WriteMap;
use crate::error::{FluxError, FluxResult};
use crate::future::Promise;
use crate::types::{
    ConflictSet, INVALID_VERSION, KeyRange, KeyValue, Mutation, MutationType, Version, Versionstamp,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, trace};

/// Commits between garbage collection passes.
const GC_INTERVAL: u64 = 256;

/// Everything a transaction submits at commit.
pub(crate) struct CommitRequest {
    /// `None` when the transaction never read
    pub(crate) read_version: Option<Version>,
    pub(crate) conflicts: ConflictSet,
    pub(crate) mutations: Vec<Mutation>,
    /// The transaction's overlay, used to pick each watch's baseline value
    pub(crate) writes: Arc<WriteMap>,
    pub(crate) watches: Vec<(Bytes, Promise<()>)>,
    pub(crate) database_id: u64,
    pub(crate) max_watches: usize,
    pub(crate) size_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitOutcome {
    /// `INVALID_VERSION` for a commit that wrote nothing
    pub(crate) version: Version,
    pub(crate) stamp: Option<Versionstamp>,
}

struct WatchEntry {
    id: u64,
    database_id: u64,
    expected: Option<Bytes>,
    promise: Promise<()>,
}

type WatchRegistry = Mutex<HashMap<Bytes, Vec<WatchEntry>>>;

/// Drop one watch whose consumer went away.
fn forget_watch(registry: &WatchRegistry, key: &Bytes, id: u64) {
    let mut registry = registry.lock();
    if let Some(entries) = registry.get_mut(key) {
        entries.retain(|entry| entry.id != id);
        if entries.is_empty() {
            registry.remove(key);
        }
    }
}

pub(crate) struct Cluster {
    descriptor: String,
    store: VersionedStore,
    oracle: VersionOracle,
    mvcc_window: i64,
    /// Write conflict ranges of recent commits, oldest first
    history: Mutex<VecDeque<(Version, Vec<KeyRange>)>>,
    watches: Arc<WatchRegistry>,
    next_watch: AtomicU64,
    commits: AtomicU64,
}

impl Cluster {
    pub(crate) fn new(descriptor: impl Into<String>, mvcc_window: i64) -> Self {
        Self {
            descriptor: descriptor.into(),
            store: VersionedStore::new(),
            oracle: VersionOracle::default(),
            mvcc_window,
            history: Mutex::new(VecDeque::new()),
            watches: Arc::default(),
            next_watch: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub(crate) fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub(crate) fn latest_version(&self) -> Version {
        self.oracle.read_version()
    }

    /// A read at `version` must be neither ahead of the latest commit nor
    /// behind the MVCC window.
    pub(crate) fn check_read_version(&self, version: Version) -> FluxResult<()> {
        let latest = self.latest_version();
        if version > latest {
            return Err(FluxError::FutureVersion {
                requested: version,
                latest,
            });
        }
        if version < latest - self.mvcc_window {
            return Err(FluxError::TransactionTooOld);
        }
        Ok(())
    }

    pub(crate) fn read(&self, key: &[u8], version: Version, writes: Option<&WriteMap>) -> FluxResult<Option<Bytes>> {
        match writes {
            Some(writes) => writes.read(key, || self.store.get(key, version)),
            None => Ok(self.store.get(key, version)),
        }
    }

    pub(crate) fn read_range(&self, range: &KeyRange, version: Version, writes: Option<&WriteMap>) -> Vec<KeyValue> {
        let committed = self.store.scan(range, version);
        match writes {
            Some(writes) => writes.merge_range(range, committed),
            None => committed,
        }
    }

    /// Resolve and apply one commit, then settle its watches: registered on
    /// success, failed with the commit error otherwise.
    #[instrument(level = "debug", skip_all, fields(cluster = %self.descriptor, mutations = request.mutations.len()))]
    pub(crate) fn commit(&self, mut request: CommitRequest) -> FluxResult<CommitOutcome> {
        let watches = mem::take(&mut request.watches);
        let result = self.resolve(&request);
        match &result {
            Ok(outcome) => self.register_watches(&request, outcome, watches),
            Err(e) => {
                debug!(error = %e, "commit rejected");
                for (_, promise) in watches {
                    promise.send(Err(e.clone()));
                }
            }
        }
        result
    }

    fn resolve(&self, request: &CommitRequest) -> FluxResult<CommitOutcome> {
        check_limits(&request.mutations, request.size_limit)?;

        let latest = self.latest_version();
        let read_version = request.read_version.unwrap_or(latest);
        if read_version < latest - self.mvcc_window {
            return Err(FluxError::TransactionTooOld);
        }
        if self.conflicts_since(&request.conflicts, read_version) {
            return Err(FluxError::NotCommitted);
        }
        if request.mutations.is_empty() && request.conflicts.writes().is_empty() {
            return Ok(CommitOutcome {
                version: INVALID_VERSION,
                stamp: None,
            });
        }

        let version = self.oracle.next_commit_version();
        let stamp = Versionstamp::new(version, 0);
        let touched = self.apply(&request.mutations, version, &stamp)?;
        self.history
            .lock()
            .push_back((version, request.conflicts.writes().to_vec()));
        debug!(version, "commit applied");

        self.notify_watches(&touched);
        if self.commits.fetch_add(1, Ordering::Relaxed) % GC_INTERVAL == GC_INTERVAL - 1 {
            self.collect_garbage();
        }
        Ok(CommitOutcome {
            version,
            stamp: Some(stamp),
        })
    }

    /// True if a commit newer than `read_version` wrote into one of the
    /// read conflict ranges.
    fn conflicts_since(&self, conflicts: &ConflictSet, read_version: Version) -> bool {
        if conflicts.reads().is_empty() {
            return false;
        }
        self.history
            .lock()
            .iter()
            .rev()
            .take_while(|(version, _)| *version > read_version)
            .any(|(_, writes)| conflicts.reads_intersect(writes))
    }

    /// Apply mutations in submission order. Returns the ranges they touched.
    fn apply(&self, mutations: &[Mutation], version: Version, stamp: &Versionstamp) -> FluxResult<Vec<KeyRange>> {
        let mut touched = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    self.store.put(key.clone(), version, Some(value.clone()));
                    touched.push(KeyRange::single_key(key));
                }
                Mutation::Clear { key } => {
                    self.store.put(key.clone(), version, None);
                    touched.push(KeyRange::single_key(key));
                }
                Mutation::ClearRange(range) => {
                    for kv in self.store.scan(range, version) {
                        self.store.put(kv.key, version, None);
                    }
                    touched.push(range.clone());
                }
                Mutation::Atomic {
                    key,
                    operand,
                    op: MutationType::SetVersionstampedKey,
                } => {
                    let key = atomic::fill_versionstamp(key, stamp)?;
                    touched.push(KeyRange::single_key(&key));
                    self.store.put(key, version, Some(operand.clone()));
                }
                Mutation::Atomic {
                    key,
                    operand,
                    op: MutationType::SetVersionstampedValue,
                } => {
                    let value = atomic::fill_versionstamp(operand, stamp)?;
                    self.store.put(key.clone(), version, Some(value));
                    touched.push(KeyRange::single_key(key));
                }
                Mutation::Atomic { key, operand, op } => {
                    let current = self.store.get(key, version);
                    let next = atomic::apply(*op, current.as_deref(), operand);
                    self.store.put(key.clone(), version, next);
                    touched.push(KeyRange::single_key(key));
                }
            }
        }
        Ok(touched)
    }

    fn notify_watches(&self, touched: &[KeyRange]) {
        let latest = self.latest_version();
        let mut fired = Vec::new();
        {
            let mut registry = self.watches.lock();
            registry.retain(|key, entries| {
                if !touched.iter().any(|range| range.contains(key)) {
                    return true;
                }
                let current = self.store.get(key, latest);
                let (changed, kept): (Vec<WatchEntry>, Vec<WatchEntry>) = mem::take(entries)
                    .into_iter()
                    .filter(|entry| !entry.promise.is_cancelled())
                    .partition(|entry| entry.expected != current);
                fired.extend(changed);
                *entries = kept;
                !entries.is_empty()
            });
        }
        if !fired.is_empty() {
            trace!(count = fired.len(), "watches fired");
        }
        for entry in fired {
            entry.promise.send(Ok(()));
        }
    }

    /// Activate the watches of a successful commit.
    ///
    /// A registered watch leaves the registry when it fires or when its
    /// future is cancelled or dropped. Each watch's baseline is the value the transaction saw: what it
    /// committed if it wrote the key, the snapshot at its read version
    /// otherwise. A watch whose baseline is already stale fires at once.
    fn register_watches(
        &self,
        request: &CommitRequest,
        outcome: &CommitOutcome,
        watches: Vec<(Bytes, Promise<()>)>,
    ) {
        if watches.is_empty() {
            return;
        }
        let latest = self.latest_version();
        let read_version = request.read_version.unwrap_or(latest);
        let mut fired = Vec::new();
        let mut rejected = Vec::new();
        {
            let mut registry = self.watches.lock();
            let mut active = registry
                .values()
                .flatten()
                .filter(|entry| entry.database_id == request.database_id && !entry.promise.is_cancelled())
                .count();

            for (key, promise) in watches {
                if promise.is_cancelled() {
                    continue;
                }
                if active >= request.max_watches {
                    rejected.push(promise);
                    continue;
                }
                let baseline = if outcome.version != INVALID_VERSION && request.writes.contains_write(&key) {
                    outcome.version
                } else {
                    read_version
                };
                let expected = self.store.get(&key, baseline);
                if expected != self.store.get(&key, latest) {
                    fired.push(promise);
                    continue;
                }
                // Hook first: a cancel racing this insert waits on the
                // registry lock and then removes the entry.
                let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
                let owner = Arc::downgrade(&self.watches);
                let hook_key = key.clone();
                promise.on_cancel(move || {
                    if let Some(registry) = owner.upgrade() {
                        forget_watch(&registry, &hook_key, id);
                    }
                });
                if promise.is_cancelled() {
                    continue;
                }
                active += 1;
                registry.entry(key).or_default().push(WatchEntry {
                    id,
                    database_id: request.database_id,
                    expected,
                    promise,
                });
            }
        }
        for promise in rejected {
            promise.send(Err(FluxError::TooManyWatches {
                limit: request.max_watches,
            }));
        }
        for promise in fired {
            promise.send(Ok(()));
        }
    }

    /// Drop versions older than the MVCC window along with their resolver
    /// history.
    fn collect_garbage(&self) {
        let horizon = self.latest_version() - self.mvcc_window;
        if horizon <= 0 {
            return;
        }
        let removed = self.store.collect_garbage(horizon);
        let mut history = self.history.lock();
        while history.front().is_some_and(|(version, _)| *version < horizon) {
            history.pop_front();
        }
        debug!(cluster = %self.descriptor, horizon, removed, "garbage collected");
    }

    #[cfg(test)]
    fn watch_count(&self) -> usize {
        self.watches.lock().values().map(Vec::len).sum()
    }
}

/// Per-key, per-value and whole-transaction size checks, plus versionstamp
/// template validation, before anything is applied.
fn check_limits(mutations: &[Mutation], size_limit: usize) -> FluxResult<()> {
    let mut total = 0usize;
    for mutation in mutations {
        if let Some(key) = mutation.key()
            && key.len() > KEY_SIZE_LIMIT
        {
            return Err(FluxError::KeyTooLarge(key.len()));
        }
        match mutation {
            Mutation::Set { value, .. } if value.len() > VALUE_SIZE_LIMIT => {
                return Err(FluxError::ValueTooLarge(value.len()));
            }
            Mutation::Atomic { operand, .. } if operand.len() > VALUE_SIZE_LIMIT => {
                return Err(FluxError::ValueTooLarge(operand.len()));
            }
            Mutation::Atomic {
                key,
                op: MutationType::SetVersionstampedKey,
                ..
            } => atomic::validate_template(key)?,
            Mutation::Atomic {
                operand,
                op: MutationType::SetVersionstampedValue,
                ..
            } => atomic::validate_template(operand)?,
            _ => {}
        }
        total += mutation.byte_size();
    }
    if total > size_limit {
        return Err(FluxError::TransactionTooLarge {
            size: total,
            limit: size_limit,
        });
    }
    Ok(())
}
