//! Engine-side transaction.
//!
//! Buffers mutations and the read-your-writes overlay on the caller's
//! thread, and queues every read and the commit as a job on the network
//! loop. Jobs carry a snapshot of what they need (overlay, deadline, shared
//! state) so later calls on the handle cannot disturb them.
//!
//! The read version is taken lazily by the first read job to run. Read
//! conflict ranges are recorded when a non-snapshot read succeeds; write
//! conflict ranges when a mutation is buffered.

use super::atomic;
use super::cluster::{Cluster, CommitRequest};
use super::database::{DatabaseShared, TransactionDefaults};
use super::write_map::WriteMap;
use crate::error::{ErrorClass, FluxError, FluxResult};
use crate::future::{FluxFuture, Promise, promise};
use crate::native::NativeTransaction;
use crate::types::{
    ConflictKind, ConflictSet, GetRangeLimits, KEYSPACE_END, KeyRange, KeySelector, KeyValue,
    Mutation, MutationType, RangeResult, TransactionOption, Version, Versionstamp, key_after,
};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// End of the keyspace visible with system key access.
const SYSTEM_KEYSPACE_END: &[u8] = b"\xff\xff";

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransactionOptions {
    timeout: Option<Duration>,
    retry_limit: Option<u32>,
    max_retry_delay: Duration,
    size_limit: usize,
    /// One-shot: consumed by the next write
    next_write_no_conflict: bool,
    ryw_disabled: bool,
    access_system_keys: bool,
    read_system_keys: bool,
}

impl From<&TransactionDefaults> for TransactionOptions {
    fn from(defaults: &TransactionDefaults) -> Self {
        Self {
            timeout: defaults.timeout,
            retry_limit: defaults.retry_limit,
            max_retry_delay: defaults.max_retry_delay,
            size_limit: defaults.size_limit,
            next_write_no_conflict: false,
            ryw_disabled: false,
            access_system_keys: false,
            read_system_keys: false,
        }
    }
}

enum StampState {
    Waiting(Vec<Promise<Versionstamp>>),
    Done(FluxResult<Versionstamp>),
}

/// State touched by network jobs as well as the handle.
struct TxnState {
    read_version: Option<Version>,
    conflicts: ConflictSet,
    stamp: StampState,
}

impl TxnState {
    fn new() -> Self {
        Self {
            read_version: None,
            conflicts: ConflictSet::new(),
            stamp: StampState::Waiting(Vec::new()),
        }
    }
}

/// First settlement wins; waiters are notified outside the lock.
fn settle_stamp(state: &Mutex<TxnState>, result: FluxResult<Versionstamp>) {
    let waiters = {
        let mut state = state.lock();
        let StampState::Waiting(waiters) = &mut state.stamp else {
            return;
        };
        let waiters = mem::take(waiters);
        state.stamp = StampState::Done(result.clone());
        waiters
    };
    for waiter in waiters {
        waiter.send(result.clone());
    }
}

fn check_deadline(deadline: Option<Instant>) -> FluxResult<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(FluxError::TransactionTimedOut),
        _ => Ok(()),
    }
}

/// What a read job needs, captured when the read is issued.
struct ReadContext {
    cluster: Arc<Cluster>,
    state: Arc<Mutex<TxnState>>,
    /// `None` when read-your-writes is disabled
    writes: Option<Arc<WriteMap>>,
    deadline: Option<Instant>,
}

impl ReadContext {
    /// The transaction's read version, taken from the cluster on first use.
    fn pin_version(&self) -> FluxResult<Version> {
        check_deadline(self.deadline)?;
        let mut state = self.state.lock();
        Ok(*state
            .read_version
            .get_or_insert_with(|| self.cluster.latest_version()))
    }

    fn read_version(&self) -> FluxResult<Version> {
        let version = self.pin_version()?;
        self.cluster.check_read_version(version)?;
        Ok(version)
    }

    fn overlay(&self) -> Option<&WriteMap> {
        self.writes.as_deref()
    }

    /// Every visible pair below `past_end`, ascending.
    fn visible(&self, version: Version, past_end: &Bytes) -> FluxResult<Vec<KeyValue>> {
        let keyspace = KeyRange::new(Bytes::new(), past_end.clone())?;
        Ok(self.cluster.read_range(&keyspace, version, self.overlay()))
    }

    fn add_read_conflict(&self, range: KeyRange) {
        self.state.lock().conflicts.add(ConflictKind::Read, range);
    }
}

/// Rows in iteration order up to the first exhausted limit, and whether
/// rows were left over.
fn take_limited(rows: &[KeyValue], limits: GetRangeLimits, reverse: bool) -> (Vec<KeyValue>, bool) {
    let mut ordered: Vec<&KeyValue> = rows.iter().collect();
    if reverse {
        ordered.reverse();
    }
    let mut out = Vec::new();
    let mut bytes = 0usize;
    for kv in ordered {
        if limits.is_reached(out.len(), bytes) {
            return (out, true);
        }
        bytes += kv.byte_size();
        out.push(kv.clone());
    }
    (out, false)
}

pub(crate) struct MemoryTransaction {
    shared: Arc<DatabaseShared>,
    state: Arc<Mutex<TxnState>>,
    /// Copy-on-write: reads in flight keep the version they were issued with
    writes: Arc<WriteMap>,
    mutations: Vec<Mutation>,
    watches: Vec<(Bytes, Promise<()>)>,
    options: TransactionOptions,
    retries: u32,
    backoff: Duration,
    started: Instant,
}

impl MemoryTransaction {
    pub(crate) fn new(shared: Arc<DatabaseShared>) -> Self {
        let options = TransactionOptions::from(&shared.defaults());
        Self {
            backoff: shared.initial_backoff,
            shared,
            state: Arc::new(Mutex::new(TxnState::new())),
            writes: Arc::default(),
            mutations: Vec::new(),
            watches: Vec::new(),
            options,
            retries: 0,
            started: Instant::now(),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.options.timeout.map(|timeout| self.started + timeout)
    }

    fn read_limit(&self) -> &'static [u8] {
        if self.options.read_system_keys || self.options.access_system_keys {
            SYSTEM_KEYSPACE_END
        } else {
            KEYSPACE_END
        }
    }

    fn write_limit(&self) -> &'static [u8] {
        if self.options.access_system_keys {
            SYSTEM_KEYSPACE_END
        } else {
            KEYSPACE_END
        }
    }

    fn check_read_key(&self, key: &[u8]) -> FluxResult<()> {
        if key >= self.read_limit() {
            return Err(FluxError::KeyOutsideLegalRange);
        }
        Ok(())
    }

    fn check_write_key(&self, key: &[u8]) -> FluxResult<()> {
        check_deadline(self.deadline())?;
        if key >= self.write_limit() {
            return Err(FluxError::KeyOutsideLegalRange);
        }
        Ok(())
    }

    fn writes_mut(&mut self) -> &mut WriteMap {
        Arc::make_mut(&mut self.writes)
    }

    fn add_write_conflict(&mut self, range: KeyRange) {
        if mem::take(&mut self.options.next_write_no_conflict) {
            return;
        }
        self.state.lock().conflicts.add(ConflictKind::Write, range);
    }

    fn submit_read<T, F>(&self, read: F) -> FluxFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&ReadContext) -> FluxResult<T> + Send + 'static,
    {
        let (promise, future) = promise();
        let context = ReadContext {
            cluster: Arc::clone(&self.shared.cluster),
            state: Arc::clone(&self.state),
            writes: (!self.options.ryw_disabled).then(|| Arc::clone(&self.writes)),
            deadline: self.deadline(),
        };
        self.shared.network.submit(Box::new(move || {
            if promise.is_cancelled() {
                return;
            }
            promise.send(read(&context));
        }));
        future
    }

    /// Jittered exponential backoff: the current step capped by the max
    /// retry delay, scaled by a random factor in `[0.5, 1.0]`.
    fn next_backoff(&mut self) -> Duration {
        let cap = self.options.max_retry_delay;
        let step = self.backoff.min(cap);
        self.backoff = self.backoff.saturating_mul(2).min(cap);
        step.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    /// Drop buffered state and the read version. Watches and versionstamp
    /// waiters that can no longer be served resolve to `Cancelled`.
    fn discard(&mut self) {
        let previous = mem::replace(&mut self.state, Arc::new(Mutex::new(TxnState::new())));
        settle_stamp(&previous, Err(FluxError::Cancelled));
        self.writes = Arc::default();
        self.mutations.clear();
        for (_, watch) in self.watches.drain(..) {
            watch.send(Err(FluxError::Cancelled));
        }
    }
}

impl NativeTransaction for MemoryTransaction {
    fn set_read_version(&mut self, version: Version) -> FluxResult<()> {
        let mut state = self.state.lock();
        if state.read_version.is_some() {
            return Err(FluxError::ReadVersionAlreadySet);
        }
        state.read_version = Some(version);
        Ok(())
    }

    fn get_read_version(&mut self) -> FluxFuture<Version> {
        self.submit_read(|context| context.pin_version())
    }

    fn get(&mut self, key: &[u8], snapshot: bool) -> FluxFuture<Option<Bytes>> {
        if let Err(e) = self.check_read_key(key) {
            return FluxFuture::failed(e);
        }
        let key = Bytes::copy_from_slice(key);
        self.submit_read(move |context| {
            let version = context.read_version()?;
            let value = context.cluster.read(&key, version, context.overlay())?;
            if !snapshot {
                context.add_read_conflict(KeyRange::single_key(&key));
            }
            Ok(value)
        })
    }

    fn get_key(&mut self, selector: &KeySelector, snapshot: bool) -> FluxFuture<Bytes> {
        let selector = selector.clone();
        let past_end = Bytes::from_static(self.read_limit());
        self.submit_read(move |context| {
            let version = context.read_version()?;
            let keys: Vec<Bytes> = context
                .visible(version, &past_end)?
                .into_iter()
                .map(|kv| kv.key)
                .collect();
            let resolved = selector.resolve_within(&keys, &past_end);
            if !snapshot {
                let reference = selector.key();
                let (low, high) = if resolved < *reference {
                    (&resolved, reference)
                } else {
                    (reference, &resolved)
                };
                context.add_read_conflict(KeyRange::new(low.clone(), key_after(high))?);
            }
            Ok(resolved)
        })
    }

    fn get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        limits: GetRangeLimits,
        snapshot: bool,
        reverse: bool,
    ) -> FluxFuture<RangeResult> {
        let (begin, end) = (begin.clone(), end.clone());
        let past_end = Bytes::from_static(self.read_limit());
        self.submit_read(move |context| {
            let version = context.read_version()?;
            let visible = context.visible(version, &past_end)?;
            let keys: Vec<Bytes> = visible.iter().map(|kv| kv.key.clone()).collect();
            let from = begin.resolve_within(&keys, &past_end);
            let to = end.resolve_range_end(&keys, &past_end);

            // Resolution depends on every key between a selector's reference
            // key and where it landed, even when nothing is returned.
            let low = from.clone().min(begin.key().clone());
            let high = to.clone().max(key_after(end.key()));
            if from >= to {
                if !snapshot {
                    context.add_read_conflict(KeyRange::new(low, high)?);
                }
                return Ok(RangeResult::default());
            }

            let span = KeyRange::new(from.clone(), to.clone())?;
            if context.overlay().is_some_and(|writes| writes.has_unreadable(&span)) {
                return Err(FluxError::AccessedUnreadable);
            }
            let first = keys.partition_point(|k| *k < from);
            let last = keys.partition_point(|k| *k < to);
            let (kvs, more) = take_limited(&visible[first..last], limits, reverse);

            if !snapshot {
                // Only what was returned is protected when a limit cut in.
                let read = match (more, kvs.last()) {
                    (true, Some(row)) if reverse => KeyRange::new(row.key.clone(), high)?,
                    (true, Some(row)) => KeyRange::new(low, key_after(&row.key))?,
                    _ => KeyRange::new(low, high)?,
                };
                context.add_read_conflict(read);
            }
            Ok(RangeResult { kvs, more })
        })
    }

    fn watch(&mut self, key: &[u8]) -> FluxFuture<()> {
        if let Err(e) = self.check_read_key(key) {
            return FluxFuture::failed(e);
        }
        let (promise, future) = promise();
        self.watches.push((Bytes::copy_from_slice(key), promise));
        future
    }

    fn add_conflict_range(&mut self, kind: ConflictKind, range: KeyRange) -> FluxResult<()> {
        if range.end().as_ref() > self.write_limit() {
            return Err(FluxError::KeyOutsideLegalRange);
        }
        self.state.lock().conflicts.add(kind, range);
        Ok(())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> FluxResult<()> {
        self.check_write_key(key)?;
        let (key, value) = (Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.writes_mut().set(key.clone(), value.clone());
        self.add_write_conflict(KeyRange::single_key(&key));
        self.mutations.push(Mutation::Set { key, value });
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> FluxResult<()> {
        self.check_write_key(key)?;
        let key = Bytes::copy_from_slice(key);
        self.writes_mut().clear(key.clone());
        self.add_write_conflict(KeyRange::single_key(&key));
        self.mutations.push(Mutation::Clear { key });
        Ok(())
    }

    fn clear_range(&mut self, range: &KeyRange) -> FluxResult<()> {
        check_deadline(self.deadline())?;
        if range.end().as_ref() > self.write_limit() {
            return Err(FluxError::KeyOutsideLegalRange);
        }
        self.writes_mut().clear_range(range);
        self.add_write_conflict(range.clone());
        self.mutations.push(Mutation::ClearRange(range.clone()));
        Ok(())
    }

    fn atomic_op(&mut self, key: &[u8], operand: &[u8], op: MutationType) -> FluxResult<()> {
        let (key_bytes, operand_bytes) = (Bytes::copy_from_slice(key), Bytes::copy_from_slice(operand));
        match op {
            MutationType::SetVersionstampedKey => {
                check_deadline(self.deadline())?;
                atomic::validate_template(key)?;
                // The final key is unknown until commit.
                self.options.next_write_no_conflict = false;
            }
            MutationType::SetVersionstampedValue => {
                self.check_write_key(key)?;
                atomic::validate_template(operand)?;
                self.writes_mut().mark_unreadable(key_bytes.clone());
                self.add_write_conflict(KeyRange::single_key(key));
            }
            _ => {
                self.check_write_key(key)?;
                self.writes_mut()
                    .atomic(key_bytes.clone(), op, operand_bytes.clone());
                self.add_write_conflict(KeyRange::single_key(key));
            }
        }
        self.mutations.push(Mutation::Atomic {
            key: key_bytes,
            operand: operand_bytes,
            op,
        });
        Ok(())
    }

    fn commit(&mut self) -> FluxFuture<Version> {
        let deadline = self.deadline();
        if let Err(e) = check_deadline(deadline) {
            for (_, watch) in self.watches.drain(..) {
                watch.send(Err(e.clone()));
            }
            settle_stamp(&self.state, Err(e.clone()));
            return FluxFuture::failed(e);
        }

        let (promise, future) = promise();
        let cluster = Arc::clone(&self.shared.cluster);
        let state = Arc::clone(&self.state);
        let writes = Arc::clone(&self.writes);
        let mutations = mem::take(&mut self.mutations);
        let watches = mem::take(&mut self.watches);
        let database_id = self.shared.id;
        let max_watches = self.shared.defaults().max_watches;
        let size_limit = self.options.size_limit;

        self.shared.network.submit(Box::new(move || {
            if promise.is_cancelled() {
                for (_, watch) in watches {
                    watch.send(Err(FluxError::Cancelled));
                }
                settle_stamp(&state, Err(FluxError::Cancelled));
                return;
            }
            let (read_version, conflicts) = {
                let state = state.lock();
                (state.read_version, state.conflicts.clone())
            };
            let request = CommitRequest {
                read_version,
                conflicts,
                mutations,
                writes,
                watches,
                database_id,
                max_watches,
                size_limit,
            };
            let result = match check_deadline(deadline) {
                Ok(()) => cluster.commit(request),
                Err(e) => {
                    for (_, watch) in request.watches {
                        watch.send(Err(e.clone()));
                    }
                    Err(e)
                }
            };
            let stamp = match &result {
                Ok(outcome) => outcome.stamp.ok_or(FluxError::NoCommitVersion),
                Err(e) => Err(e.clone()),
            };
            settle_stamp(&state, stamp);
            promise.send(result.map(|outcome| outcome.version));
        }));
        future
    }

    fn versionstamp(&mut self) -> FluxFuture<Versionstamp> {
        let mut state = self.state.lock();
        match &mut state.stamp {
            StampState::Waiting(waiters) => {
                let (promise, future) = promise();
                waiters.push(promise);
                future
            }
            StampState::Done(Ok(stamp)) => FluxFuture::ready(*stamp),
            StampState::Done(Err(e)) => FluxFuture::failed(e.clone()),
        }
    }

    fn set_option(&mut self, option: &TransactionOption) -> FluxResult<()> {
        let options = &mut self.options;
        match *option {
            TransactionOption::Timeout(ms) => {
                options.timeout = (ms > 0).then(|| Duration::from_millis(ms as u64));
            }
            TransactionOption::RetryLimit(n) => options.retry_limit = u32::try_from(n).ok(),
            TransactionOption::MaxRetryDelay(ms) => {
                options.max_retry_delay = Duration::from_millis(ms as u64);
            }
            TransactionOption::SizeLimit(n) => options.size_limit = n as usize,
            TransactionOption::NextWriteNoWriteConflictRange => options.next_write_no_conflict = true,
            TransactionOption::ReadYourWritesDisable => options.ryw_disabled = true,
            TransactionOption::AccessSystemKeys => options.access_system_keys = true,
            TransactionOption::ReadSystemKeys => options.read_system_keys = true,
            TransactionOption::CausalWriteRisky | TransactionOption::CausalReadRisky => {
                trace!(code = option.code(), "transaction option has no effect in memory");
            }
        }
        Ok(())
    }

    fn on_error(&mut self, error: &FluxError) -> FluxFuture<()> {
        let class = error.class();
        if matches!(class, ErrorClass::Fatal | ErrorClass::Cancelled) {
            return FluxFuture::failed(error.clone());
        }
        if self.options.retry_limit.is_some_and(|limit| self.retries >= limit) {
            debug!(retries = self.retries, code = error.code(), "retry limit reached");
            return FluxFuture::failed(error.clone());
        }
        let delay = match class {
            ErrorClass::RetryableWithBackoff => self.next_backoff(),
            _ => Duration::ZERO,
        };
        self.retries += 1;
        self.discard();
        debug!(retries = self.retries, delay_ms = delay.as_millis() as u64, "transaction reset for retry");

        let (promise, future) = promise();
        self.shared
            .network
            .submit_after(delay, Box::new(move || promise.send(Ok(()))));
        future
    }

    fn cancel(&mut self) {
        for (_, watch) in self.watches.drain(..) {
            watch.send(Err(FluxError::Cancelled));
        }
        settle_stamp(&self.state, Err(FluxError::Cancelled));
    }

    fn reset(&mut self) {
        self.discard();
        self.options = TransactionOptions::from(&self.shared.defaults());
        self.retries = 0;
        self.backoff = self.shared.initial_backoff;
        self.started = Instant::now();
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        NativeTransaction::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::memory::database::MemoryDatabase;
    use crate::memory::network::Network;
    use crate::native::NativeDatabase;
    use std::thread::{self, JoinHandle};

    /// Network loop on a background thread plus one database on it.
    struct Harness {
        network: Arc<Network>,
        runner: Option<JoinHandle<FluxResult<()>>>,
        database: MemoryDatabase,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(ClientConfig::default())
        }

        fn with_config(config: ClientConfig) -> Self {
            let network = Arc::new(Network::new());
            network.setup().unwrap();
            let runner = {
                let network = Arc::clone(&network);
                thread::spawn(move || network.run())
            };
            let database = MemoryDatabase::new(
                1,
                Arc::new(Cluster::new("test", config.mvcc_window)),
                network.handle(),
                &config,
            );
            Self {
                network,
                runner: Some(runner),
                database,
            }
        }

        fn transaction(&self) -> Box<dyn NativeTransaction> {
            self.database.create_transaction().unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.network.stop();
            if let Some(runner) = self.runner.take() {
                let _ = runner.join();
            }
        }
    }

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        tx.set(b"k", b"mine").unwrap();
        assert_eq!(tx.get(b"k", false).await.unwrap(), Some(b("mine")));

        tx.set_option(&TransactionOption::ReadYourWritesDisable).unwrap();
        assert_eq!(tx.get(b"k", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_reads_add_no_conflicts() {
        let harness = Harness::new();
        let mut tx = MemoryTransaction::new(harness.database.shared());
        tx.get(b"a", true).await.unwrap();
        assert!(tx.state.lock().conflicts.reads().is_empty());

        tx.get(b"a", false).await.unwrap();
        assert_eq!(tx.state.lock().conflicts.reads(), &[KeyRange::single_key(b"a")]);
    }

    #[tokio::test]
    async fn test_limited_range_conflict_covers_rows_read() {
        let harness = Harness::new();
        let mut setup = harness.transaction();
        for key in ["a", "b", "c", "d"] {
            setup.set(key.as_bytes(), b"v").unwrap();
        }
        setup.commit().await.unwrap();

        let mut tx = MemoryTransaction::new(harness.database.shared());
        let result = tx
            .get_range(
                &KeySelector::first_greater_or_equal(b("a")),
                &KeySelector::first_greater_or_equal(b("z")),
                GetRangeLimits::rows(2),
                false,
                false,
            )
            .await
            .unwrap();
        assert!(result.more);
        assert_eq!(result.keys().cloned().collect::<Vec<_>>(), vec![b("a"), b("b")]);
        assert_eq!(
            tx.state.lock().conflicts.reads(),
            &[KeyRange::new(b("a"), key_after(b"b")).unwrap()]
        );

        let reversed = tx
            .get_range(
                &KeySelector::first_greater_or_equal(b("a")),
                &KeySelector::first_greater_or_equal(b("z")),
                GetRangeLimits::rows(1),
                true,
                true,
            )
            .await
            .unwrap();
        assert_eq!(reversed.keys().cloned().collect::<Vec<_>>(), vec![b("d")]);
    }

    #[tokio::test]
    async fn test_range_conflict_covers_gaps_and_empty_reads() {
        let harness = Harness::new();
        let mut setup = harness.transaction();
        setup.set(b"a", b"1").unwrap();
        setup.set(b"e", b"2").unwrap();
        setup.commit().await.unwrap();

        let mut tx = MemoryTransaction::new(harness.database.shared());
        let result = tx
            .get_range(
                &KeySelector::first_greater_or_equal(b("b")),
                &KeySelector::first_greater_or_equal(b("z")),
                GetRangeLimits::unlimited(),
                false,
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.keys().cloned().collect::<Vec<_>>(), vec![b("e")]);

        let empty = tx
            .get_range(
                &KeySelector::first_greater_or_equal(b("m")),
                &KeySelector::first_greater_or_equal(b("p")),
                GetRangeLimits::unlimited(),
                false,
                false,
            )
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert_eq!(
            tx.state.lock().conflicts.reads(),
            &[
                KeyRange::new(b("b"), Bytes::from_static(KEYSPACE_END)).unwrap(),
                KeyRange::new(b("m"), Bytes::from_static(KEYSPACE_END)).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_key_conflict_spans_reference_and_result() {
        let harness = Harness::new();
        let mut setup = harness.transaction();
        setup.set(b"b", b"1").unwrap();
        setup.set(b"e", b"2").unwrap();
        setup.commit().await.unwrap();

        let mut tx = MemoryTransaction::new(harness.database.shared());
        let key = tx
            .get_key(&KeySelector::first_greater_than(b("c")), false)
            .await
            .unwrap();
        assert_eq!(key, b("e"));
        assert_eq!(
            tx.state.lock().conflicts.reads(),
            &[KeyRange::new(b("c"), key_after(b"e")).unwrap()]
        );
    }

    #[test]
    fn test_next_write_skips_one_conflict_range() {
        let harness = Harness::new();
        let mut tx = MemoryTransaction::new(harness.database.shared());
        tx.set_option(&TransactionOption::NextWriteNoWriteConflictRange)
            .unwrap();
        tx.set(b"quiet", b"1").unwrap();
        tx.set(b"loud", b"2").unwrap();
        assert_eq!(tx.state.lock().conflicts.writes(), &[KeyRange::single_key(b"loud")]);
        assert_eq!(tx.mutations.len(), 2);
    }

    #[test]
    fn test_system_keys_need_access() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        assert_eq!(
            tx.set(b"\xff/conf", b"x").unwrap_err(),
            FluxError::KeyOutsideLegalRange
        );
        tx.set_option(&TransactionOption::AccessSystemKeys).unwrap();
        tx.set(b"\xff/conf", b"x").unwrap();
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let harness = Harness::new();
        let mut tx = MemoryTransaction::new(harness.database.shared());
        tx.options.max_retry_delay = Duration::from_millis(40);
        let delays: Vec<Duration> = (0..5).map(|_| tx.next_backoff()).collect();
        assert!(delays[0] >= Duration::from_millis(5) && delays[0] <= Duration::from_millis(10));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(40)));
        assert!(delays[4] >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_retry_limit_and_reset_restores_defaults() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        tx.set_option(&TransactionOption::RetryLimit(1)).unwrap();
        tx.on_error(&FluxError::TransactionTooOld).await.unwrap();
        assert_eq!(
            tx.on_error(&FluxError::TransactionTooOld).await.unwrap_err(),
            FluxError::TransactionTooOld
        );

        tx.reset();
        tx.on_error(&FluxError::TransactionTooOld).await.unwrap();
        tx.on_error(&FluxError::TransactionTooOld).await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_errors_pass_through() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        tx.set(b"k", b"v").unwrap();
        assert_eq!(
            tx.on_error(&FluxError::UsedDuringCommit).await.unwrap_err(),
            FluxError::UsedDuringCommit
        );
        // Nothing was discarded.
        assert_eq!(tx.get(b"k", true).await.unwrap(), Some(b("v")));
    }

    #[tokio::test]
    async fn test_versionstamp_resolves_with_commit() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        tx.set(b"k", b"v").unwrap();
        let stamp = tx.versionstamp();
        let version = tx.commit().await.unwrap();
        assert_eq!(stamp.await.unwrap().version(), version);

        let mut read_only = harness.transaction();
        read_only.get(b"k", false).await.unwrap();
        let stamp = read_only.versionstamp();
        assert_eq!(read_only.commit().await.unwrap(), crate::types::INVALID_VERSION);
        assert_eq!(stamp.await.unwrap_err(), FluxError::NoCommitVersion);
    }

    #[tokio::test]
    async fn test_reset_cancels_pending_watches() {
        let harness = Harness::new();
        let mut tx = harness.transaction();
        let watch = tx.watch(b"w");
        tx.reset();
        assert_eq!(watch.await.unwrap_err(), FluxError::Cancelled);
    }

    #[test]
    fn test_take_limited_by_bytes() {
        let rows = vec![
            KeyValue::new(b("a"), b("12345")),
            KeyValue::new(b("b"), b("12345")),
            KeyValue::new(b("c"), b("12345")),
        ];
        let (kvs, more) = take_limited(&rows, GetRangeLimits::unlimited().with_bytes(10), false);
        assert_eq!(kvs.len(), 2);
        assert!(more);
        let (kvs, more) = take_limited(&rows, GetRangeLimits::unlimited(), true);
        assert_eq!(kvs[0].key, b("c"));
        assert!(!more);
    }
}
