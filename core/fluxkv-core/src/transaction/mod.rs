//! Transaction handles.
//!
//! A [`Transaction`] wraps one engine transaction. It enforces the lifecycle
//! (see [`TransactionPhase`]), rejects misuse synchronously at the call site,
//! and tracks every future it hands out so that `cancel`, `reset`, `on_error`
//! and drop never leave an operation pending.
//!
//! Engine failures are never returned synchronously: they resolve the
//! returned future to an error.

pub mod lifecycle;

pub use lifecycle::TransactionPhase;

use crate::database::DatabaseContext;
use crate::error::{FluxError, FluxResult};
use crate::future::{CancelHandle, FluxFuture};
use crate::native::NativeTransaction;
use crate::types::{
    ConflictKind, GetRangeLimits, KeyRange, KeySelector, MutationType, RangeResult,
    TransactionOption, Version, Versionstamp,
};
use bytes::Bytes;
use lifecycle::Lifecycle;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Exclusively owned handle to one logical transaction.
///
/// Not `Clone`: every mutating call takes `&mut self`. Dropping the handle
/// cancels its in-flight futures (a pending commit included). Watches are
/// not tied to the handle and keep running after it is gone.
pub struct Transaction {
    native: Box<dyn NativeTransaction>,
    database: Arc<DatabaseContext>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    in_flight: Vec<CancelHandle>,
}

impl Transaction {
    pub(crate) fn new(native: Box<dyn NativeTransaction>, database: Arc<DatabaseContext>) -> Self {
        Self {
            native,
            database,
            lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
            in_flight: Vec::new(),
        }
    }

    pub fn phase(&self) -> TransactionPhase {
        self.lifecycle.lock().phase()
    }

    /// The database this transaction was created from.
    pub fn database(&self) -> &Arc<DatabaseContext> {
        &self.database
    }

    /// Pin the snapshot version instead of letting the engine pick one.
    pub fn set_read_version(&mut self, version: Version) -> FluxResult<()> {
        self.lifecycle.lock().begin_read_version("set_read_version")?;
        self.native.set_read_version(version)
    }

    pub fn get_read_version(&mut self) -> FluxResult<FluxFuture<Version>> {
        self.lifecycle.lock().begin_read_version("get_read_version")?;
        let future = self.native.get_read_version();
        Ok(self.track(future))
    }

    /// Point read. Non-snapshot reads add a read conflict on the key.
    pub fn get(&mut self, key: &[u8], snapshot: bool) -> FluxResult<FluxFuture<Option<Bytes>>> {
        self.lifecycle.lock().begin_operation("get")?;
        let future = self.native.get(key, snapshot);
        Ok(self.track(future))
    }

    /// Resolve a selector to a concrete key.
    pub fn get_key(&mut self, selector: &KeySelector, snapshot: bool) -> FluxResult<FluxFuture<Bytes>> {
        self.lifecycle.lock().begin_operation("get_key")?;
        let future = self.native.get_key(selector, snapshot);
        Ok(self.track(future))
    }

    /// Fully materialized range read between two selectors.
    ///
    /// The streaming mode travels in `limits.mode` and defaults to
    /// [`StreamingMode::Serial`](crate::StreamingMode::Serial). An end selector
    /// with offset 1 or more names the first key left out; one with offset 0
    /// or less names the last key taken in.
    pub fn get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        limits: GetRangeLimits,
        snapshot: bool,
        reverse: bool,
    ) -> FluxResult<FluxFuture<RangeResult>> {
        limits.validate()?;
        self.lifecycle.lock().begin_operation("get_range")?;
        let future = self.native.get_range(begin, end, limits, snapshot, reverse);
        Ok(self.track(future))
    }

    /// Every key in `range`, ascending or descending.
    pub fn get_range_of(
        &mut self,
        range: &KeyRange,
        limits: GetRangeLimits,
        reverse: bool,
    ) -> FluxResult<FluxFuture<RangeResult>> {
        self.get_range(
            &KeySelector::first_greater_or_equal(range.begin().clone()),
            &KeySelector::first_greater_or_equal(range.end().clone()),
            limits,
            false,
            reverse,
        )
    }

    /// Resolves once `key` changes after this transaction commits.
    ///
    /// The returned future outlives the handle; it fails with `Cancelled`
    /// if the transaction is reset, retried or cancelled before it commits.
    pub fn watch(&mut self, key: &[u8]) -> FluxResult<FluxFuture<()>> {
        self.lifecycle.lock().begin_operation("watch")?;
        Ok(self.native.watch(key))
    }

    pub fn add_read_conflict_range(&mut self, range: KeyRange) -> FluxResult<()> {
        self.add_conflict_range(ConflictKind::Read, range)
    }

    pub fn add_read_conflict_key(&mut self, key: &[u8]) -> FluxResult<()> {
        self.add_conflict_range(ConflictKind::Read, KeyRange::single_key(key))
    }

    pub fn add_write_conflict_range(&mut self, range: KeyRange) -> FluxResult<()> {
        self.add_conflict_range(ConflictKind::Write, range)
    }

    pub fn add_write_conflict_key(&mut self, key: &[u8]) -> FluxResult<()> {
        self.add_conflict_range(ConflictKind::Write, KeyRange::single_key(key))
    }

    fn add_conflict_range(&mut self, kind: ConflictKind, range: KeyRange) -> FluxResult<()> {
        self.lifecycle.lock().begin_operation("add_conflict_range")?;
        self.native.add_conflict_range(kind, range)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> FluxResult<()> {
        self.lifecycle.lock().begin_operation("set")?;
        self.native.set(key, value)
    }

    pub fn clear(&mut self, key: &[u8]) -> FluxResult<()> {
        self.lifecycle.lock().begin_operation("clear")?;
        self.native.clear(key)
    }

    pub fn clear_range(&mut self, range: &KeyRange) -> FluxResult<()> {
        self.lifecycle.lock().begin_operation("clear_range")?;
        self.native.clear_range(range)
    }

    /// Buffer an atomic mutation; ops on one key compose in submission order.
    pub fn atomic_op(&mut self, key: &[u8], operand: &[u8], op: MutationType) -> FluxResult<()> {
        self.lifecycle.lock().begin_operation("atomic_op")?;
        self.native.atomic_op(key, operand, op)
    }

    /// Submit buffered mutations and conflict ranges atomically.
    pub fn commit(&mut self) -> FluxResult<FluxFuture<()>> {
        let generation = self.lifecycle.lock().begin_commit()?;
        debug!(generation, "transaction commit submitted");

        let lifecycle = Arc::clone(&self.lifecycle);
        let committed = self.native.commit().map(move |result| {
            lifecycle.lock().finish_commit(generation, &result);
            match &result {
                Ok(version) => debug!(version, "transaction committed"),
                Err(e) => debug!(code = e.code(), error = %e, "transaction commit failed"),
            }
            result.map(|_| ())
        });
        Ok(self.track(committed))
    }

    /// Commit version; `INVALID_VERSION` for a commit that wrote nothing.
    pub fn get_committed_version(&self) -> FluxResult<Version> {
        self.lifecycle.lock().committed_version()
    }

    /// Versionstamp of the eventual commit; resolves when the commit does.
    pub fn get_versionstamp(&mut self) -> FluxResult<FluxFuture<Versionstamp>> {
        if self.phase() == TransactionPhase::Cancelled {
            return Err(FluxError::TransactionCancelled);
        }
        let future = self.native.versionstamp();
        Ok(self.track(future))
    }

    pub fn set_option(&mut self, option: TransactionOption) -> FluxResult<()> {
        option.validate()?;
        if self.phase() == TransactionPhase::Cancelled {
            return Err(FluxError::TransactionCancelled);
        }
        trace!(code = option.code(), "transaction option set");
        self.native.set_option(&option)
    }

    /// Option in its raw `(code, bytes)` form.
    pub fn set_raw_option(&mut self, code: i32, value: Option<&[u8]>) -> FluxResult<()> {
        let option = TransactionOption::from_raw(code, value)?;
        self.set_option(option)
    }

    /// Retry protocol.
    ///
    /// For a retryable error the handle is reset and the returned future
    /// resolves after the engine's backoff delay; the caller then re-issues
    /// the whole transaction. For anything else the future resolves to
    /// `error` and the transaction stays errored.
    pub fn on_error(&mut self, error: &FluxError) -> FluxResult<FluxFuture<()>> {
        let generation = self.lifecycle.lock().begin_retry()?;
        self.cancel_in_flight();
        debug!(code = error.code(), class = ?error.class(), "transaction on_error");

        let lifecycle = Arc::clone(&self.lifecycle);
        let retry = self.native.on_error(error).map(move |result| {
            lifecycle.lock().finish_retry(generation, &result);
            result
        });
        Ok(self.track(retry))
    }

    /// Idempotent. In-flight futures resolve to `Cancelled`; later
    /// operations fail with `TransactionCancelled` until `reset`.
    pub fn cancel(&mut self) {
        if self.phase() == TransactionPhase::Cancelled {
            return;
        }
        self.lifecycle.lock().cancel();
        self.cancel_in_flight();
        self.native.cancel();
        debug!("transaction cancelled");
    }

    /// Discard conflict ranges, mutations and the read version.
    pub fn reset(&mut self) {
        self.lifecycle.lock().reset();
        self.cancel_in_flight();
        self.native.reset();
        trace!("transaction reset");
    }

    fn track<T: Send + 'static>(&mut self, future: FluxFuture<T>) -> FluxFuture<T> {
        self.in_flight.retain(CancelHandle::is_pending);
        self.in_flight.push(future.cancel_handle());
        future
    }

    fn cancel_in_flight(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.cancel();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("phase", &self.phase())
            .field("in_flight", &self.in_flight.len())
            .field("database", &self.database.descriptor())
            .finish()
    }
}
