//! Engine call interface.
//!
//! The client core never touches storage directly. Every read, write and
//! commit goes through these traits; an engine answers synchronously for
//! local bookkeeping and with a [`FluxFuture`] for anything it resolves out
//! of band on its network thread.
//!
//! Implementations must uphold the future contract: every returned future
//! eventually resolves, and dropping an engine object resolves whatever it
//! still owes (`Cancelled` or `BrokenPromise`).

use crate::error::{ErrorPredicate, FluxError, FluxResult};
use crate::future::FluxFuture;
use crate::types::{
    ConflictKind, DatabaseOption, GetRangeLimits, KeyRange, KeySelector, MutationType,
    RangeResult, TransactionOption, Version, Versionstamp,
};
use bytes::Bytes;

/// Process-level engine entry point: event loop and database handles.
pub trait Engine: Send + Sync {
    /// Short name used in log events.
    fn name(&self) -> &str;

    /// Prepare the event loop. Called at most once.
    fn setup_network(&self) -> FluxResult<()>;

    /// Drive the event loop on the calling thread until `stop_network`.
    fn run_network(&self) -> FluxResult<()>;

    /// Ask a running (or not yet running) loop to return. Idempotent.
    fn stop_network(&self) -> FluxResult<()>;

    /// Thread name used by `Api::start_network_thread`.
    fn network_thread_name(&self) -> String {
        format!("{}-network", self.name())
    }

    /// Open a database. The descriptor is opaque to the core.
    fn create_database(&self, descriptor: &str) -> FluxResult<Box<dyn NativeDatabase>>;

    /// Classify an error code. Pure.
    fn evaluate_predicate(&self, predicate: ErrorPredicate, code: i32) -> bool {
        predicate.matches_code(code)
    }
}

/// One open database.
pub trait NativeDatabase: Send + Sync {
    fn create_transaction(&self) -> FluxResult<Box<dyn NativeTransaction>>;

    fn set_option(&self, option: &DatabaseOption) -> FluxResult<()>;
}

/// One transaction handle.
///
/// Conflict ranges, buffered mutations and the read-your-writes view live on
/// the engine side; the core only orders calls and enforces the lifecycle.
pub trait NativeTransaction: Send {
    fn set_read_version(&mut self, version: Version) -> FluxResult<()>;

    fn get_read_version(&mut self) -> FluxFuture<Version>;

    fn get(&mut self, key: &[u8], snapshot: bool) -> FluxFuture<Option<Bytes>>;

    fn get_key(&mut self, selector: &KeySelector, snapshot: bool) -> FluxFuture<Bytes>;

    fn get_range(
        &mut self,
        begin: &KeySelector,
        end: &KeySelector,
        limits: GetRangeLimits,
        snapshot: bool,
        reverse: bool,
    ) -> FluxFuture<RangeResult>;

    /// Resolves when the key changes after this transaction commits.
    fn watch(&mut self, key: &[u8]) -> FluxFuture<()>;

    fn add_conflict_range(&mut self, kind: ConflictKind, range: KeyRange) -> FluxResult<()>;

    fn set(&mut self, key: &[u8], value: &[u8]) -> FluxResult<()>;

    fn clear(&mut self, key: &[u8]) -> FluxResult<()>;

    fn clear_range(&mut self, range: &KeyRange) -> FluxResult<()>;

    fn atomic_op(&mut self, key: &[u8], operand: &[u8], op: MutationType) -> FluxResult<()>;

    /// Resolves to the commit version, or `INVALID_VERSION` for a read-only
    /// transaction.
    fn commit(&mut self) -> FluxFuture<Version>;

    /// Resolves once the commit that produces the stamp completes.
    fn versionstamp(&mut self) -> FluxFuture<Versionstamp>;

    fn set_option(&mut self, option: &TransactionOption) -> FluxResult<()>;

    /// Resets the handle and resolves after the retry delay when `error` is
    /// retryable; resolves to `error` otherwise.
    fn on_error(&mut self, error: &FluxError) -> FluxFuture<()>;

    /// Fail outstanding engine work; the handle accepts nothing afterwards.
    fn cancel(&mut self);

    /// Discard buffered state and the read version.
    fn reset(&mut self);
}
