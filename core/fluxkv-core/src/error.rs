//! Error types for the fluxkv client core.
//!
//! All public APIs return `FluxResult<T>`; library code does not panic.
//! Every error carries the numeric code the engine reports and a
//! classification that drives `Transaction::on_error`.

use thiserror::Error;

/// Unified error type for all fluxkv operations.
///
/// Errors are `Clone` because the same failure may be delivered to several
/// futures (for example every in-flight read of a cancelled transaction).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FluxError {
    /// Read version is older than the engine's MVCC window
    #[error("transaction is too old to perform reads or be committed")]
    TransactionTooOld,

    /// Requested read version is newer than any committed version
    #[error("request for future version {requested} (latest committed {latest})")]
    FutureVersion { requested: i64, latest: i64 },

    /// Commit-time conflict with a concurrently committed transaction
    #[error("transaction not committed due to conflict with another transaction")]
    NotCommitted,

    /// The commit may or may not have been applied
    #[error("transaction may or may not have committed")]
    CommitUnknownResult,

    /// Operation issued on a cancelled transaction
    #[error("operation aborted because the transaction was cancelled")]
    TransactionCancelled,

    /// Transaction-level timeout elapsed
    #[error("operation aborted because the transaction timed out")]
    TransactionTimedOut,

    /// Watch limit of the database reached
    #[error("too many watches currently set (limit {limit})")]
    TooManyWatches { limit: usize },

    /// Read of a key whose value is only known after commit
    #[error("read or wrote an unreadable key")]
    AccessedUnreadable,

    /// Engine is lagging behind; retry later
    #[error("storage process does not have recent mutations")]
    ProcessBehind,

    /// The producer of a future went away without resolving it
    #[error("broken promise")]
    BrokenPromise,

    /// Future was cancelled before it resolved
    #[error("asynchronous operation cancelled")]
    Cancelled,

    /// Future was polled after its value was already taken or released
    #[error("future has been released")]
    FutureReleased,

    /// Local precondition violation
    #[error("invalid operation: {message}\nContext: {context}")]
    InvalidOperation { message: String, context: String },

    /// Key at or above the end of the user keyspace
    #[error("key outside legal range")]
    KeyOutsideLegalRange,

    /// Range with `begin > end`
    #[error("range begin key larger than end key")]
    InvertedRange,

    /// Option value has the wrong shape for the option
    #[error("option {code} set to an invalid value: {reason}")]
    InvalidOptionValue { code: i32, reason: String },

    /// Unknown option code
    #[error("option {code} not valid in this context")]
    InvalidOption { code: i32 },

    /// Network operation before `setup_network`
    #[error("network must be set up before this operation")]
    NetworkNotSetup,

    /// Network set up or run more than once
    #[error("network can be configured and run only once")]
    NetworkAlreadySetup,

    /// Read version pinned twice
    #[error("transaction already has a read version set")]
    ReadVersionAlreadySet,

    /// Operation issued while commit is outstanding
    #[error("operation issued while a commit was outstanding")]
    UsedDuringCommit,

    /// Mutation type code not recognised
    #[error("invalid mutation type {0}")]
    InvalidMutationType(i32),

    /// Committed version or versionstamp requested without a committed write
    #[error("transaction has no committed version")]
    NoCommitVersion,

    /// Buffered mutations exceed the size limit
    #[error("transaction exceeds byte limit ({size} > {limit})")]
    TransactionTooLarge { size: usize, limit: usize },

    /// Key longer than the engine accepts
    #[error("key length {0} exceeds limit")]
    KeyTooLarge(usize),

    /// Value longer than the engine accepts
    #[error("value length {0} exceeds limit")]
    ValueTooLarge(usize),

    /// API version selected twice with different values, or again after the
    /// network was set up
    #[error("API version already set to {current}, cannot select {requested}")]
    ApiVersionAlreadySet { current: u32, requested: u32 },

    /// API version outside the supported window
    #[error("API version {requested} not supported (supported {min}..={max})")]
    ApiVersionNotSupported { requested: u32, min: u32, max: u32 },

    /// `StreamingMode::Exact` used without a row limit
    #[error("exact streaming mode requires limits, but none were given")]
    ExactModeWithoutLimits,

    /// Configuration loading or parsing failure
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine-internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for all fluxkv operations.
pub type FluxResult<T> = Result<T, FluxError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry immediately on the reset transaction
    Retryable,
    /// Retry after the backoff delay chosen by `on_error`
    RetryableWithBackoff,
    /// Abandon the logical transaction
    Fatal,
    /// Distinct terminal outcome; never retried
    Cancelled,
}

/// Named error predicates evaluated by `Api::evaluate_predicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPredicate {
    /// The error may go away if the transaction is retried
    Retryable,
    /// The transaction may have committed despite the error
    MaybeCommitted,
    /// Retryable and known not to have committed
    RetryableNotCommitted,
    /// Commit-time read/write conflict
    Conflict,
}

impl ErrorPredicate {
    /// Numeric predicate identifier used at the engine boundary.
    pub fn code(&self) -> i32 {
        match self {
            ErrorPredicate::Retryable => 50000,
            ErrorPredicate::MaybeCommitted => 50001,
            ErrorPredicate::RetryableNotCommitted => 50002,
            ErrorPredicate::Conflict => 50003,
        }
    }

    /// Evaluate the predicate against a raw error code.
    pub fn matches_code(&self, code: i32) -> bool {
        match self {
            ErrorPredicate::Retryable => matches!(code, 1007 | 1009 | 1020 | 1021 | 1037),
            ErrorPredicate::MaybeCommitted => code == 1021,
            ErrorPredicate::RetryableNotCommitted => matches!(code, 1007 | 1009 | 1020 | 1037),
            ErrorPredicate::Conflict => code == 1020,
        }
    }
}

impl FluxError {
    /// Engine error code.
    pub fn code(&self) -> i32 {
        match self {
            FluxError::TransactionTooOld => 1007,
            FluxError::FutureVersion { .. } => 1009,
            FluxError::NotCommitted => 1020,
            FluxError::CommitUnknownResult => 1021,
            FluxError::TransactionCancelled => 1025,
            FluxError::TransactionTimedOut => 1031,
            FluxError::TooManyWatches { .. } => 1032,
            FluxError::AccessedUnreadable => 1036,
            FluxError::ProcessBehind => 1037,
            FluxError::BrokenPromise => 1100,
            FluxError::Cancelled => 1101,
            FluxError::FutureReleased => 1102,
            FluxError::Config(_) => 1510,
            FluxError::InvalidOperation { .. } => 2000,
            FluxError::KeyOutsideLegalRange => 2004,
            FluxError::InvertedRange => 2005,
            FluxError::InvalidOptionValue { .. } => 2006,
            FluxError::InvalidOption { .. } => 2007,
            FluxError::NetworkNotSetup => 2008,
            FluxError::NetworkAlreadySetup => 2009,
            FluxError::ReadVersionAlreadySet => 2010,
            FluxError::UsedDuringCommit => 2017,
            FluxError::InvalidMutationType(_) => 2018,
            FluxError::NoCommitVersion => 2021,
            FluxError::TransactionTooLarge { .. } => 2101,
            FluxError::KeyTooLarge(_) => 2102,
            FluxError::ValueTooLarge(_) => 2103,
            FluxError::ApiVersionAlreadySet { .. } => 2201,
            FluxError::ApiVersionNotSupported { .. } => 2203,
            FluxError::ExactModeWithoutLimits => 2210,
            FluxError::Internal(_) => 4100,
        }
    }

    /// Classification driving the retry protocol.
    pub fn class(&self) -> ErrorClass {
        match self {
            FluxError::TransactionTooOld => ErrorClass::Retryable,
            FluxError::FutureVersion { .. }
            | FluxError::NotCommitted
            | FluxError::CommitUnknownResult
            | FluxError::ProcessBehind => ErrorClass::RetryableWithBackoff,
            FluxError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Fatal,
        }
    }

    /// Shorthand for `ErrorPredicate::Retryable`.
    pub fn is_retryable(&self) -> bool {
        self.matches(ErrorPredicate::Retryable)
    }

    /// True for commit-time read/write conflicts.
    pub fn is_conflict(&self) -> bool {
        self.matches(ErrorPredicate::Conflict)
    }

    /// Evaluate a predicate against this error. Pure; no side effects.
    pub fn matches(&self, predicate: ErrorPredicate) -> bool {
        predicate.matches_code(self.code())
    }

    pub(crate) fn invalid_operation(message: impl Into<String>, context: impl Into<String>) -> Self {
        FluxError::InvalidOperation {
            message: message.into(),
            context: context.into(),
        }
    }
}

impl From<serde_json::Error> for FluxError {
    fn from(err: serde_json::Error) -> Self {
        FluxError::Config(err.to_string())
    }
}

impl From<std::io::Error> for FluxError {
    fn from(err: std::io::Error) -> Self {
        FluxError::Config(err.to_string())
    }
}
