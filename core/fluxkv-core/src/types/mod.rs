//! Value types shared by the client core and engines: keys, selectors,
//! ranges, conflict sets, mutations, versions and options.

pub mod conflict;
pub mod key_selector;
pub mod mutation;
pub mod options;
pub mod range;
pub mod version;

pub use conflict::{ConflictKind, ConflictSet};
pub use key_selector::{KEYSPACE_END, KeySelector};
pub use mutation::{Mutation, MutationType};
pub use options::{DatabaseOption, TransactionOption};
pub use range::{GetRangeLimits, KeyRange, KeyValue, RangeResult, StreamingMode, key_after, strinc};
pub use version::{INVALID_VERSION, VERSIONSTAMP_LEN, Version, Versionstamp};
