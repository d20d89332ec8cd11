//! Database handles.

use crate::error::FluxResult;
use crate::native::NativeDatabase;
use crate::transaction::Transaction;
use crate::types::DatabaseOption;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Shared handle to one engine database.
///
/// Always held in an `Arc`. Each transaction keeps a clone, so the native
/// database is released only after the last transaction created from it
/// is gone.
pub struct DatabaseContext {
    native: Box<dyn NativeDatabase>,
    descriptor: String,
}

impl DatabaseContext {
    /// Wrap an engine database opened with `descriptor`.
    pub fn new(native: Box<dyn NativeDatabase>, descriptor: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            native,
            descriptor: descriptor.into(),
        })
    }

    /// Connection descriptor, exactly as passed to the engine.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Mint a fresh transaction bound to this database.
    #[instrument(skip(self), fields(descriptor = %self.descriptor))]
    pub fn create_transaction(self: &Arc<Self>) -> FluxResult<Transaction> {
        let native = self.native.create_transaction()?;
        Ok(Transaction::new(native, Arc::clone(self)))
    }

    pub fn set_option(&self, option: DatabaseOption) -> FluxResult<()> {
        option.validate()?;
        debug!(descriptor = %self.descriptor, code = option.code(), "database option set");
        self.native.set_option(&option)
    }

    /// Option in its raw `(code, bytes)` form. Unknown codes fail with
    /// `InvalidOption`, malformed parameters with `InvalidOptionValue`.
    pub fn set_raw_option(&self, code: i32, value: Option<&[u8]>) -> FluxResult<()> {
        let option = DatabaseOption::from_raw(code, value)?;
        self.set_option(option)
    }
}

impl Drop for DatabaseContext {
    fn drop(&mut self) {
        debug!(descriptor = %self.descriptor, "database handle released");
    }
}

impl fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
