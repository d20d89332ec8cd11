//! Transaction lifecycle state machine.
//!
//! ```text
//! Created ──first op──▶ Active ──commit──▶ Committing ──ok──▶ Committed
//!    ▲                    ▲                     │
//!    │                    │                    err
//!    │                    └──on_error ok── Errored ◀┘
//!    └──────────── reset (from any phase) ─────────
//! cancel (from any phase) ──▶ Cancelled
//! ```
//!
//! Continuations of commit and on_error futures carry the generation they
//! were issued in; a reset or retry bumps the generation so stale
//! completions cannot move the handle.

use crate::error::{FluxError, FluxResult};
use crate::types::Version;
use std::fmt;

/// Where a transaction handle is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    /// Fresh or reset; nothing issued yet
    Created,
    /// At least one operation issued
    Active,
    /// Commit submitted and not yet resolved
    Committing,
    /// Commit succeeded
    Committed,
    /// Commit or retry failed; only `on_error` or `reset` revive it
    Errored,
    /// Cancelled by the caller; only `reset` revives it
    Cancelled,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionPhase::Created => "created",
            TransactionPhase::Active => "active",
            TransactionPhase::Committing => "committing",
            TransactionPhase::Committed => "committed",
            TransactionPhase::Errored => "errored",
            TransactionPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    phase: TransactionPhase,
    committed_version: Option<Version>,
    generation: u64,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            phase: TransactionPhase::Created,
            committed_version: None,
            generation: 0,
        }
    }

    pub(crate) fn phase(&self) -> TransactionPhase {
        self.phase
    }

    /// Gate for reads, writes and conflict ranges. Moves `Created` to `Active`.
    pub(crate) fn begin_operation(&mut self, operation: &str) -> FluxResult<()> {
        match self.phase {
            TransactionPhase::Created => {
                self.phase = TransactionPhase::Active;
                Ok(())
            }
            TransactionPhase::Active => Ok(()),
            TransactionPhase::Committing => Err(FluxError::UsedDuringCommit),
            TransactionPhase::Cancelled => Err(FluxError::TransactionCancelled),
            phase @ (TransactionPhase::Committed | TransactionPhase::Errored) => {
                Err(FluxError::invalid_operation(
                    format!("{operation} issued on a {phase} transaction"),
                    "reset the transaction or call on_error first",
                ))
            }
        }
    }

    /// Read-version access is refused once a commit has started.
    pub(crate) fn begin_read_version(&mut self, operation: &str) -> FluxResult<()> {
        match self.phase {
            TransactionPhase::Committing | TransactionPhase::Committed => {
                Err(FluxError::UsedDuringCommit)
            }
            _ => self.begin_operation(operation),
        }
    }

    /// Returns the generation the commit completion must match.
    pub(crate) fn begin_commit(&mut self) -> FluxResult<u64> {
        self.begin_operation("commit")?;
        self.phase = TransactionPhase::Committing;
        Ok(self.generation)
    }

    pub(crate) fn finish_commit(&mut self, generation: u64, result: &FluxResult<Version>) {
        if generation != self.generation || self.phase != TransactionPhase::Committing {
            return;
        }
        match result {
            Ok(version) => {
                self.phase = TransactionPhase::Committed;
                self.committed_version = Some(*version);
            }
            Err(_) => self.phase = TransactionPhase::Errored,
        }
    }

    /// `on_error` resets the handle; the retry lives in a new generation.
    pub(crate) fn begin_retry(&mut self) -> FluxResult<u64> {
        if self.phase == TransactionPhase::Cancelled {
            return Err(FluxError::TransactionCancelled);
        }
        self.generation += 1;
        self.phase = TransactionPhase::Errored;
        self.committed_version = None;
        Ok(self.generation)
    }

    pub(crate) fn finish_retry(&mut self, generation: u64, result: &FluxResult<()>) {
        if generation != self.generation || self.phase != TransactionPhase::Errored {
            return;
        }
        if result.is_ok() {
            self.phase = TransactionPhase::Active;
        }
    }

    pub(crate) fn cancel(&mut self) {
        self.phase = TransactionPhase::Cancelled;
    }

    pub(crate) fn reset(&mut self) {
        self.generation += 1;
        self.phase = TransactionPhase::Created;
        self.committed_version = None;
    }

    pub(crate) fn committed_version(&self) -> FluxResult<Version> {
        match (self.phase, self.committed_version) {
            (TransactionPhase::Committed, Some(version)) => Ok(version),
            _ => Err(FluxError::NoCommitVersion),
        }
    }
}
