//! # fluxkv: asynchronous transactional key-value client core
//!
//! fluxkv is the client side of an ordered, transactional key-value store.
//! Every engine call returns a [`FluxFuture`]; transactions buffer writes and
//! conflict ranges and commit them atomically with optimistic concurrency.
//! The [`memory`] engine is a complete in-process reference implementation.
//!
//! ## Quick start
//!
//! ```rust
//! use fluxkv_core::{Api, MemoryEngine, API_VERSION};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fluxkv_core::FluxResult<()> {
//! let api = Api::select_api_version(API_VERSION, Arc::new(MemoryEngine::default()))?;
//! let network = api.start_network_thread()?;
//! let db = api.create_database("memory://quickstart")?;
//!
//! let mut tx = db.create_transaction()?;
//! tx.set(b"hello", b"world")?;
//! tx.commit()?.await?;
//!
//! let mut tx = db.create_transaction()?;
//! assert_eq!(tx.get(b"hello", false)?.await?.as_deref(), Some(&b"world"[..]));
//! # drop(tx);
//! network.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry loop
//!
//! The core never retries on its own. Callers drive the protocol with
//! [`Transaction::on_error`]:
//!
//! ```rust,no_run
//! # use fluxkv_core::{DatabaseContext, FluxResult};
//! # use std::sync::Arc;
//! # async fn increment(db: Arc<DatabaseContext>) -> FluxResult<()> {
//! let mut tx = db.create_transaction()?;
//! loop {
//!     let attempt = async {
//!         let current = tx.get(b"counter", false)?.await?;
//!         let next = current.map_or(1u64, |v| u64::from_le_bytes(v[..8].try_into().unwrap()) + 1);
//!         tx.set(b"counter", &next.to_le_bytes())?;
//!         tx.commit()?.await
//!     };
//!     match attempt.await {
//!         Ok(()) => return Ok(()),
//!         Err(e) => tx.on_error(&e)?.await?,
//!     }
//! }
//! # }
//! ```
//!
//! ## Module layout
//!
//! - [`api`]: version selection, network lifecycle ([`Api`])
//! - [`database`]: [`DatabaseContext`]
//! - [`transaction`]: [`Transaction`] and its lifecycle
//! - [`future`]: [`FluxFuture`] / [`Promise`]
//! - [`types`]: selectors, ranges, conflict sets, mutations, options
//! - [`native`]: the engine boundary traits
//! - [`memory`]: in-memory reference engine
//! - [`config`]: [`ClientConfig`]

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod future;
pub mod memory;
pub mod native;
pub mod transaction;
pub mod types;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use api::{API_VERSION, Api, MIN_API_VERSION, NetworkThread};
pub use config::ClientConfig;
pub use database::DatabaseContext;
pub use error::{ErrorClass, ErrorPredicate, FluxError, FluxResult};
pub use future::{CancelHandle, FluxFuture, Promise, promise};
pub use memory::MemoryEngine;
pub use transaction::{Transaction, TransactionPhase};
pub use types::*;
