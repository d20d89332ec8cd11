//! In-memory reference engine.
//!
//! A complete engine behind the [`native`](crate::native) traits: an event
//! loop on tokio, an MVCC store on a lock-free skip list, a conflict
//! resolver and a watch registry. Databases opened with the same descriptor
//! share one cluster, so two handles on `"memory://a"` see each other's
//! commits while `"memory://b"` is independent.
//!
//! ```rust,no_run
//! use fluxkv_core::{Api, MemoryEngine, API_VERSION};
//! use std::sync::Arc;
//!
//! # fn main() -> fluxkv_core::FluxResult<()> {
//! let api = Api::select_api_version(API_VERSION, Arc::new(MemoryEngine::default()))?;
//! let network = api.start_network_thread()?;
//! let db = api.create_database("memory://demo")?;
//! let _tx = db.create_transaction()?;
//! network.stop()?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod atomic;
pub(crate) mod cluster;
pub(crate) mod database;
pub(crate) mod network;
pub(crate) mod oracle;
pub(crate) mod store;
pub(crate) mod transaction;
pub(crate) mod write_map;

use crate::config::ClientConfig;
use crate::error::FluxResult;
use crate::native::{Engine, NativeDatabase};
use cluster::Cluster;
use dashmap::DashMap;
use database::MemoryDatabase;
use network::Network;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

pub use atomic::{KEY_SIZE_LIMIT, VALUE_SIZE_LIMIT};

pub struct MemoryEngine {
    config: ClientConfig,
    network: Network,
    clusters: DashMap<String, Arc<Cluster>>,
    next_database_id: AtomicU64,
}

impl MemoryEngine {
    #[instrument(skip(config), fields(mvcc_window = config.mvcc_window))]
    pub fn new(config: ClientConfig) -> Self {
        info!("memory engine created");
        Self {
            config,
            network: Network::new(),
            clusters: DashMap::new(),
            next_database_id: AtomicU64::new(1),
        }
    }

    /// Engine configured from `FLUXKV_*` environment variables.
    pub fn from_env() -> FluxResult<Self> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of distinct descriptors opened so far.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn setup_network(&self) -> FluxResult<()> {
        self.network.setup()
    }

    fn run_network(&self) -> FluxResult<()> {
        self.network.run()
    }

    fn stop_network(&self) -> FluxResult<()> {
        self.network.stop();
        Ok(())
    }

    fn network_thread_name(&self) -> String {
        self.config.network_thread_name.clone()
    }

    fn create_database(&self, descriptor: &str) -> FluxResult<Box<dyn NativeDatabase>> {
        let cluster = self
            .clusters
            .entry(descriptor.to_string())
            .or_insert_with(|| {
                debug!(descriptor, "cluster created");
                Arc::new(Cluster::new(descriptor, self.config.mvcc_window))
            })
            .clone();
        let id = self.next_database_id.fetch_add(1, Ordering::Relaxed);
        debug!(descriptor = cluster.descriptor(), id, "database opened");
        Ok(Box::new(MemoryDatabase::new(
            id,
            cluster,
            self.network.handle(),
            &self.config,
        )))
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("clusters", &self.clusters.len())
            .field("config", &self.config)
            .finish()
    }
}
