//! Process-scoped entry point: version selection, network bootstrap and
//! database creation.
//!
//! The API version is recorded once per process, and only one network may
//! ever be set up in it. Selecting a version again is refused once that has
//! happened. Every [`Api`] value wraps one engine and owns that engine's
//! network lifecycle:
//!
//! ```text
//! Idle ──setup_network──▶ Ready ──run_network──▶ Running ──(loop exits)──▶ Stopped
//! ```
//!
//! Operating before setup fails with `NetworkNotSetup`; a second setup or
//! run fails with `NetworkAlreadySetup`.

use crate::database::DatabaseContext;
use crate::error::{ErrorPredicate, FluxError, FluxResult};
use crate::native::Engine;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, instrument, warn};

/// Newest API version this build speaks.
pub const API_VERSION: u32 = 710;

/// Oldest API version still accepted.
pub const MIN_API_VERSION: u32 = 600;

static SELECTED_VERSION: OnceLock<u32> = OnceLock::new();
static NETWORK_CLAIMED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkState {
    Idle,
    Ready,
    Running,
    Stopped,
}

/// Handle to the client library for one engine.
pub struct Api {
    version: u32,
    engine: Arc<dyn Engine>,
    network: Mutex<NetworkState>,
}

impl Api {
    /// Select the API version and bind an engine.
    ///
    /// The first successful call records the version for the whole process;
    /// later calls must ask for the same one, and all fail once a network
    /// has been set up.
    #[instrument(skip(engine), fields(engine = engine.name()))]
    pub fn select_api_version(version: u32, engine: Arc<dyn Engine>) -> FluxResult<Arc<Self>> {
        record_version(&SELECTED_VERSION, &NETWORK_CLAIMED, version)?;
        info!(version, "API version selected");
        Ok(Arc::new(Self {
            version,
            engine,
            network: Mutex::new(NetworkState::Idle),
        }))
    }

    /// Version compiled into this build.
    pub fn header_version() -> u32 {
        API_VERSION
    }

    /// Version selected by the caller.
    pub fn api_version(&self) -> u32 {
        self.version
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn setup_network(&self) -> FluxResult<()> {
        let mut state = self.network.lock();
        if *state != NetworkState::Idle {
            return Err(FluxError::NetworkAlreadySetup);
        }
        claim_network(&NETWORK_CLAIMED)?;
        if let Err(e) = self.engine.setup_network() {
            NETWORK_CLAIMED.store(false, Ordering::Release);
            return Err(e);
        }
        *state = NetworkState::Ready;
        debug!(engine = self.engine.name(), "network set up");
        Ok(())
    }

    /// Drive the engine's event loop on the calling thread until
    /// [`stop_network`](Self::stop_network) is called from elsewhere.
    pub fn run_network(&self) -> FluxResult<()> {
        {
            let mut state = self.network.lock();
            match *state {
                NetworkState::Idle => return Err(FluxError::NetworkNotSetup),
                NetworkState::Running | NetworkState::Stopped => {
                    return Err(FluxError::NetworkAlreadySetup);
                }
                NetworkState::Ready => *state = NetworkState::Running,
            }
        }

        info!(engine = self.engine.name(), "network running");
        let result = self.engine.run_network();
        *self.network.lock() = NetworkState::Stopped;
        match &result {
            Ok(()) => info!(engine = self.engine.name(), "network stopped"),
            Err(e) => warn!(engine = self.engine.name(), error = %e, "network loop failed"),
        }
        result
    }

    /// Ask the event loop to return. Idempotent once the network is set up.
    pub fn stop_network(&self) -> FluxResult<()> {
        if *self.network.lock() == NetworkState::Idle {
            return Err(FluxError::NetworkNotSetup);
        }
        self.engine.stop_network()
    }

    /// Set up the network and run it on a dedicated thread.
    pub fn start_network_thread(self: &Arc<Self>) -> FluxResult<NetworkThread> {
        self.setup_network()?;
        let api = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.engine.network_thread_name())
            .spawn(move || api.run_network())
            .map_err(|e| FluxError::Internal(format!("cannot spawn network thread: {e}")))?;
        Ok(NetworkThread {
            api: Arc::clone(self),
            handle: Some(handle),
        })
    }

    /// Open a database. The descriptor goes to the engine untouched.
    #[instrument(skip(self))]
    pub fn create_database(&self, descriptor: &str) -> FluxResult<Arc<DatabaseContext>> {
        if *self.network.lock() == NetworkState::Idle {
            return Err(FluxError::NetworkNotSetup);
        }
        let native = self.engine.create_database(descriptor)?;
        Ok(DatabaseContext::new(native, descriptor))
    }

    /// Classify `error` against `predicate`. No side effects.
    pub fn evaluate_predicate(&self, predicate: ErrorPredicate, error: &FluxError) -> bool {
        self.engine.evaluate_predicate(predicate, error.code())
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("version", &self.version)
            .field("engine", &self.engine.name())
            .field("network", &*self.network.lock())
            .finish()
    }
}

fn record_version(cell: &OnceLock<u32>, network: &AtomicBool, version: u32) -> FluxResult<()> {
    if !(MIN_API_VERSION..=API_VERSION).contains(&version) {
        return Err(FluxError::ApiVersionNotSupported {
            requested: version,
            min: MIN_API_VERSION,
            max: API_VERSION,
        });
    }
    let current = *cell.get_or_init(|| version);
    if current != version || network.load(Ordering::Acquire) {
        return Err(FluxError::ApiVersionAlreadySet {
            current,
            requested: version,
        });
    }
    Ok(())
}

/// One network per process.
fn claim_network(network: &AtomicBool) -> FluxResult<()> {
    network
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| FluxError::NetworkAlreadySetup)
}

/// Network loop running on its own thread.
///
/// Stopped and joined by [`stop`](Self::stop), or on drop.
pub struct NetworkThread {
    api: Arc<Api>,
    handle: Option<JoinHandle<FluxResult<()>>>,
}

impl NetworkThread {
    /// Stop the loop and wait for the thread; returns the loop's result.
    pub fn stop(mut self) -> FluxResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> FluxResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.api.stop_network()?;
        handle
            .join()
            .map_err(|_| FluxError::Internal("network thread panicked".into()))?
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "network thread shutdown failed");
        }
    }
}

impl fmt::Debug for NetworkThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkThread")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
