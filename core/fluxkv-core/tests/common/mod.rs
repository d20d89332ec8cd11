// Shared setup for the integration tests.
//
// A process gets one API and one network, so each test binary shares a
// single engine. Every fixture opens a database under a fresh descriptor,
// which keeps clusters apart between tests.

#![allow(dead_code)]

use fluxkv_core::{
    API_VERSION, Api, DatabaseContext, FluxResult, MemoryEngine, NetworkThread,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

static RUNNING: OnceLock<(Arc<Api>, NetworkThread)> = OnceLock::new();
static IDLE: OnceLock<Arc<Api>> = OnceLock::new();
static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);

pub struct Fixture {
    pub db: Arc<DatabaseContext>,
    pub api: Arc<Api>,
}

impl Fixture {
    fn open(api: &Arc<Api>, kind: &str) -> FluxResult<Self> {
        let db = api.create_database(&unique_descriptor(kind))?;
        Ok(Self {
            db,
            api: Arc::clone(api),
        })
    }
}

/// `memory://<kind>-<n>`, never handed out twice in this process.
pub fn unique_descriptor(kind: &str) -> String {
    format!("memory://{kind}-{}", NEXT_DATABASE.fetch_add(1, Ordering::Relaxed))
}

/// Fresh database on the process's running network.
pub fn start() -> FluxResult<Fixture> {
    fluxkv_core::logging::init_test();
    let (api, _) = RUNNING.get_or_init(|| {
        let api = Api::select_api_version(API_VERSION, Arc::new(MemoryEngine::default()))
            .expect("select API version");
        let network = api.start_network_thread().expect("start network");
        (api, network)
    });
    Fixture::open(api, "test")
}

/// Fresh database on a network that is set up but never run: every future
/// stays pending. Cannot share a test binary with [`start`].
pub fn idle() -> FluxResult<Fixture> {
    fluxkv_core::logging::init_test();
    let api = IDLE.get_or_init(|| {
        let api = Api::select_api_version(API_VERSION, Arc::new(MemoryEngine::default()))
            .expect("select API version");
        api.setup_network().expect("set up network");
        api
    });
    Fixture::open(api, "idle")
}

/// Commit `pairs` in one transaction.
pub async fn seed(db: &Arc<DatabaseContext>, pairs: &[(&str, &str)]) -> FluxResult<()> {
    let mut tx = db.create_transaction()?;
    for (key, value) in pairs {
        tx.set(key.as_bytes(), value.as_bytes())?;
    }
    tx.commit()?.await
}

/// Keys of a range result as owned vectors, for readable assertions.
pub fn keys(result: &fluxkv_core::RangeResult) -> Vec<Vec<u8>> {
    result.keys().map(|k| k.to_vec()).collect()
}
