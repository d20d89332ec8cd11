// API singleton: version selection and the process's one network
//
// Version selection and network setup are process-wide, so the whole
// lifecycle runs in order inside a single test.

use fluxkv_core::{API_VERSION, Api, FluxError, FluxResult, MIN_API_VERSION, MemoryEngine};
use std::sync::Arc;
use std::thread;

fn engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::default())
}

fn select_versions() -> FluxResult<Arc<Api>> {
    let api = Api::select_api_version(API_VERSION, engine())?;
    assert_eq!(api.api_version(), API_VERSION);
    assert_eq!(Api::header_version(), API_VERSION);

    // Re-selecting the same version is fine; a different one is not.
    Api::select_api_version(API_VERSION, engine())?;
    assert_eq!(
        Api::select_api_version(MIN_API_VERSION, engine()).unwrap_err(),
        FluxError::ApiVersionAlreadySet {
            current: API_VERSION,
            requested: MIN_API_VERSION,
        }
    );

    assert!(matches!(
        Api::select_api_version(API_VERSION + 1, engine()).unwrap_err(),
        FluxError::ApiVersionNotSupported { .. }
    ));
    assert!(matches!(
        Api::select_api_version(MIN_API_VERSION - 1, engine()).unwrap_err(),
        FluxError::ApiVersionNotSupported { .. }
    ));
    Ok(api)
}

fn network_must_be_set_up_first(api: &Api) {
    assert_eq!(api.create_database("memory://x").unwrap_err(), FluxError::NetworkNotSetup);
    assert_eq!(api.run_network().unwrap_err(), FluxError::NetworkNotSetup);
    assert_eq!(api.stop_network().unwrap_err(), FluxError::NetworkNotSetup);
}

fn only_one_network_per_process(api: &Api, spare: &Arc<Api>) -> FluxResult<()> {
    api.setup_network()?;
    assert_eq!(api.setup_network().unwrap_err(), FluxError::NetworkAlreadySetup);

    assert_eq!(spare.setup_network().unwrap_err(), FluxError::NetworkAlreadySetup);
    assert_eq!(
        spare.start_network_thread().unwrap_err(),
        FluxError::NetworkAlreadySetup
    );
    assert_eq!(
        Api::select_api_version(API_VERSION, engine()).unwrap_err(),
        FluxError::ApiVersionAlreadySet {
            current: API_VERSION,
            requested: API_VERSION,
        }
    );
    Ok(())
}

fn run_network_blocks_until_stopped(api: &Arc<Api>) -> FluxResult<()> {
    let runner = Arc::clone(api);
    let handle = thread::spawn(move || runner.run_network());
    api.stop_network()?;
    api.stop_network()?;
    handle
        .join()
        .map_err(|_| FluxError::Internal("network thread panicked".into()))??;

    // The loop runs once per process.
    assert_eq!(api.run_network().unwrap_err(), FluxError::NetworkAlreadySetup);
    assert_eq!(
        api.start_network_thread().unwrap_err(),
        FluxError::NetworkAlreadySetup
    );
    Ok(())
}

#[test]
fn test_process_lifecycle() -> FluxResult<()> {
    fluxkv_core::logging::init_test();
    let api = select_versions()?;
    let spare = Api::select_api_version(API_VERSION, engine())?;

    network_must_be_set_up_first(&api);
    only_one_network_per_process(&api, &spare)?;
    api.create_database("memory://x")?;
    assert_eq!(
        spare.create_database("memory://x").unwrap_err(),
        FluxError::NetworkNotSetup
    );
    run_network_blocks_until_stopped(&api)
}
