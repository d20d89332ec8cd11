//! Logging utilities for fluxkv
//!
//! The library only emits `tracing` events. With the `logging` feature these
//! helpers install a `tracing-subscriber` formatter; without it they do
//! nothing.
//!
//! Filters come from `FLUXKV_LOG`, then `RUST_LOG`, then the level passed in.
//! A bare level applies to fluxkv only; other crates stay at `warn`.

/// Checked before `RUST_LOG`.
pub const LOG_ENV: &str = "FLUXKV_LOG";

/// Filter directives for `level`: fluxkv at `level`, everything else at
/// `warn`. Anything that already names a target is used as given.
pub fn directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("warn,fluxkv_core={level}")
    }
}

/// Initialize logging at `info`.
///
/// # Example
/// ```rust
/// fluxkv_core::logging::init();
/// ```
pub fn init() {
    init_with_level("info")
}

/// Initialize logging at `level` (trace, debug, info, warn, error) unless
/// the environment says otherwise.
///
/// Network-thread events carry the thread name, so thread names are on.
pub fn init_with_level(level: &str) {
    #[cfg(feature = "logging")]
    {
        use tracing_subscriber::{EnvFilter, fmt};

        let configured = std::env::var(LOG_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| level.to_string());
        let filter = EnvFilter::try_new(directives(&configured))
            .unwrap_or_else(|_| EnvFilter::new(directives("info")));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .try_init();
    }
    #[cfg(not(feature = "logging"))]
    let _ = level;
}

/// Initialize logging for tests: fluxkv at `debug`, captured per test.
pub fn init_test() {
    #[cfg(feature = "logging")]
    {
        use tracing_subscriber::{EnvFilter, fmt};

        let _ = fmt()
            .with_env_filter(EnvFilter::new(directives("debug")))
            .with_thread_names(true)
            .with_test_writer()
            .try_init();
    }
}
