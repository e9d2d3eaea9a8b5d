use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a relay process.
///
/// The filter is read from `RUST_LOG` and falls back to `info` when the
/// variable is unset. Call this once at process startup; later calls panic
/// because the global subscriber can only be installed once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test: installation happens once per process and
/// output is routed through the test writer so it interleaves with test
/// captures instead of raw stdout.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::DEBUG.to_string()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
