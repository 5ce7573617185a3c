//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber writing to stderr
///
/// `RUST_LOG` takes precedence over `default_level`. Returns `false` if a
/// subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`] but captured by the test harness
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
