use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
});

/// Installs a global subscriber once per test binary. Filtered by
/// `RUST_LOG`.
pub(crate) fn init_tracing() {
    Lazy::force(&TRACING);
}
