use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! debug_panic {
    ($($arg:tt)*) => ( if cfg!(debug_assertions) { panic!($($arg)*); } else { $crate::tracing::error!($($arg)*); } );
}

/// Installs the global `tracing` subscriber.
///
/// The filter is read from `STRATA_LOG`, then `RUST_LOG`, and defaults to `info`.
/// Calling this more than once is harmless, later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("STRATA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
