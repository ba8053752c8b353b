//! Logger initialization shared by binaries and end-to-end tests.
//!
//! Call sites log through the `tracing` macros; this crate only owns the
//! subscriber setup. The filter comes from `RUST_LOG` when set and falls
//! back to `info`.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. Safe to call more than once: later
/// calls are no-ops.
pub fn init() {
    let _ = try_init();
}

/// Like [`init`], but reports whether this call installed the subscriber.
pub fn try_init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .is_ok()
}
