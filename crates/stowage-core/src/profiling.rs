//! Profiling utilities based on the `puffin` crate.
//!
//! Scopes are compiled in everywhere but cost next to nothing until
//! [`set_enabled`] turns them on.

pub use puffin::{GlobalProfiler, profile_function, profile_scope};

#[cfg(feature = "profiling-server")]
use std::sync::OnceLock;

/// Global profiling server instance.
#[cfg(feature = "profiling-server")]
static PROFILING_SERVER: OnceLock<puffin_http::Server> = OnceLock::new();

/// Turn puffin scope collection on or off.
pub fn set_enabled(enabled: bool) {
    puffin::set_scopes_on(enabled);
}

/// Enable scopes and serve them to `puffin_viewer` on `addr`.
///
/// # Example
/// ```no_run
/// stowage_core::profiling::init_profiling("0.0.0.0:8585");
/// ```
#[cfg(feature = "profiling-server")]
pub fn init_profiling(addr: &str) {
    puffin::set_scopes_on(true);

    match puffin_http::Server::new(addr) {
        Ok(server) => {
            tracing::info!("Puffin profiler server started on http://{}", addr);
            let _ = PROFILING_SERVER.set(server);
        }
        Err(e) => {
            tracing::error!("Failed to start puffin server: {}", e);
        }
    }
}

/// Mark the start of a new engine tick for profiling.
#[inline]
pub fn new_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}
