//! Selects and owns the async runtime backing this crate.
//!
//! Other pluggable backends behind feature flags (`async_runtime_tokio`,
//! `async_runtime_async_std`) are possible in principle; this crate commits
//! to tokio only, since the TLS stack (`tokio-rustls`) and the
//! cancellation primitive (`tokio_util::sync::CancellationToken`) are
//! both tokio-native.

pub mod tokio;

use std::sync::OnceLock;

use self::tokio::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Builds the global tokio runtime and keeps it alive for the life of the
/// process. Calling this more than once is a no-op past the first call.
pub fn init(num_threads: usize) -> Result<(), ()> {
    if RUNTIME.get().is_some() {
        return Ok(());
    }
    let rt = tokio::init(num_threads)?;
    // if another thread raced us, drop our runtime and keep theirs
    let _ = RUNTIME.set(rt);
    Ok(())
}

/// Returns a handle to the global runtime, for use outside of an
/// already-running tokio task (e.g. a synchronous `main`).
pub fn handle() -> Option<::tokio::runtime::Handle> {
    RUNTIME.get().map(|rt| rt.handle().clone())
}
