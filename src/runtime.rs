//! Crate-global tokio runtime.
//!
//! The blocking client drives its async I/O on a shared multi-threaded
//! runtime that lives for the rest of the process. The async client never
//! touches it — it runs on whatever runtime the caller provides.

use std::sync::OnceLock;
use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get (or initialize) the global tokio runtime.
///
/// Worker thread count defaults to the number of CPU cores; override with
/// the `RSVALKEY_RUNTIME_THREADS` environment variable.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();

        if let Ok(threads) = std::env::var("RSVALKEY_RUNTIME_THREADS") {
            if let Ok(n) = threads.parse::<usize>() {
                if n > 0 {
                    builder.worker_threads(n);
                }
            }
        }

        match builder.thread_name("rsvalkey-rt").build() {
            Ok(rt) => rt,
            // Runtime creation failure (e.g. ulimit exhaustion) is not
            // recoverable for a blocking client.
            Err(e) => panic!("rsvalkey: failed to create tokio runtime: {e}"),
        }
    })
}

/// Block on a future using the global runtime.
///
/// Must not be called from within an async context (it would panic).
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    get_runtime().block_on(future)
}

/// Spawn a future on the global runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    get_runtime().spawn(future)
}

// ── Tests ──────────────────────────────────────────────────────────
