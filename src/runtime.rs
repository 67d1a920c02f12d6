//! Background Runtime
//!
//! Eviction timers, pressure listeners and offloaded trims run on a small
//! process-wide tokio runtime, independent of whatever executor (if any) the
//! caller uses. If the runtime cannot be built, background work is disabled
//! and the cache keeps working through lazy expiration alone.

use std::future::Future;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Worker threads in the background runtime
pub const BACKGROUND_WORKERS: usize = 2;

/// Thread name prefix for background workers
pub const BACKGROUND_THREAD_NAME: &str = "fastcache-evict";

static RUNTIME: OnceCell<Option<Runtime>> = OnceCell::new();

fn runtime() -> Option<&'static Runtime> {
    RUNTIME
        .get_or_init(|| {
            match Builder::new_multi_thread()
                .worker_threads(BACKGROUND_WORKERS)
                .thread_name(BACKGROUND_THREAD_NAME)
                .enable_time()
                .build()
            {
                Ok(runtime) => {
                    info!(
                        "Started background eviction runtime ({} workers)",
                        BACKGROUND_WORKERS
                    );
                    Some(runtime)
                }
                Err(e) => {
                    error!(
                        "Failed to build background runtime, eviction timers disabled: {}",
                        e
                    );
                    None
                }
            }
        })
        .as_ref()
}

/// Handle to the background runtime, if available
pub fn handle() -> Option<Handle> {
    runtime().map(|rt| rt.handle().clone())
}

/// Spawn a fire-and-forget task on the background runtime
pub fn spawn<F>(future: F) -> Option<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().map(|rt| rt.spawn(future))
}

/// Run blocking work on the background runtime's blocking pool
pub fn spawn_blocking<F, R>(work: F) -> Option<JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    runtime().map(|rt| rt.spawn_blocking(work))
}
