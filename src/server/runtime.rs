//! Worker thread pool owned by a running server.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// How long a non-daemon pool waits for outstanding work on teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bounded multi-thread runtime created fresh for every server start.
///
/// In daemon mode teardown never waits for in-flight connections, so
/// neither `stop()` nor dropping a running server can hang process exit.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    daemon: bool,
}

impl WorkerPool {
    pub fn new(worker_threads: usize, daemon: bool) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("rpchost-worker")
            .enable_all()
            .build()?;

        debug!(worker_threads, daemon, "Worker pool created");

        Ok(Self {
            runtime: Some(runtime),
            daemon,
        })
    }

    pub fn handle(&self) -> Handle {
        match &self.runtime {
            Some(runtime) => runtime.handle().clone(),
            None => unreachable!("worker pool used after shutdown"),
        }
    }

    /// Run a future to completion on the pool, blocking the caller.
    ///
    /// Safe to call from inside another runtime: the wait then happens on a
    /// scoped helper thread, since tokio refuses to nest `block_on`.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let handle = self.handle();
        outside_runtime(move || handle.block_on(future))
    }

    /// Tear down the pool, dropping any tasks still running on it.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if self.daemon {
            runtime.shutdown_background();
        } else {
            outside_runtime(move || runtime.shutdown_timeout(SHUTDOWN_GRACE));
        }
        debug!("Worker pool shut down");
    }
}

/// Run a blocking closure where tokio allows it.
///
/// Inside a runtime context the closure runs on a scoped thread and its
/// panics are re-raised on the caller.
fn outside_runtime<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    if Handle::try_current().is_err() {
        return f();
    }

    std::thread::scope(|scope| match scope.spawn(f).join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
