//! Background I/O pool.
//!
//! The engine keeps two pools: one for local archive reads and one for
//! transfers, so slow downloads never hold up a read. The tick thread never
//! waits on a task; it polls with [`poll_task`] and moves on.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_executor::{Executor, Task};
use futures_lite::future;

/// A thread pool for executing async tasks.
pub struct TaskPool {
    executor: Arc<Executor<'static>>,
    threads: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TaskPool {
    /// Create a new task pool with the specified number of threads.
    ///
    /// # Panics
    ///
    /// Panics if num_threads is 0 or a worker thread cannot be spawned.
    pub fn new(num_threads: usize) -> Self {
        Self::named("stowage-io", num_threads)
    }

    /// Like [`TaskPool::new`], with worker threads named `{name}-{i}`.
    pub fn named(name: &str, num_threads: usize) -> Self {
        assert!(num_threads > 0, "TaskPool must have at least one thread");

        let executor = Arc::new(Executor::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(num_threads);

        for i in 0..num_threads {
            let exec = executor.clone();
            let shutdown_flag = shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while !shutdown_flag.load(Ordering::Relaxed) {
                        if !exec.try_tick() {
                            thread::sleep(Duration::from_millis(1));
                        }
                    }
                })
                .expect("Failed to spawn task pool thread");

            threads.push(handle);
        }

        tracing::debug!("TaskPool {} created with {} threads", name, num_threads);

        Self {
            executor,
            threads,
            shutdown,
        }
    }

    /// Leaves one core to the tick thread.
    pub fn default_threads() -> Self {
        let num_threads = (num_cpus::get().saturating_sub(1)).max(1);
        Self::new(num_threads)
    }

    pub fn spawn<T>(&self, future: impl Future<Output = T> + Send + 'static) -> Task<T>
    where
        T: Send + 'static,
    {
        self.executor.spawn(future)
    }

    /// Run a blocking closure on a worker thread.
    pub fn spawn_blocking<T>(&self, f: impl FnOnce() -> T + Send + 'static) -> Task<T>
    where
        T: Send + 'static,
    {
        self.executor.spawn(async move { f() })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// Tasks still queued are dropped without running.
    pub fn shutdown(mut self) {
        tracing::debug!("Shutting down TaskPool with {} threads", self.threads.len());

        self.shutdown.store(true, Ordering::Relaxed);

        let threads = std::mem::take(&mut self.threads);
        for handle in threads {
            if let Err(e) = handle.join() {
                tracing::error!("Task pool thread panicked: {:?}", e);
            }
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Non-blocking check of a pool task; `None` while it is still running.
pub fn poll_task<T>(task: &mut Task<T>) -> Option<T> {
    future::block_on(future::poll_once(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_task_pool_creation() {
        let pool = TaskPool::new(2);
        assert_eq!(pool.thread_count(), 2);
    }

    #[test]
    fn test_named_pool_threads() {
        let pool = TaskPool::named("stowage-transfer", 1);
        let task = pool.spawn_blocking(|| thread::current().name().map(str::to_string));
        assert_eq!(pollster::block_on(task).as_deref(), Some("stowage-transfer-0"));
    }

    #[test]
    fn test_spawn_and_await() {
        let pool = TaskPool::new(2);
        let task = pool.spawn(async { 42 });
        assert_eq!(pollster::block_on(task), 42);
    }

    #[test]
    fn test_poll_task_does_not_block() {
        let pool = TaskPool::new(1);
        let gate = Arc::new(AtomicBool::new(false));
        let worker_gate = gate.clone();
        let mut task = pool.spawn_blocking(move || {
            while !worker_gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            7
        });

        assert_eq!(poll_task(&mut task), None);
        gate.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_secs(5);
        let value = loop {
            if let Some(value) = poll_task(&mut task) {
                break value;
            }
            assert!(Instant::now() < deadline, "task never finished");
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(value, 7);
    }

    #[test]
    #[should_panic(expected = "TaskPool must have at least one thread")]
    fn test_zero_threads_panics() {
        TaskPool::new(0);
    }

    #[test]
    fn test_shutdown() {
        let pool = TaskPool::new(2);
        let _task = pool.spawn(async { 1 });
        pool.shutdown();
    }
}
