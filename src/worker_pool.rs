//! # Worker Pool Module
//!
//! Pools of coroutines that run work off the connection loop: handler
//! invocations for routes with a dedicated executor, and body encoding for
//! the response writer. Workers share one queue and load-balance
//! automatically; metrics track queue depth, dispatches, completions and
//! sheds.
//!
//! ## Configuration
//!
//! - `CONVEYOR_EXEC_WORKERS`: worker coroutines per pool (default: 4)
//! - `CONVEYOR_EXEC_QUEUE_BOUND`: queue depth before shed mode rejects
//!   (default: 1024)
//! - `CONVEYOR_BACKPRESSURE_MODE`: `block` or `shed` (default: `block`)
//! - `CONVEYOR_STACK_SIZE`: worker coroutine stack size (default: 64 KB)

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use may::sync::mpsc;
use tracing::{debug, error, info};

/// A unit of work executed on a pool worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// What to do when the queue is at its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureMode {
    /// Enqueue regardless; the consumer drains at its own pace.
    #[default]
    Block,
    /// Reject immediately so the caller can resolve the request with a
    /// service-unavailable response.
    Shed,
}

impl FromStr for BackpressureMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "shed" => Ok(Self::Shed),
            _ => Err(()),
        }
    }
}

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    pub queue_bound: usize,
    pub backpressure_mode: BackpressureMode,
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let num_workers = std::env::var("CONVEYOR_EXEC_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let queue_bound = std::env::var("CONVEYOR_EXEC_QUEUE_BOUND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1024);
        let backpressure_mode = std::env::var("CONVEYOR_BACKPRESSURE_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let stack_size = std::env::var("CONVEYOR_STACK_SIZE")
            .ok()
            .and_then(|s| {
                if let Some(hex) = s.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).ok()
                } else {
                    s.parse().ok()
                }
            })
            .unwrap_or(0x10000);

        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            stack_size,
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            backpressure_mode: BackpressureMode::Block,
            stack_size: 0x10000,
        }
    }
}

/// Atomic counters exposed for monitoring a pool.
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    shed_count: AtomicU64,
    queue_depth: AtomicUsize,
    dispatched_count: AtomicU64,
    completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

/// Why a job could not be accepted.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("worker queue at capacity")]
    Saturated,
    #[error("worker pool disconnected")]
    Disconnected,
}

/// A pool of worker coroutines draining a shared job queue.
pub struct WorkerPool {
    name: String,
    config: WorkerPoolConfig,
    sender: mpsc::Sender<Job>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    /// Spawn the pool's worker coroutines. Jobs that panic are contained
    /// to the job; the worker keeps draining.
    pub fn new(name: &str, config: WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let metrics = Arc::new(WorkerPoolMetrics::default());
        // may's mpsc receiver supports sharing across coroutines, which is
        // what load-balances the queue.
        let rx = Arc::new(rx);

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "creating worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let metrics = Arc::clone(&metrics);
            let pool_name = name.to_string();
            let builder = may::coroutine::Builder::new().stack_size(config.stack_size);
            // SAFETY: Builder::spawn is unsafe per the may runtime's
            // requirements. The worker closure is Send + 'static, owns all
            // its captured state, and reports failures over channels
            // instead of unwinding.
            #[allow(unsafe_code)]
            let spawned = unsafe {
                builder.spawn(move || {
                    debug!(pool = %pool_name, worker_id, "worker coroutine started");
                    while let Ok(job) = rx.recv() {
                        if let Err(panic) =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
                        {
                            error!(
                                pool = %pool_name,
                                worker_id,
                                panic_message = ?panic,
                                "job panicked on pool worker"
                            );
                        }
                        metrics.record_completion();
                    }
                    debug!(pool = %pool_name, worker_id, "worker coroutine exiting");
                })
            };
            if let Err(e) = spawned {
                error!(pool = %name, worker_id, error = %e, "failed to spawn pool worker");
            }
        }

        Self {
            name: name.to_string(),
            config,
            sender: tx,
            metrics,
        }
    }

    /// Enqueue a job. In shed mode a full queue rejects instead of
    /// enqueueing, letting the caller answer with a backpressure response.
    pub fn execute(&self, job: Job) -> Result<(), ExecuteError> {
        if self.config.backpressure_mode == BackpressureMode::Shed
            && self.metrics.queue_depth() >= self.config.queue_bound
        {
            self.metrics.record_shed();
            debug!(pool = %self.name, "queue at bound, shedding job");
            return Err(ExecuteError::Saturated);
        }
        self.metrics.record_dispatch();
        self.sender.send(job).map_err(|_| {
            error!(pool = %self.name, "worker pool channel disconnected");
            ExecuteError::Disconnected
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}
