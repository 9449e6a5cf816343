//! Dual-pool async execution.
//!
//! Write-heavy tracking stays off the request-serving hot path by splitting
//! work across two pools:
//!
//! - **I/O pool**: persistence writes. Unbounded dispatch onto tokio tasks
//!   (the lightweight-thread pool), fire-and-forget with no cancellation
//!   token. Callers that need durability await the store call themselves.
//! - **CPU pool**: scoring and classification refresh. A fixed number of
//!   workers behind a bounded queue; when the queue is full the job runs
//!   synchronously on the caller (caller-runs backpressure), trading latency
//!   for guaranteed eventual execution instead of dropping work.
//!
//! `shutdown` drains both pools within a bounded wait and abandons whatever
//! is left. This pipeline is best-effort analytics, not a durability ledger.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;

type CpuJob = Box<dyn FnOnce() + Send + 'static>;

pub struct DualPoolExecutor {
    accepting: AtomicBool,
    io_in_flight: Arc<AtomicUsize>,
    io_drained: Arc<Notify>,
    cpu_tx: std::sync::Mutex<Option<mpsc::Sender<CpuJob>>>,
    cpu_workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    config: PoolConfig,
}

impl DualPoolExecutor {
    /// Spin up the CPU workers. Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let (cpu_tx, cpu_rx) = mpsc::channel::<CpuJob>(config.cpu_queue_capacity);
        let cpu_rx = Arc::new(Mutex::new(cpu_rx));

        let mut workers = Vec::with_capacity(config.cpu_workers);
        for worker_id in 0..config.cpu_workers {
            let rx = Arc::clone(&cpu_rx);
            workers.push(tokio::spawn(async move {
                loop {
                    // Lock only around recv so jobs run unlocked
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => job(),
                        None => {
                            debug!(worker_id, "cpu worker exiting, queue closed");
                            break;
                        }
                    }
                }
            }));
        }

        info!(
            cpu_workers = config.cpu_workers,
            cpu_queue_capacity = config.cpu_queue_capacity,
            "dual pool executor started"
        );

        DualPoolExecutor {
            accepting: AtomicBool::new(true),
            io_in_flight: Arc::new(AtomicUsize::new(0)),
            io_drained: Arc::new(Notify::new()),
            cpu_tx: std::sync::Mutex::new(Some(cpu_tx)),
            cpu_workers: std::sync::Mutex::new(workers),
            config,
        }
    }

    /// Dispatch a persistence task onto the I/O pool. Returns once queued,
    /// not once complete. The task owns its own error handling; nothing is
    /// reported back to the caller.
    pub fn dispatch_io<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!("io pool shut down, abandoning task");
            return;
        }

        let in_flight = Arc::clone(&self.io_in_flight);
        let drained = Arc::clone(&self.io_drained);
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            task.await;
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }

    /// Dispatch a scoring/classification job onto the CPU pool. When the
    /// bounded queue is full the job executes on the calling task instead of
    /// being dropped.
    pub fn dispatch_cpu<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = {
            let guard = self.cpu_tx.lock().expect("cpu sender lock poisoned");
            guard.clone()
        };

        let Some(tx) = tx else {
            debug!("cpu pool shut down, abandoning job");
            return;
        };

        match tx.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!("cpu pool saturated, running job on caller");
                job();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("cpu pool closed, abandoning job");
            }
        }
    }

    /// Outstanding I/O tasks, for observability and tests.
    pub fn io_in_flight(&self) -> usize {
        self.io_in_flight.load(Ordering::SeqCst)
    }

    /// Stop intake and drain both pools, waiting at most the configured
    /// shutdown timeout. Work still pending past the deadline is abandoned.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + self.config.shutdown_timeout;
        info!(
            timeout_secs = self.config.shutdown_timeout.as_secs(),
            "draining executor pools"
        );

        // Close the CPU queue; workers exit once it is empty
        {
            let mut guard = self.cpu_tx.lock().expect("cpu sender lock poisoned");
            guard.take();
        }

        // Drain outstanding I/O tasks. The wakeup must be armed before the
        // counter is read: `notify_waiters` only reaches enabled waiters, so
        // registering afterwards could sleep through the final decrement.
        loop {
            let mut notified = std::pin::pin!(self.io_drained.notified());
            notified.as_mut().enable();
            let remaining_io = self.io_in_flight.load(Ordering::SeqCst);
            if remaining_io == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(abandoned = remaining_io, "io pool drain timed out");
                break;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }

        // Join CPU workers, aborting any that outlive the deadline
        let workers = {
            let mut guard = self.cpu_workers.lock().expect("cpu worker lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = handle.abort_handle();
            match tokio::time::timeout(remaining, handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("cpu worker did not drain in time, aborting");
                    abort.abort();
                }
            }
        }

        info!("executor pools drained");
    }
}
