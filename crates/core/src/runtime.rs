//! Task and queue runtime
//!
//! - [`TaskPool`]: fork-join task waves and flattened parallel loops on a
//!   dedicated rayon pool, each ending in a full barrier
//! - [`FirstError`]: keeps the first failure of a wave, read after the join
//! - [`ComputeQueue`]: in-order asynchronous job queue of one device

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};

// ============================================================================
// First-failure aggregation
// ============================================================================

/// Set-once error slot shared by sibling tasks
#[derive(Debug, Default)]
pub struct FirstError {
    slot: OnceCell<EngineError>,
    failures: AtomicUsize,
}

impl FirstError {
    pub fn record(&self, err: EngineError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Err(later) = self.slot.set(err) {
            tracing::debug!(error = %later, "suppressed later task failure");
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Surface the first failure, if any, as a kernel error
    pub fn into_result(self, context: &str) -> Result<()> {
        let failures = self.failures.load(Ordering::Relaxed);
        match self.slot.into_inner() {
            Some(first) => Err(EngineError::from_task(
                format!("{}: {} task(s) failed", context, failures),
                first,
            )),
            None => Ok(()),
        }
    }
}

/// Run `f`, turning a panic into a kernel error
pub(crate) fn run_captured<F>(label: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EngineError::kernel(format!("{} panicked: {}", label, message)))
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

type Job<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// Unit of work in a task wave
pub struct Task<'a> {
    label: String,
    priority: i32,
    job: Job<'a>,
}

impl<'a> Task<'a> {
    pub fn new<F>(label: impl Into<String>, priority: i32, job: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'a,
    {
        Self {
            label: label.into(),
            priority,
            job: Box::new(job),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Worker pool of one process rank
pub struct TaskPool {
    pool: rayon::ThreadPool,
}

impl TaskPool {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let prefix = config.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(move |i| format!("{}-{}", prefix, i));
        if config.num_threads > 0 {
            builder = builder.num_threads(config.num_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build task pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` inside the pool
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    /// Run two closures potentially in parallel inside the pool
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.pool.install(|| rayon::join(a, b))
    }

    /// Run every task of a wave and wait for all of them.
    ///
    /// Higher-priority tasks are pushed last, so the spawning worker pops them
    /// first. Failures never cancel siblings; the first one is returned after
    /// the barrier.
    pub fn run_tasks(&self, context: &str, mut tasks: Vec<Task<'_>>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        tasks.sort_by_key(|task| task.priority);
        let first = FirstError::default();
        let count = tasks.len();

        self.pool.install(|| {
            rayon::scope(|scope| {
                for task in tasks {
                    let first = &first;
                    scope.spawn(move |_| {
                        let Task { label, job, .. } = task;
                        if let Err(e) = run_captured(&label, job) {
                            first.record(EngineError::from_task(label, e));
                        }
                    });
                }
            })
        });

        tracing::trace!(context, tasks = count, failures = first.failures(), "task wave joined");
        first.into_result(context)
    }

    /// Flattened `rows x cols` loop with dynamic, one-index chunks
    pub fn parallel_for_2d<F>(&self, context: &str, rows: usize, cols: usize, f: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Sync + Send,
    {
        let first = FirstError::default();
        self.pool.install(|| {
            (0..rows * cols)
                .into_par_iter()
                .with_max_len(1)
                .for_each(|idx| {
                    let (i, j) = (idx % rows, idx / rows);
                    let label = format!("{} ({}, {})", context, i, j);
                    if let Err(e) = run_captured(&label, || f(i, j)) {
                        first.record(EngineError::from_task(label, e));
                    }
                })
        });
        first.into_result(context)
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

// ============================================================================
// Device compute queues
// ============================================================================

/// Job run on a device queue
pub type QueueJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// In-order job queue of one device.
///
/// Enqueued jobs own every tile handle they touch, so tile buffers stay
/// alive until [`ComputeQueue::sync`] has drained them.
pub struct ComputeQueue {
    device: usize,
    index: usize,
    pending: VecDeque<(String, QueueJob)>,
    completed: u64,
}

impl ComputeQueue {
    pub fn new(device: usize, index: usize) -> Self {
        Self {
            device,
            index,
            pending: VecDeque::new(),
            completed: 0,
        }
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn enqueue<F>(&mut self, label: impl Into<String>, job: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.pending.push_back((label.into(), Box::new(job)));
    }

    /// Jobs not yet executed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Jobs executed since creation
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Block until every enqueued job has run; returns the first failure
    pub fn sync(&mut self) -> Result<()> {
        let mut first: Option<EngineError> = None;
        while let Some((label, job)) = self.pending.pop_front() {
            let result = run_captured(&label, job);
            self.completed += 1;
            if let Err(e) = result {
                if first.is_none() {
                    first = Some(EngineError::from_task(
                        format!("device {} queue {}: {}", self.device, self.index, label),
                        e,
                    ));
                } else {
                    tracing::debug!(device = self.device, job = %label, error = %e, "suppressed later queue failure");
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ComputeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeQueue")
            .field("device", &self.device)
            .field("index", &self.index)
            .field("pending", &self.pending.len())
            .field("completed", &self.completed)
            .finish()
    }
}
