//! Job execution for brick group compression and decompression.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

/// A unit of work submitted to a [`WorkPool`].
pub type Job<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Executes batches of independent jobs.
///
/// Encoders and decoders hold a shared reference to a pool but never own
/// its threads. `run` must not return before every job in the batch has
/// finished, so jobs may borrow from the caller's stack.
pub trait WorkPool: Send + Sync {
    /// Run every job and block until all of them have completed.
    ///
    /// A panicking job is reported as [`Error::Runtime`] after the rest of
    /// the batch has finished.
    fn run<'a>(&self, jobs: Vec<Job<'a>>) -> Result<()>;
}

/// Runs jobs on a rayon thread pool.
#[cfg(not(target_arch = "wasm32"))]
pub struct RayonPool {
    pool: Option<rayon::ThreadPool>,
}

#[cfg(not(target_arch = "wasm32"))]
impl RayonPool {
    /// Use rayon's global thread pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Build a dedicated pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("splv-worker-{i}"))
            .build()
            .map_err(|e| Error::Runtime(format!("failed to build thread pool: {e}")))?;
        Ok(Self { pool: Some(pool) })
    }

    /// Number of worker threads backing this pool.
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_all<'s>(scope: &rayon::Scope<'s>, jobs: Vec<Job<'s>>, panicked: &'s AtomicUsize) {
    for job in jobs {
        scope.spawn(move |_| {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                panicked.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl WorkPool for RayonPool {
    fn run<'a>(&self, jobs: Vec<Job<'a>>) -> Result<()> {
        let panicked = AtomicUsize::new(0);
        match &self.pool {
            Some(pool) => pool.scope(|s| spawn_all(s, jobs, &panicked)),
            None => rayon::scope(|s| spawn_all(s, jobs, &panicked)),
        }
        check_panics(panicked.into_inner())
    }
}

/// Runs jobs one after another on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl WorkPool for InlinePool {
    fn run<'a>(&self, jobs: Vec<Job<'a>>) -> Result<()> {
        let panicked = jobs
            .into_iter()
            .map(|job| catch_unwind(AssertUnwindSafe(job)))
            .filter(|outcome| outcome.is_err())
            .count();
        check_panics(panicked)
    }
}

fn check_panics(panicked: usize) -> Result<()> {
    if panicked > 0 {
        return Err(Error::Runtime(format!("{panicked} worker job(s) panicked")));
    }
    Ok(())
}

/// Process-wide default pool: rayon's global pool on native targets,
/// [`InlinePool`] on wasm.
pub fn default_pool() -> Arc<dyn WorkPool> {
    static DEFAULT: OnceLock<Arc<dyn WorkPool>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            #[cfg(not(target_arch = "wasm32"))]
            let pool: Arc<dyn WorkPool> = Arc::new(RayonPool::global());
            #[cfg(target_arch = "wasm32")]
            let pool: Arc<dyn WorkPool> = Arc::new(InlinePool);
            pool
        })
        .clone()
}

/// Shared flag telling queued jobs to skip their work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Completion state of one [`map_jobs`] input.
enum Slot<T> {
    Pending,
    Skipped,
    Done(Result<T>),
}

/// Apply `f` to every input as one job each, returning outputs in input
/// order regardless of completion order.
///
/// The first failing job cancels the rest of the batch; jobs that have not
/// started yet skip their work. The reported error is the failing job's,
/// not a cancellation. `cancel` lets the caller stop the batch from outside.
pub fn map_jobs<I, T, F>(
    pool: &dyn WorkPool,
    cancel: Option<&CancelToken>,
    inputs: Vec<I>,
    f: F,
) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(I) -> Result<T> + Sync,
{
    let len = inputs.len();
    let mut slots: Vec<Slot<T>> = (0..len).map(|_| Slot::Pending).collect();
    let failed = CancelToken::new();
    let (f, failed) = (&f, &failed);

    let jobs: Vec<Job<'_>> = inputs
        .into_iter()
        .zip(slots.iter_mut())
        .map(|(input, slot)| {
            Box::new(move || {
                let cancelled =
                    failed.is_cancelled() || cancel.is_some_and(|token| token.is_cancelled());
                *slot = if cancelled {
                    Slot::Skipped
                } else {
                    let result = f(input);
                    if result.is_err() {
                        failed.cancel();
                    }
                    Slot::Done(result)
                };
            }) as Job<'_>
        })
        .collect();
    pool.run(jobs)?;

    let mut out = Vec::with_capacity(len);
    let mut skipped = false;
    for slot in slots {
        match slot {
            Slot::Done(Ok(value)) => out.push(value),
            Slot::Done(Err(e)) => return Err(e),
            Slot::Skipped => skipped = true,
            Slot::Pending => return Err(Error::Runtime("job did not complete".into())),
        }
    }
    if skipped {
        return Err(Error::Runtime("job cancelled".into()));
    }
    Ok(out)
}
