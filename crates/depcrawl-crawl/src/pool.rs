//! Fixed-width worker pool that turns every job into a result, including panics.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::job::JobFailure;

enum Workers {
    Rayon(ThreadPool),
    Inline,
}

pub struct WorkerPool {
    workers: Workers,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("width", &self.width())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        Self {
            workers: build_rayon_pool("depcrawl-worker", width),
        }
    }

    /// Runs every job on the calling thread.
    pub fn inline() -> Self {
        Self {
            workers: Workers::Inline,
        }
    }

    pub fn width(&self) -> usize {
        match &self.workers {
            Workers::Rayon(pool) => pool.current_num_threads(),
            Workers::Inline => 1,
        }
    }

    /// Run `f` over `jobs`; result `i` belongs to job `i` regardless of completion order.
    pub fn run<J, T, F>(&self, jobs: &[J], f: F) -> Vec<Result<T, JobFailure>>
    where
        J: Sync,
        T: Send,
        F: Fn(&J) -> Result<T, JobFailure> + Sync,
    {
        let guarded = |job: &J| match catch_unwind(AssertUnwindSafe(|| f(job))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(target: "depcrawl.pool", panic = %message, "job panicked");
                Err(JobFailure::Panicked(message))
            }
        };

        match &self.workers {
            Workers::Rayon(pool) => {
                pool.install(|| jobs.par_iter().with_max_len(1).map(guarded).collect())
            }
            Workers::Inline => jobs.iter().map(guarded).collect(),
        }
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize) -> Workers {
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return Workers::Rayon(pool),
            // Thread limits are hit on constrained hosts; shrink instead of failing the run.
            Err(err) if threads > 1 => {
                tracing::warn!(target: "depcrawl.pool", threads, error = %err, "shrinking worker pool");
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(target: "depcrawl.pool", error = %err, "running jobs inline");
                return Workers::Inline;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
