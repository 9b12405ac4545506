//! The binary wheel crawler.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use depcrawl_config::CrawlerConfig;
use depcrawl_core::{shard_range, ShardId, WheelError, WheelRecord};
use depcrawl_store::{IndexShard, StoreError, WheelStore};
use rand::Rng;

use crate::deadline::DeadlineScheduler;
use crate::driver::drive_shards;
use crate::engine::execute_wheel_job;
use crate::fetch::{ArtifactFetcher, RetryPolicy};
use crate::job::JobFailure;
use crate::measure::measure;
use crate::planner::{plan_wheel_jobs, PlanOptions};
use crate::pool::WorkerPool;
use crate::purge::purge_wheel_store;
use crate::reconcile::reconcile_wheels;
use crate::report::CrawlReport;
use crate::wheel_metadata::MetadataExtractor;

/// Walks a shard range, reading the metadata of every wheel file not seen before.
#[derive(Debug)]
pub struct WheelCrawler<F, X> {
    index_dir: PathBuf,
    success_dir: PathBuf,
    error_dir: PathBuf,
    shards: Vec<ShardId>,
    budget: Option<Duration>,
    plan: PlanOptions,
    retry: RetryPolicy,
    fetcher: F,
    extractor: X,
    pool: WorkerPool,
}

impl<F: ArtifactFetcher, X: MetadataExtractor> WheelCrawler<F, X> {
    pub fn new(config: &CrawlerConfig, fetcher: F, extractor: X) -> Self {
        Self {
            index_dir: config.index_dir.clone(),
            success_dir: config.wheel.dump_dir.clone(),
            error_dir: config.wheel.error_dir(),
            shards: shard_range(config.run.shard_start, config.run.shard_count).collect(),
            budget: config.run.time_budget(),
            plan: PlanOptions {
                runtime_tags: Vec::new(),
                max_jobs: config.run.jobs_per_shard,
                allow_names: config.run.allow_names.clone(),
                job_timeout: config.wheel.request_timeout(),
            },
            retry: RetryPolicy {
                max_attempts: config.wheel.max_attempts,
                backoff: config.wheel.retry_backoff(),
            },
            fetcher,
            extractor,
            pool: WorkerPool::new(config.wheel_workers()),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// Override the run's time budget; `None` is unbounded.
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(&self) -> Result<CrawlReport, StoreError> {
        self.run_with_rng(&mut rand::rng())
    }

    pub fn run_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CrawlReport, StoreError> {
        let scheduler = DeadlineScheduler::new(self.budget);
        let mut report = CrawlReport::default();
        tracing::info!(
            target: "depcrawl.wheel",
            shards = self.shards.len(),
            workers = self.pool.width(),
            "starting wheel crawl"
        );

        drive_shards(&self.shards, &scheduler, &mut report, |shard, deadline, report| {
            self.crawl_shard(shard, deadline, rng, report)
        })?;

        tracing::info!(target: "depcrawl.wheel", report = ?report, "wheel crawl finished");
        Ok(report)
    }

    fn crawl_shard<R: Rng + ?Sized>(
        &self,
        shard: ShardId,
        deadline: Option<Instant>,
        rng: &mut R,
        report: &mut CrawlReport,
    ) -> Result<(), StoreError> {
        let (index, mut success, mut errors) = measure("loading data", || {
            Ok::<_, StoreError>((
                IndexShard::open(&self.index_dir, shard)?,
                WheelStore::<WheelRecord>::open(&self.success_dir, shard)?,
                WheelStore::<WheelError>::open(&self.error_dir, shard)?,
            ))
        })?;

        report.purged += measure("purging packages", || {
            purge_wheel_store(&index, &mut success) + purge_wheel_store(&index, &mut errors)
        });

        let jobs = measure("getting jobs", || {
            plan_wheel_jobs(&index, &success, &errors, &self.plan, rng)
        });
        report.jobs_planned += jobs.len();

        if !jobs.is_empty() {
            let total = jobs.len();
            let outcomes = measure("executing jobs", || {
                self.pool.run(&jobs, |job| {
                    execute_wheel_job(
                        &self.fetcher,
                        &self.extractor,
                        job,
                        deadline,
                        total,
                        &self.retry,
                    )
                })
            });
            report.jobs_executed += outcomes
                .iter()
                .filter(|outcome| !matches!(outcome, Err(JobFailure::DeadlineExceeded)))
                .count();
            report.add(reconcile_wheels(outcomes, &mut success, &mut errors));
        }

        measure("saving data", || {
            success.save()?;
            errors.save()?;
            Ok::<_, StoreError>(())
        })
    }
}
