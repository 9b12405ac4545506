//! The source distribution crawler.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use depcrawl_config::CrawlerConfig;
use depcrawl_core::{shard_range, SdistRecord, ShardId};
use depcrawl_store::{IndexShard, SdistStore, StoreError};
use rand::Rng;

use crate::build::{BuildError, BuildSystem};
use crate::deadline::DeadlineScheduler;
use crate::driver::drive_shards;
use crate::engine::execute_sdist_job;
use crate::gc::collect_if_low;
use crate::job::JobFailure;
use crate::measure::measure;
use crate::planner::{plan_sdist_jobs, PlanOptions};
use crate::pool::WorkerPool;
use crate::purge::purge_sdist_store;
use crate::reconcile::reconcile_sdist;
use crate::report::CrawlReport;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build setup dependencies")]
    Prime(#[source] BuildError),
    #[error("failed to compute build references for shard {shard}")]
    Prepare {
        shard: ShardId,
        #[source]
        source: BuildError,
    },
}

/// Walks a shard range, building every source release that lacks a result for some runtime tag.
#[derive(Debug)]
pub struct SdistCrawler<B> {
    index_dir: PathBuf,
    success_dir: PathBuf,
    error_dir: PathBuf,
    shards: Vec<ShardId>,
    budget: Option<Duration>,
    plan: PlanOptions,
    min_free_gb: u64,
    build: B,
    pool: WorkerPool,
}

impl<B: BuildSystem> SdistCrawler<B> {
    pub fn new(config: &CrawlerConfig, build: B) -> Self {
        Self {
            index_dir: config.index_dir.clone(),
            success_dir: config.sdist.dump_dir.clone(),
            error_dir: config.sdist.error_dir(),
            shards: shard_range(config.run.shard_start, config.run.shard_count).collect(),
            budget: config.run.time_budget(),
            plan: PlanOptions {
                runtime_tags: config.sdist.runtime_tags(),
                max_jobs: config.run.jobs_per_shard,
                allow_names: config.run.allow_names.clone(),
                job_timeout: config.sdist.job_timeout(),
            },
            min_free_gb: config.sdist.min_free_gb,
            build,
            pool: WorkerPool::new(config.sdist_workers()),
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

    pub fn build_system(&self) -> &B {
        &self.build
    }

    pub fn run(&self) -> Result<CrawlReport, CrawlError> {
        self.run_with_rng(&mut rand::rng())
    }

    /// Like [`SdistCrawler::run`], shuffling jobs with `rng`.
    pub fn run_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CrawlReport, CrawlError> {
        let scheduler = DeadlineScheduler::new(self.budget);
        let mut report = CrawlReport::default();
        tracing::info!(
            target: "depcrawl.sdist",
            shards = self.shards.len(),
            workers = self.pool.width(),
            tags = %self.plan.runtime_tags.join(" "),
            "starting sdist crawl"
        );

        self.prime()?;
        let mut primed = true;
        drive_shards(&self.shards, &scheduler, &mut report, |shard, deadline, report| {
            self.crawl_shard(shard, deadline, &mut primed, rng, report)
        })?;

        tracing::info!(target: "depcrawl.sdist", report = ?report, "sdist crawl finished");
        Ok(report)
    }

    fn prime(&self) -> Result<(), CrawlError> {
        measure("ensure build time deps", || {
            self.build.prime(&self.plan.runtime_tags)
        })
        .map_err(CrawlError::Prime)
    }

    fn crawl_shard<R: Rng + ?Sized>(
        &self,
        shard: ShardId,
        deadline: Option<Instant>,
        primed: &mut bool,
        rng: &mut R,
        report: &mut CrawlReport,
    ) -> Result<(), CrawlError> {
        let (index, mut success, mut errors) = measure("loading data", || {
            Ok::<_, StoreError>((
                IndexShard::open(&self.index_dir, shard)?,
                SdistStore::<SdistRecord>::open(&self.success_dir, shard)?,
                SdistStore::<String>::open(&self.error_dir, shard)?,
            ))
        })?;

        report.purged += measure("purging packages", || {
            purge_sdist_store(&index, &mut success, &self.plan.runtime_tags)
                + purge_sdist_store(&index, &mut errors, &self.plan.runtime_tags)
        });

        let mut jobs = measure("getting jobs", || {
            plan_sdist_jobs(&index, &success, &errors, &self.plan, rng)
        });
        report.jobs_planned += jobs.len();

        if !jobs.is_empty() {
            if !*primed {
                self.prime()?;
                *primed = true;
            }
            measure("computing build references", || self.build.prepare(&mut jobs))
                .map_err(|source| CrawlError::Prepare { shard, source })?;

            let total = jobs.len();
            let outcomes = measure("executing jobs", || {
                self.pool
                    .run(&jobs, |job| execute_sdist_job(&self.build, job, deadline, total))
            });
            report.jobs_executed += outcomes
                .iter()
                .filter(|outcome| !matches!(outcome, Err(JobFailure::DeadlineExceeded)))
                .count();
            report.add(reconcile_sdist(outcomes, &mut success, &mut errors));
        }

        measure("saving data", || {
            success.save()?;
            errors.save()?;
            Ok::<_, StoreError>(())
        })?;

        if collect_if_low(&self.build, self.min_free_gb) {
            report.garbage_collections += 1;
            *primed = false;
        }
        Ok(())
    }
}
