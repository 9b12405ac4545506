//! The incremental crawl-and-reconcile pipeline.
//!
//! Per shard, both crawlers follow the same cycle: load the index shard and the local stores,
//! purge entries that vanished upstream, plan outstanding jobs, execute them on a worker pool
//! under the shard's deadline, reconcile the outcomes and save.

mod build;
mod deadline;
mod driver;
mod engine;
mod fetch;
mod gc;
mod job;
mod measure;
mod planner;
mod pool;
mod purge;
mod reconcile;
mod report;
mod sdist;
mod wheel;
mod wheel_metadata;

pub use build::{BuildError, BuildSystem, NixBuildSystem};
pub use deadline::{shard_deadline_at, DeadlineScheduler};
pub use driver::drive_shards;
pub use engine::{execute_sdist_job, execute_wheel_job};
pub use fetch::{ArtifactFetcher, FetchError, HttpFetcher, RetryPolicy};
pub use gc::collect_if_low;
pub use job::{JobFailure, JobResult, SdistJob, SdistOutcome, WheelJob, WheelResult};
pub use planner::{plan_sdist_jobs, plan_wheel_jobs, PlanOptions};
pub use pool::WorkerPool;
pub use purge::{purge_sdist_store, purge_wheel_store};
pub use reconcile::{reconcile_sdist, reconcile_wheels, ReconcileStats};
pub use report::CrawlReport;
pub use sdist::{CrawlError, SdistCrawler};
pub use wheel::WheelCrawler;
pub use wheel_metadata::{parse_metadata, ArchiveError, MetadataExtractor, ZipMetadataExtractor};
