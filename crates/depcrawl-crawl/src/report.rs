use std::fmt;

use serde::Serialize;

use crate::reconcile::ReconcileStats;

/// Totals of one crawler run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub shards_visited: usize,
    pub jobs_planned: usize,
    pub jobs_executed: usize,
    pub records_written: usize,
    pub errors_written: usize,
    /// Outcomes dropped because the build host ran out of resources.
    pub discarded: usize,
    /// Jobs that produced no package data, including deadline skips.
    pub failures: usize,
    pub purged: usize,
    pub garbage_collections: usize,
    pub deadline_reached: bool,
    pub last_shard: Option<String>,
}

impl CrawlReport {
    pub(crate) fn add(&mut self, stats: ReconcileStats) {
        self.records_written += stats.records;
        self.errors_written += stats.errors;
        self.discarded += stats.discarded;
        self.failures += stats.failures;
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "shards visited: {}{}",
            self.shards_visited,
            self.last_shard
                .as_deref()
                .map(|shard| format!(" (last {shard})"))
                .unwrap_or_default()
        )?;
        writeln!(f, "jobs: {} planned, {} executed", self.jobs_planned, self.jobs_executed)?;
        writeln!(
            f,
            "written: {} records, {} errors",
            self.records_written, self.errors_written
        )?;
        writeln!(
            f,
            "dropped: {} discarded, {} failed",
            self.discarded, self.failures
        )?;
        writeln!(f, "purged: {}", self.purged)?;
        writeln!(f, "garbage collections: {}", self.garbage_collections)?;
        write!(
            f,
            "deadline reached: {}",
            if self.deadline_reached { "yes" } else { "no" }
        )
    }
}
