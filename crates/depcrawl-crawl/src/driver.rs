use std::time::Instant;

use depcrawl_core::ShardId;

use crate::deadline::DeadlineScheduler;
use crate::report::CrawlReport;

/// Visit `shards` in order, handing each its share of the remaining budget.
///
/// A shard that has started always runs to completion; once the total deadline has passed no
/// further shard is started. The first error aborts the run.
pub fn drive_shards<E>(
    shards: &[ShardId],
    scheduler: &DeadlineScheduler,
    report: &mut CrawlReport,
    mut visit: impl FnMut(ShardId, Option<Instant>, &mut CrawlReport) -> Result<(), E>,
) -> Result<(), E> {
    for (idx, &shard) in shards.iter().enumerate() {
        let deadline = scheduler.shard_deadline(shards.len() - idx);
        let _span = tracing::info_span!("shard", shard = %shard).entered();
        visit(shard, deadline, report)?;
        report.shards_visited += 1;
        report.last_shard = Some(shard.to_string());

        if scheduler.expired() {
            let left = shards.len() - idx - 1;
            if left > 0 {
                tracing::warn!(
                    target: "depcrawl.stage",
                    shard = %shard,
                    left,
                    "total deadline reached; stopping"
                );
            }
            report.deadline_reached = true;
            break;
        }
    }
    Ok(())
}
