use std::time::{Duration, Instant};

/// Spreads a run's wall-clock budget over the shards still to visit.
///
/// The per-shard deadline is recomputed before every shard, so a shard that finishes early
/// leaves its slack to the ones after it.
#[derive(Clone, Copy, Debug)]
pub struct DeadlineScheduler {
    total: Option<Instant>,
}

impl DeadlineScheduler {
    /// `None` means unbounded.
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            total: budget.map(|budget| Instant::now() + budget),
        }
    }

    pub fn with_deadline(total: Option<Instant>) -> Self {
        Self { total }
    }

    pub fn total(&self) -> Option<Instant> {
        self.total
    }

    /// Deadline for the next shard, counting it among `remaining`.
    pub fn shard_deadline(&self, remaining: usize) -> Option<Instant> {
        self.total
            .map(|total| shard_deadline_at(Instant::now(), total, remaining))
    }

    pub fn expired(&self) -> bool {
        self.total.is_some_and(|total| Instant::now() >= total)
    }
}

/// `now + (total - now) / remaining`; `now` once the total has passed.
pub fn shard_deadline_at(now: Instant, total: Instant, remaining: usize) -> Instant {
    let left = total.saturating_duration_since(now);
    let divisor = u32::try_from(remaining.max(1)).unwrap_or(u32::MAX);
    now + left / divisor
}

/// Whether work may still start under `deadline`.
pub fn before(deadline: Option<Instant>) -> bool {
    deadline.is_none_or(|deadline| Instant::now() < deadline)
}
