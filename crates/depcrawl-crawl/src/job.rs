//! Units of work and their outcomes.

use std::time::Duration;

use depcrawl_core::{SdistRecord, ShardId, WheelError, WheelRecord};

/// Outstanding work for one source release across the runtime tags that still lack a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdistJob {
    pub shard: ShardId,
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    /// Dense 0-based position in the shard's job list.
    pub seq: usize,
    pub timeout: Duration,
    pub runtime_tags: Vec<String>,
    /// Build reference assigned by [`crate::BuildSystem::prepare`].
    pub build_ref: Option<String>,
}

/// Outstanding work for one wheel file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WheelJob {
    pub shard: ShardId,
    pub name: String,
    pub version: String,
    pub filename: String,
    pub runtime_tag: String,
    pub url: String,
    pub seq: usize,
}

/// One `(name, version, runtime tag)` outcome of an sdist job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobResult {
    pub name: String,
    pub version: String,
    pub runtime_tag: String,
    /// The extracted record, or a normalized failure log.
    pub payload: Result<SdistRecord, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SdistOutcome {
    Completed(Vec<JobResult>),
    /// The build failed for reasons unrelated to the package (e.g. a full disk).
    Discarded { reason: String },
}

/// The outcome for one wheel file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WheelResult {
    pub name: String,
    pub runtime_tag: String,
    pub version: String,
    pub filename: String,
    pub payload: Result<WheelRecord, WheelError>,
}

/// A job that produced no package data. Never recorded in a store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    #[error("deadline reached before the job started")]
    DeadlineExceeded,
    #[error("{0}")]
    Unexpected(String),
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobFailure {
    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        Self::Unexpected(err.to_string())
    }
}
