//! Domain types shared by the depcrawl crates.
//!
//! Everything here is pure: shard partitioning of package names, runtime tag helpers, the payload
//! records kept in the local stores, the release descriptors read from the upstream index, and
//! the canonicalization applied to build failure logs.

mod normalize;
mod record;
mod release;
mod shard;
mod tags;

pub use normalize::{is_infrastructure_failure, normalize_error_log, MAX_LINES, MAX_LINE_WIDTH};
pub use record::{
    ArchiveErrorKind, IngestError, Requirements, SdistRecord, WheelError, WheelRecord,
};
pub use release::{sdist_url, wheel_url, DescriptorError, ReleaseKinds, SdistRelease, WheelRelease};
pub use shard::{shard_range, ParseShardIdError, ShardId, SHARD_COUNT};
pub use tags::{key_order, normalize_runtime_tag};
