use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Number of shards every store is partitioned into.
///
/// Changing this requires re-partitioning every store on disk.
pub const SHARD_COUNT: usize = 256;

/// One of the [`SHARD_COUNT`] partitions of the package-name key space.
///
/// The shard of a package is the first byte of `sha256(name)`; its on-disk
/// name is that byte as two lowercase hex digits (`"00"`..`"ff"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(u8);

impl ShardId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub fn for_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        Self(digest[0])
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// All shards in ascending order.
    pub fn all() -> impl Iterator<Item = ShardId> {
        (0..=u8::MAX).map(ShardId)
    }

    pub fn file_stem(self) -> String {
        hex::encode([self.0])
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid shard id {input:?}: expected two hex digits")]
pub struct ParseShardIdError {
    input: String,
}

impl FromStr for ShardId {
    type Err = ParseShardIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseShardIdError {
            input: s.to_owned(),
        };
        if s.len() != 2 {
            return Err(err());
        }
        let bytes = hex::decode(s).map_err(|_| err())?;
        Ok(Self(bytes[0]))
    }
}

/// Shards `start..start + count`, clamped to the shard space.
pub fn shard_range(start: usize, count: usize) -> impl Iterator<Item = ShardId> {
    let end = start.saturating_add(count).min(SHARD_COUNT);
    (start.min(end)..end).map(|idx| ShardId(idx as u8))
}
