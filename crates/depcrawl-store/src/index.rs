//! Read-only view of one shard of the upstream package index.

use std::collections::BTreeMap;
use std::path::Path;

use depcrawl_core::{ReleaseKinds, ShardId};

use crate::error::StoreError;
use crate::shard_file::load_shard;

/// `version → release kinds`
pub type IndexVersions = BTreeMap<String, ReleaseKinds>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexShard {
    shard: ShardId,
    packages: BTreeMap<String, IndexVersions>,
}

impl IndexShard {
    /// Load `<dir>/<shard>.json`. Shards without a file have no packages.
    pub fn open(dir: &Path, shard: ShardId) -> Result<Self, StoreError> {
        let packages = load_shard(dir, shard)?.unwrap_or_default();
        Ok(Self {
            shard,
            packages,
        })
    }

    pub fn from_packages(shard: ShardId, packages: BTreeMap<String, IndexVersions>) -> Self {
        Self {
            shard,
            packages,
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn versions(&self, name: &str) -> Option<&IndexVersions> {
        self.packages.get(name)
    }

    pub fn release(&self, name: &str, version: &str) -> Option<&ReleaseKinds> {
        self.packages.get(name)?.get(version)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&str, &IndexVersions)> + '_ {
        self.packages
            .iter()
            .map(|(name, versions)| (name.as_str(), versions))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
