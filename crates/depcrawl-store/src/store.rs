//! Mutable local stores, one shard at a time.
//!
//! A [`ShardStore`] is materialized from `<dir>/<shard>.json`, expanded once on load so callers
//! only see plain nested maps, and compressed again on [`ShardStore::save`]. Two layouts exist:
//!
//! - [`VersionLayout`]: `name → version → runtime tag → payload` (source distributions).
//! - [`WheelLayout`]: `name → runtime tag → version → filename → payload` (binary wheels).

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use depcrawl_core::ShardId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{
    compress_release_files, compress_versions, CompressedReleaseFiles, CompressedVersions,
    Decoder, ReleaseFiles, VersionMap,
};
use crate::error::StoreError;
use crate::shard_file::{load_shard, save_shard};

/// How one package entry is expanded in memory and persisted on disk.
pub trait Layout {
    type Package: Clone + Default + PartialEq + fmt::Debug;
    type Persisted: Serialize + DeserializeOwned;

    fn compress(package: Self::Package) -> Self::Persisted;

    /// Expand a persisted entry. Broken references are reported to `decoder` and dropped.
    fn decompress(persisted: Self::Persisted, decoder: &mut Decoder) -> Self::Package;

    /// Number of payload slots held by the entry.
    fn leaf_count(package: &Self::Package) -> usize;
}

/// Payload bound shared by every layout.
pub trait Payload: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned {}

impl<T> Payload for T where T: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned {}

pub struct VersionLayout<T>(PhantomData<fn() -> T>);

impl<T: Payload> Layout for VersionLayout<T> {
    type Package = VersionMap<T>;
    type Persisted = CompressedVersions<T>;

    fn compress(package: Self::Package) -> Self::Persisted {
        compress_versions(package)
    }

    fn decompress(persisted: Self::Persisted, decoder: &mut Decoder) -> Self::Package {
        decoder.versions(persisted)
    }

    fn leaf_count(package: &Self::Package) -> usize {
        package.values().map(BTreeMap::len).sum()
    }
}

/// `runtime tag → version → filename → payload`
pub type WheelPackage<T> = BTreeMap<String, ReleaseFiles<T>>;

pub struct WheelLayout<T>(PhantomData<fn() -> T>);

impl<T: Payload> Layout for WheelLayout<T> {
    type Package = WheelPackage<T>;
    type Persisted = BTreeMap<String, CompressedReleaseFiles<T>>;

    fn compress(package: Self::Package) -> Self::Persisted {
        package
            .into_iter()
            .map(|(tag, files)| (tag, compress_release_files(files)))
            .collect()
    }

    fn decompress(persisted: Self::Persisted, decoder: &mut Decoder) -> Self::Package {
        persisted
            .into_iter()
            .map(|(tag, files)| (tag, decoder.release_files(files)))
            .collect()
    }

    fn leaf_count(package: &Self::Package) -> usize {
        package
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }
}

pub type SdistStore<T> = ShardStore<VersionLayout<T>>;
pub type WheelStore<T> = ShardStore<WheelLayout<T>>;

pub struct ShardStore<L: Layout> {
    dir: PathBuf,
    shard: ShardId,
    packages: BTreeMap<String, L::Package>,
    dirty: bool,
}

impl<L: Layout> fmt::Debug for ShardStore<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardStore")
            .field("dir", &self.dir)
            .field("shard", &self.shard)
            .field("packages", &self.packages.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl<L: Layout> ShardStore<L> {
    /// An empty, unsaved shard.
    pub fn new(dir: impl Into<PathBuf>, shard: ShardId) -> Self {
        Self {
            dir: dir.into(),
            shard,
            packages: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load and expand one shard. A missing file yields an empty store.
    ///
    /// Slots whose reference cannot be resolved are dropped with a warning; the store is then
    /// marked dirty so the next save rewrites a consistent file.
    pub fn open(dir: impl Into<PathBuf>, shard: ShardId) -> Result<Self, StoreError> {
        let mut store = Self::new(dir, shard);
        let Some(persisted) =
            load_shard::<BTreeMap<String, L::Persisted>>(&store.dir, shard)?
        else {
            return Ok(store);
        };

        for (name, entry) in persisted {
            let mut decoder = Decoder::new();
            let package = L::decompress(entry, &mut decoder);
            for err in decoder.errors() {
                tracing::warn!(
                    target: "depcrawl.store",
                    shard = %shard,
                    dir = %store.dir.display(),
                    name = %name,
                    error = %err,
                    "dropping unresolvable slot"
                );
                store.dirty = true;
            }
            store.packages.insert(name, package);
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn contains_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn package(&self, name: &str) -> Option<&L::Package> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&str, &L::Package)> + '_ {
        self.packages.iter().map(|(name, pkg)| (name.as_str(), pkg))
    }

    /// Total number of payload slots in the shard.
    pub fn leaf_count(&self) -> usize {
        self.packages.values().map(L::leaf_count).sum()
    }

    pub fn remove_package(&mut self, name: &str) -> Option<L::Package> {
        let removed = self.packages.remove(name);
        self.dirty |= removed.is_some();
        removed
    }

    /// Compress and persist the shard if anything changed since it was loaded.
    ///
    /// Returns whether a file was written.
    pub fn save(&mut self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        let persisted: BTreeMap<&str, L::Persisted> = self
            .packages
            .iter()
            .filter(|(_, package)| L::leaf_count(package) > 0)
            .map(|(name, package)| (name.as_str(), L::compress(package.clone())))
            .collect();
        save_shard(&self.dir, self.shard, &persisted)?;
        self.dirty = false;
        Ok(true)
    }
}

impl<T: Payload> ShardStore<VersionLayout<T>> {
    pub fn get(&self, name: &str, version: &str, tag: &str) -> Option<&T> {
        self.packages.get(name)?.get(version)?.get(tag)
    }

    pub fn contains(&self, name: &str, version: &str, tag: &str) -> bool {
        self.get(name, version, tag).is_some()
    }

    pub fn versions(&self, name: &str) -> Option<&VersionMap<T>> {
        self.packages.get(name)
    }

    /// Insert or overwrite one payload. The version is trimmed of surrounding whitespace.
    pub fn insert(&mut self, name: &str, version: &str, tag: &str, value: T) -> Option<T> {
        let slot = self
            .packages
            .entry(name.to_owned())
            .or_default()
            .entry(version.trim().to_owned())
            .or_default();
        if slot.get(tag) == Some(&value) {
            return None;
        }
        self.dirty = true;
        slot.insert(tag.to_owned(), value)
    }

    /// Remove one payload, dropping the version and package once they are empty.
    pub fn remove(&mut self, name: &str, version: &str, tag: &str) -> Option<T> {
        let package = self.packages.get_mut(name)?;
        let tags = package.get_mut(version)?;
        let removed = tags.remove(tag)?;
        if tags.is_empty() {
            package.remove(version);
        }
        if package.is_empty() {
            self.packages.remove(name);
        }
        self.dirty = true;
        Some(removed)
    }

    /// Remove every payload of one version. Returns the number of payloads removed.
    pub fn remove_version(&mut self, name: &str, version: &str) -> usize {
        let Some(package) = self.packages.get_mut(name) else {
            return 0;
        };
        let removed = package.remove(version).map_or(0, |tags| tags.len());
        if package.is_empty() {
            self.packages.remove(name);
        }
        self.dirty |= removed > 0;
        removed
    }
}

impl<T: Payload> ShardStore<WheelLayout<T>> {
    pub fn get(&self, name: &str, tag: &str, version: &str, filename: &str) -> Option<&T> {
        self.packages
            .get(name)?
            .get(tag)?
            .get(version)?
            .get(filename)
    }

    pub fn contains(&self, name: &str, tag: &str, version: &str, filename: &str) -> bool {
        self.get(name, tag, version, filename).is_some()
    }

    pub fn insert(
        &mut self,
        name: &str,
        tag: &str,
        version: &str,
        filename: &str,
        value: T,
    ) -> Option<T> {
        let files = self
            .packages
            .entry(name.to_owned())
            .or_default()
            .entry(tag.to_owned())
            .or_default()
            .entry(version.trim().to_owned())
            .or_default();
        if files.get(filename) == Some(&value) {
            return None;
        }
        self.dirty = true;
        files.insert(filename.to_owned(), value)
    }

    /// Remove one payload, dropping every container left empty.
    pub fn remove(&mut self, name: &str, tag: &str, version: &str, filename: &str) -> Option<T> {
        let package = self.packages.get_mut(name)?;
        let versions = package.get_mut(tag)?;
        let files = versions.get_mut(version)?;
        let removed = files.remove(filename)?;
        if files.is_empty() {
            versions.remove(version);
        }
        if versions.is_empty() {
            package.remove(tag);
        }
        if package.is_empty() {
            self.packages.remove(name);
        }
        self.dirty = true;
        Some(removed)
    }
}
