//! Back-reference compression for store maps.
//!
//! Sibling slots holding identical values are stored once; every other copy becomes a
//! reference to the key of the kept copy. Canonical values are visited in [`key_order`], so the
//! shortest key wins. References always point at an inline value (one hop), and never cross
//! nesting levels.
//!
//! Two shapes are supported:
//! - `version → runtime tag → value` ([`compress_versions`]): the tag map of each version is
//!   compressed first, then versions with identical (compressed) tag maps are deduplicated.
//! - `version → filename → value` ([`compress_release_files`]): all files of all versions share
//!   one scope and reference each other as `"<version>@<filename>"`.

use std::collections::BTreeMap;

use depcrawl_core::key_order;
use serde::{Deserialize, Serialize};

/// A persisted slot: an inline value or a reference to a sibling key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot<T> {
    Ref {
        #[serde(rename = "$ref")]
        target: String,
    },
    Value(T),
}

pub type Compressed<T> = BTreeMap<String, Slot<T>>;

/// `runtime tag → value`
pub type TagMap<T> = BTreeMap<String, T>;
/// `version → runtime tag → value`
pub type VersionMap<T> = BTreeMap<String, TagMap<T>>;
pub type CompressedVersions<T> = Compressed<Compressed<T>>;

/// `filename → value`
pub type FileMap<T> = BTreeMap<String, T>;
/// `version → filename → value`
pub type ReleaseFiles<T> = BTreeMap<String, FileMap<T>>;
pub type CompressedReleaseFiles<T> = BTreeMap<String, Compressed<T>>;

const FILE_KEY_SEPARATOR: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("slot {key:?} references missing key {target:?}")]
    Dangling { key: String, target: String },
    #[error("slot {key:?} references {target:?}, which is itself a reference")]
    Chained { key: String, target: String },
    #[error("slot key {key:?} is not of the form <version>@<filename>")]
    MalformedFileKey { key: String },
}

/// Deduplicate the values of one map level.
pub fn compress_level<T: PartialEq>(entries: BTreeMap<String, T>) -> Compressed<T> {
    let mut ordered: Vec<(String, T)> = entries.into_iter().collect();
    ordered.sort_by(|(a, _), (b, _)| key_order(a, b));

    let mut canonical: Vec<(String, T)> = Vec::new();
    let mut out = BTreeMap::new();
    for (key, value) in ordered {
        match canonical.iter().find(|(_, kept)| *kept == value) {
            Some((target, _)) => {
                out.insert(
                    key,
                    Slot::Ref {
                        target: target.clone(),
                    },
                );
            }
            None => canonical.push((key, value)),
        }
    }
    out.extend(
        canonical
            .into_iter()
            .map(|(key, value)| (key, Slot::Value(value))),
    );
    out
}

/// Re-compress a level that may contain references, e.g. after partial edits.
pub fn recompress_level<T: PartialEq + Clone>(
    slots: Compressed<T>,
) -> Result<Compressed<T>, CodecError> {
    Ok(compress_level(decompress_level(slots)?))
}

pub fn compress_versions<T: PartialEq>(versions: VersionMap<T>) -> CompressedVersions<T> {
    compress_level(
        versions
            .into_iter()
            .map(|(version, tags)| (version, compress_level(tags)))
            .collect(),
    )
}

pub fn compress_release_files<T: PartialEq>(
    files: ReleaseFiles<T>,
) -> CompressedReleaseFiles<T> {
    let flat: BTreeMap<String, T> = files
        .into_iter()
        .flat_map(|(version, files)| {
            files
                .into_iter()
                .map(move |(filename, value)| (file_key(&version, &filename), value))
        })
        .collect();

    let mut out: CompressedReleaseFiles<T> = BTreeMap::new();
    for (key, slot) in compress_level(flat) {
        if let Some((version, filename)) = key.split_once(FILE_KEY_SEPARATOR) {
            out.entry(version.to_owned())
                .or_default()
                .insert(filename.to_owned(), slot);
        }
    }
    out
}

fn file_key(version: &str, filename: &str) -> String {
    format!("{version}{FILE_KEY_SEPARATOR}{filename}")
}

/// Expands compressed maps, collecting reference errors instead of failing.
///
/// Slots with a broken reference are dropped; every dropped slot is reported once.
#[derive(Debug, Default)]
pub struct Decoder {
    errors: Vec<CodecError>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[CodecError] {
        &self.errors
    }

    pub fn into_result(self) -> Result<(), CodecError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn level<T: Clone>(&mut self, slots: Compressed<T>) -> BTreeMap<String, T> {
        let mut values = BTreeMap::new();
        let mut refs = Vec::new();
        for (key, slot) in slots {
            match slot {
                Slot::Value(value) => {
                    values.insert(key, value);
                }
                Slot::Ref { target } => refs.push((key, target)),
            }
        }

        let mut resolved = Vec::with_capacity(refs.len());
        for (key, target) in &refs {
            match values.get(target) {
                Some(value) => resolved.push((key.clone(), value.clone())),
                None if refs.iter().any(|(k, _)| k == target) => {
                    self.errors.push(CodecError::Chained {
                        key: key.clone(),
                        target: target.clone(),
                    });
                }
                None => self.errors.push(CodecError::Dangling {
                    key: key.clone(),
                    target: target.clone(),
                }),
            }
        }
        values.extend(resolved);
        values
    }

    pub fn versions<T: Clone>(&mut self, compressed: CompressedVersions<T>) -> VersionMap<T> {
        self.level(compressed)
            .into_iter()
            .map(|(version, tags)| (version, self.level(tags)))
            .collect()
    }

    pub fn release_files<T: Clone>(
        &mut self,
        compressed: CompressedReleaseFiles<T>,
    ) -> ReleaseFiles<T> {
        let flat: Compressed<T> = compressed
            .into_iter()
            .flat_map(|(version, files)| {
                files
                    .into_iter()
                    .map(move |(filename, slot)| (file_key(&version, &filename), slot))
            })
            .collect();

        let mut out: ReleaseFiles<T> = BTreeMap::new();
        for (key, value) in self.level(flat) {
            match key.split_once(FILE_KEY_SEPARATOR) {
                Some((version, filename)) => {
                    out.entry(version.to_owned())
                        .or_default()
                        .insert(filename.to_owned(), value);
                }
                None => self.errors.push(CodecError::MalformedFileKey { key }),
            }
        }
        out
    }
}

pub fn decompress_level<T: Clone>(slots: Compressed<T>) -> Result<BTreeMap<String, T>, CodecError> {
    let mut decoder = Decoder::new();
    let values = decoder.level(slots);
    decoder.into_result().map(|()| values)
}

pub fn decompress_versions<T: Clone>(
    compressed: CompressedVersions<T>,
) -> Result<VersionMap<T>, CodecError> {
    let mut decoder = Decoder::new();
    let versions = decoder.versions(compressed);
    decoder.into_result().map(|()| versions)
}

pub fn decompress_release_files<T: Clone>(
    compressed: CompressedReleaseFiles<T>,
) -> Result<ReleaseFiles<T>, CodecError> {
    let mut decoder = Decoder::new();
    let files = decoder.release_files(compressed);
    decoder.into_result().map(|()| files)
}
