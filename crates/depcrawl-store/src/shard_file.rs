use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use depcrawl_core::ShardId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::util::write_json_atomic;

pub fn shard_path(dir: &Path, shard: ShardId) -> PathBuf {
    dir.join(format!("{}.json", shard.file_stem()))
}

/// Read one shard file. A missing file is `None`; an unreadable or undecodable file is an error
/// so a damaged shard is never silently replaced by an empty one.
pub fn load_shard<V: DeserializeOwned>(dir: &Path, shard: ShardId) -> Result<Option<V>, StoreError> {
    let path = shard_path(dir, shard);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::Read { path, source }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StoreError::decode(&path, &err))
}

pub fn save_shard<V: Serialize + ?Sized>(
    dir: &Path,
    shard: ShardId,
    value: &V,
) -> Result<(), StoreError> {
    let path = shard_path(dir, shard);
    write_json_atomic(&path, value)?;
    tracing::debug!(target: "depcrawl.store", shard = %shard, path = %path.display(), "saved shard");
    Ok(())
}
