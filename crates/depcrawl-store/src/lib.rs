//! Sharded on-disk stores for crawl results and the upstream index.
//!
//! Every store is a directory of per-shard JSON files (`<dir>/<hex>.json`). Local stores are
//! expanded on load and compressed with [`codec`] on save; the upstream index is read as-is.

pub mod codec;
mod error;
mod index;
mod shard_file;
mod store;
mod util;

pub use codec::{CodecError, Decoder, Slot};
pub use error::{Result, StoreError};
pub use index::{IndexShard, IndexVersions};
pub use shard_file::{load_shard, save_shard, shard_path};
pub use store::{
    Layout, Payload, SdistStore, ShardStore, VersionLayout, WheelLayout, WheelPackage, WheelStore,
};
pub use util::write_json_atomic;
