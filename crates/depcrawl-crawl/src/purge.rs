//! Pruning local entries that no longer exist upstream.

use depcrawl_store::{IndexShard, Payload, SdistStore, WheelStore};

/// Remove packages and versions that vanished from the index, and runtime tags that are no
/// longer supported. Returns the number of payloads removed.
pub fn purge_sdist_store<T: Payload>(
    index: &IndexShard,
    store: &mut SdistStore<T>,
    runtime_tags: &[String],
) -> usize {
    let mut removed = 0;
    let mut doomed: Vec<(String, String, Option<String>)> = Vec::new();

    for (name, versions) in store.packages() {
        let Some(upstream) = index.versions(name) else {
            tracing::info!(
                target: "depcrawl.sdist",
                name,
                "deleting package removed from the index"
            );
            doomed.push((name.to_owned(), String::new(), None));
            continue;
        };
        for (version, tags) in versions {
            if !upstream.keys().any(|v| v.trim() == version) {
                tracing::info!(
                    target: "depcrawl.sdist",
                    name,
                    version = %version,
                    "deleting version removed from the index"
                );
                doomed.push((name.to_owned(), version.clone(), None));
                continue;
            }
            for tag in tags.keys() {
                if !runtime_tags.iter().any(|supported| supported == tag) {
                    tracing::info!(
                        target: "depcrawl.sdist",
                        name,
                        version = %version,
                        tag = %tag,
                        "deleting unsupported runtime tag"
                    );
                    doomed.push((name.to_owned(), version.clone(), Some(tag.clone())));
                }
            }
        }
    }

    for (name, version, tag) in doomed {
        removed += match tag {
            Some(tag) => usize::from(store.remove(&name, &version, &tag).is_some()),
            None if version.is_empty() => store
                .remove_package(&name)
                .map_or(0, |versions| versions.values().map(|tags| tags.len()).sum()),
            None => store.remove_version(&name, &version),
        };
    }
    removed
}

/// Remove wheel files that vanished from the index or moved to another runtime tag.
pub fn purge_wheel_store<T: Payload>(index: &IndexShard, store: &mut WheelStore<T>) -> usize {
    let mut doomed: Vec<(String, String, String, String)> = Vec::new();
    for (name, tags) in store.packages() {
        let upstream = index.versions(name);
        for (tag, versions) in tags {
            for (version, files) in versions {
                let release = upstream
                    .and_then(|upstream| upstream.iter().find(|(v, _)| v.trim() == version))
                    .map(|(_, release)| release);
                for filename in files.keys() {
                    let listed = release
                        .and_then(|release| release.wheels.get(filename))
                        .is_some_and(|wheel| &wheel.runtime_tag == tag);
                    if !listed {
                        doomed.push((name.to_owned(), tag.clone(), version.clone(), filename.clone()));
                    }
                }
            }
        }
    }

    let mut removed = 0;
    for (name, tag, version, filename) in doomed {
        tracing::info!(
            target: "depcrawl.wheel",
            name = %name,
            version = %version,
            file = %filename,
            "deleting wheel removed from the index"
        );
        removed += usize::from(store.remove(&name, &tag, &version, &filename).is_some());
    }
    removed
}
