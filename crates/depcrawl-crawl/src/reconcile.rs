//! Merging job outcomes into the success and error stores.

use depcrawl_core::{key_order, normalize_runtime_tag, SdistRecord, WheelError, WheelRecord};
use depcrawl_store::{SdistStore, WheelStore};

use crate::job::{JobFailure, JobResult, SdistOutcome, WheelResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub records: usize,
    pub errors: usize,
    pub discarded: usize,
    pub failures: usize,
}

/// Write every completed result into its store, deterministically.
///
/// Failure markers and discarded outcomes carry no package data and are only counted. Results
/// are applied in `(name, version, runtime tag)` order; each write removes the same triple from
/// the opposite store, so the latest outcome wins.
pub fn reconcile_sdist(
    outcomes: Vec<Result<SdistOutcome, JobFailure>>,
    success: &mut SdistStore<SdistRecord>,
    errors: &mut SdistStore<String>,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    let mut results: Vec<JobResult> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(SdistOutcome::Completed(batch)) => results.extend(batch),
            Ok(SdistOutcome::Discarded { .. }) => stats.discarded += 1,
            Err(_) => stats.failures += 1,
        }
    }

    for result in &mut results {
        result.runtime_tag = normalize_runtime_tag(&result.runtime_tag);
    }
    results.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| key_order(&a.runtime_tag, &b.runtime_tag))
    });

    for JobResult {
        name,
        version,
        runtime_tag,
        payload,
    } in results
    {
        match payload {
            Ok(record) => {
                errors.remove(&name, version.trim(), &runtime_tag);
                success.insert(&name, &version, &runtime_tag, record);
                stats.records += 1;
            }
            Err(log) => {
                success.remove(&name, version.trim(), &runtime_tag);
                errors.insert(&name, &version, &runtime_tag, log);
                stats.errors += 1;
            }
        }
    }
    stats
}

/// Wheel counterpart of [`reconcile_sdist`], ordered by `(name, tag, version, filename)`.
pub fn reconcile_wheels(
    outcomes: Vec<Result<WheelResult, JobFailure>>,
    success: &mut WheelStore<WheelRecord>,
    errors: &mut WheelStore<WheelError>,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    let mut results: Vec<WheelResult> = outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            Ok(result) => Some(result),
            Err(_) => {
                stats.failures += 1;
                None
            }
        })
        .collect();
    results.sort_by(|a, b| {
        (&a.name, &a.runtime_tag, &a.version, &a.filename)
            .cmp(&(&b.name, &b.runtime_tag, &b.version, &b.filename))
    });

    for WheelResult {
        name,
        runtime_tag,
        version,
        filename,
        payload,
    } in results
    {
        match payload {
            Ok(record) => {
                errors.remove(&name, &runtime_tag, version.trim(), &filename);
                success.insert(&name, &runtime_tag, &version, &filename, record);
                stats.records += 1;
            }
            Err(err) => {
                success.remove(&name, &runtime_tag, version.trim(), &filename);
                errors.insert(&name, &runtime_tag, &version, &filename, err);
                stats.errors += 1;
            }
        }
    }
    stats
}
