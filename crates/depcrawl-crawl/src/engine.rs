//! Executing single jobs against the external collaborators.
//!
//! Every outcome is returned as data: package-level failures become error results, everything
//! else becomes a [`JobFailure`]. Nothing here aborts sibling jobs.

use std::io;
use std::path::Path;
use std::time::Instant;

use depcrawl_core::{is_infrastructure_failure, normalize_error_log, SdistRecord, WheelError};

use crate::build::BuildSystem;
use crate::deadline;
use crate::fetch::{ArtifactFetcher, FetchError, RetryPolicy};
use crate::job::{JobFailure, JobResult, SdistJob, SdistOutcome, WheelJob, WheelResult};
use crate::wheel_metadata::MetadataExtractor;

/// Build one source release and read its per-tag results.
///
/// Jobs that would start after `deadline` fail with [`JobFailure::DeadlineExceeded`] without
/// touching the build system.
pub fn execute_sdist_job<B: BuildSystem + ?Sized>(
    build: &B,
    job: &SdistJob,
    deadline: Option<Instant>,
    total: usize,
) -> Result<SdistOutcome, JobFailure> {
    if !deadline::before(deadline) {
        return Err(JobFailure::DeadlineExceeded);
    }
    tracing::info!(
        target: "depcrawl.sdist",
        shard = %job.shard,
        job = %format!("{}/{}", job.seq + 1, total),
        package = %format!("{}:{}", job.name, job.version),
        tags = %job.runtime_tags.join(" "),
        "building"
    );

    let tempdir = tempfile::tempdir().map_err(JobFailure::unexpected)?;
    let out_link = tempdir.path().join("json");
    let result_dir = match build.build(job, &out_link) {
        Ok(dir) => dir,
        Err(err) => {
            let Some(log) = err.failure_log() else {
                tracing::error!(
                    target: "depcrawl.sdist",
                    name = %job.name,
                    version = %job.version,
                    error = %err,
                    "build could not run"
                );
                return Err(JobFailure::unexpected(err));
            };
            let normalized = normalize_error_log(log, &job.version);
            if is_infrastructure_failure(log) {
                tracing::warn!(
                    target: "depcrawl.sdist",
                    name = %job.name,
                    version = %job.version,
                    "discarding result of build that ran out of disk space"
                );
                return Ok(SdistOutcome::Discarded { reason: normalized });
            }
            tracing::info!(
                target: "depcrawl.sdist",
                name = %job.name,
                version = %job.version,
                error = %err,
                "build failed"
            );
            let results = job
                .runtime_tags
                .iter()
                .map(|tag| result(job, tag, Err(normalized.clone())))
                .collect();
            return Ok(SdistOutcome::Completed(results));
        }
    };

    let results = job
        .runtime_tags
        .iter()
        .map(|tag| {
            let payload = read_tag_result(&result_dir, job, tag)?;
            Ok(result(job, tag, payload))
        })
        .collect::<Result<Vec<_>, JobFailure>>()?;
    Ok(SdistOutcome::Completed(results))
}

fn result(job: &SdistJob, tag: &str, payload: Result<SdistRecord, String>) -> JobResult {
    JobResult {
        name: job.name.clone(),
        version: job.version.clone(),
        runtime_tag: tag.to_owned(),
        payload,
    }
}

/// `python<tag>.json` when present and non-empty, otherwise the normalized `python<tag>.log`.
fn read_tag_result(
    dir: &Path,
    job: &SdistJob,
    tag: &str,
) -> Result<Result<SdistRecord, String>, JobFailure> {
    let json_path = dir.join(format!("python{tag}.json"));
    match std::fs::read_to_string(&json_path) {
        Ok(content) if !content.trim().is_empty() => {
            let raw: serde_json::Value = serde_json::from_str(content.trim()).map_err(|err| {
                JobFailure::Unexpected(format!("invalid {}: {err}", json_path.display()))
            })?;
            let record = SdistRecord::from_extractor_output(&raw).map_err(|err| {
                JobFailure::Unexpected(format!("invalid {}: {err}", json_path.display()))
            })?;
            return Ok(Ok(record));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(JobFailure::Unexpected(format!(
                "failed to read {}: {err}",
                json_path.display()
            )))
        }
    }

    let log_path = dir.join(format!("python{tag}.log"));
    let log = std::fs::read_to_string(&log_path).map_err(|err| {
        JobFailure::Unexpected(format!("failed to read {}: {err}", log_path.display()))
    })?;
    Ok(Err(normalize_error_log(&log, &job.version)))
}

/// Fetch one wheel and read its metadata.
pub fn execute_wheel_job<F, X>(
    fetcher: &F,
    extractor: &X,
    job: &WheelJob,
    deadline: Option<Instant>,
    total: usize,
    retry: &RetryPolicy,
) -> Result<WheelResult, JobFailure>
where
    F: ArtifactFetcher + ?Sized,
    X: MetadataExtractor + ?Sized,
{
    if !deadline::before(deadline) {
        return Err(JobFailure::DeadlineExceeded);
    }
    tracing::info!(
        target: "depcrawl.wheel",
        shard = %job.shard,
        job = %format!("{}/{}", job.seq + 1, total),
        package = %format!("{}:{}", job.name, job.version),
        file = %job.filename,
        "fetching"
    );

    let payload = match retry.run(|_| fetcher.fetch(&job.url)) {
        Ok(bytes) => extractor.extract(&bytes).map_err(|err| {
            tracing::warn!(
                target: "depcrawl.wheel",
                file = %job.filename,
                error = %err,
                "unreadable wheel"
            );
            WheelError::BadArchive { kind: err.kind() }
        }),
        Err(FetchError::NotFound) => Err(WheelError::NotFound),
        Err(err) if err.is_retryable() => Err(WheelError::RetriesExhausted {
            status: err.status().unwrap_or_default(),
        }),
        Err(err) => {
            tracing::error!(
                target: "depcrawl.wheel",
                name = %job.name,
                version = %job.version,
                file = %job.filename,
                error = %err,
                "fetch failed"
            );
            return Err(JobFailure::unexpected(err));
        }
    };

    Ok(WheelResult {
        name: job.name.clone(),
        runtime_tag: job.runtime_tag.clone(),
        version: job.version.clone(),
        filename: job.filename.clone(),
        payload,
    })
}
