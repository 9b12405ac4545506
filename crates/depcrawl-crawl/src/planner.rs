//! Diffing one upstream index shard against the local stores.

use std::time::Duration;

use depcrawl_core::{sdist_url, wheel_url, SdistRecord, WheelError, WheelRecord};
use depcrawl_store::{IndexShard, SdistStore, WheelStore};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::job::{SdistJob, WheelJob};

#[derive(Clone, Debug, Default)]
pub struct PlanOptions {
    /// Digits-only runtime tags every source release should have a result for.
    pub runtime_tags: Vec<String>,
    pub max_jobs: Option<usize>,
    /// When non-empty, only these packages are planned.
    pub allow_names: Vec<String>,
    pub job_timeout: Duration,
}

impl PlanOptions {
    fn allows(&self, name: &str) -> bool {
        self.allow_names.is_empty() || self.allow_names.iter().any(|allowed| allowed == name)
    }
}

/// Plan the sdist jobs of one shard.
///
/// A runtime tag needs work when neither store has an entry for it. Jobs are shuffled, then
/// stably sorted so jobs missing the most tags come first, capped at `max_jobs` and numbered.
pub fn plan_sdist_jobs<R: Rng + ?Sized>(
    index: &IndexShard,
    success: &SdistStore<SdistRecord>,
    errors: &SdistStore<String>,
    opts: &PlanOptions,
    rng: &mut R,
) -> Vec<SdistJob> {
    let mut jobs = Vec::new();
    let mut releases = 0usize;
    for (name, versions) in index.packages() {
        if !opts.allows(name) {
            continue;
        }
        for (version, kinds) in versions {
            let Some(sdist) = &kinds.sdist else {
                continue;
            };
            releases += 1;
            let key = version.trim();
            let runtime_tags: Vec<String> = opts
                .runtime_tags
                .iter()
                .filter(|tag| !success.contains(name, key, tag) && !errors.contains(name, key, tag))
                .cloned()
                .collect();
            if runtime_tags.is_empty() {
                continue;
            }
            jobs.push(SdistJob {
                shard: index.shard(),
                name: name.to_owned(),
                version: version.clone(),
                url: sdist_url(name, &sdist.filename),
                sha256: sdist.sha256.clone(),
                seq: 0,
                timeout: opts.job_timeout,
                runtime_tags,
                build_ref: None,
            });
        }
    }

    // Large packages cluster by name; shuffling spreads them across the run.
    jobs.shuffle(rng);
    jobs.sort_by(|a, b| b.runtime_tags.len().cmp(&a.runtime_tags.len()));
    finish(&mut jobs, opts.max_jobs, |job, seq| job.seq = seq);

    tracing::info!(
        target: "depcrawl.sdist",
        shard = %index.shard(),
        jobs = jobs.len(),
        releases,
        "planned sdist jobs"
    );
    jobs
}

/// Plan the wheel jobs of one shard: every upstream wheel file missing from both stores.
pub fn plan_wheel_jobs<R: Rng + ?Sized>(
    index: &IndexShard,
    success: &WheelStore<WheelRecord>,
    errors: &WheelStore<WheelError>,
    opts: &PlanOptions,
    rng: &mut R,
) -> Vec<WheelJob> {
    let mut jobs = Vec::new();
    for (name, versions) in index.packages() {
        if !opts.allows(name) {
            continue;
        }
        for (version, kinds) in versions {
            let key = version.trim();
            for (filename, wheel) in &kinds.wheels {
                let tag = wheel.runtime_tag.as_str();
                if success.contains(name, tag, key, filename)
                    || errors.contains(name, tag, key, filename)
                {
                    continue;
                }
                jobs.push(WheelJob {
                    shard: index.shard(),
                    name: name.to_owned(),
                    version: version.clone(),
                    filename: filename.clone(),
                    runtime_tag: tag.to_owned(),
                    url: wheel_url(name, tag, filename),
                    seq: 0,
                });
            }
        }
    }

    jobs.shuffle(rng);
    finish(&mut jobs, opts.max_jobs, |job, seq| job.seq = seq);

    tracing::info!(
        target: "depcrawl.wheel",
        shard = %index.shard(),
        jobs = jobs.len(),
        "planned wheel jobs"
    );
    jobs
}

fn finish<J>(jobs: &mut Vec<J>, max_jobs: Option<usize>, mut number: impl FnMut(&mut J, usize)) {
    if let Some(max) = max_jobs {
        jobs.truncate(max);
    }
    for (seq, job) in jobs.iter_mut().enumerate() {
        number(job, seq);
    }
}
