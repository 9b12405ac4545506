//! The external build system that extracts source distribution metadata.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use depcrawl_process::{run_command_checked, CommandSpec, RunCommandError, RunOptions};
use serde::Serialize;

use crate::job::SdistJob;

const NIX_STORE: &str = "/nix/store";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build ran and failed; `log` is the raw failure log.
    #[error("build failed")]
    Failed { log: String },
    #[error("build timed out")]
    TimedOut { log: String },
    #[error("job has no build reference")]
    MissingReference,
    #[error(transparent)]
    Command(#[from] RunCommandError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected build system output: {0}")]
    InvalidOutput(String),
}

impl BuildError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Split a command error into a package-level failure or a plain error.
    fn from_command(err: RunCommandError) -> Self {
        match err {
            RunCommandError::Failed(failure) => {
                let log = if failure.output.stderr.is_empty() {
                    failure.output.combined()
                } else {
                    failure.output.stderr
                };
                if failure.timed_out {
                    Self::TimedOut { log }
                } else {
                    Self::Failed { log }
                }
            }
            err @ RunCommandError::Io { .. } => Self::Command(err),
        }
    }

    /// The captured log of a build that ran and failed.
    pub fn failure_log(&self) -> Option<&str> {
        match self {
            Self::Failed { log } | Self::TimedOut { log } => Some(log),
            _ => None,
        }
    }
}

/// Builds extractor derivations for source distributions.
///
/// A successful [`BuildSystem::build`] returns a directory holding `python<tag>.json` (the raw
/// extractor output) or `python<tag>.log` (why extraction failed) for every requested tag.
pub trait BuildSystem: Sync {
    /// Assign a build reference to every job of one batch.
    fn prepare(&self, jobs: &mut [SdistJob]) -> Result<(), BuildError>;

    /// Build one job, linking its result at `out_link`. Returns the result directory.
    fn build(&self, job: &SdistJob, out_link: &Path) -> Result<PathBuf, BuildError>;

    /// Build the setup dependencies every job shares, so later builds find them cached.
    fn prime(&self, runtime_tags: &[String]) -> Result<(), BuildError>;

    fn collect_garbage(&self) -> Result<(), BuildError>;

    /// Root of the storage the builds fill up.
    fn store_root(&self) -> PathBuf;

    /// Free bytes available to the build store.
    fn free_space(&self) -> io::Result<u64> {
        fs2::available_space(self.store_root())
    }
}

/// [`BuildSystem`] backed by the Nix extractor expressions.
#[derive(Clone, Debug)]
pub struct NixBuildSystem {
    extractor_src: PathBuf,
    store: Option<PathBuf>,
    prime_timeout: Duration,
}

/// Package used to warm the build cache; its build pulls in all common setup dependencies.
const PRIME_PACKAGE: (&str, &str, &str, &str) = (
    "requests",
    "2.22.0",
    "https://files.pythonhosted.org/packages/01/62/ddcf76d1d19885e8579acb1b1df26a852b03472c0e46d2b959a714c90608/requests-2.22.0.tar.gz",
    "11e007a8a2aa0323f5a921e9e6a2d7e4e67d9877e85773fba9ba6419025cbeb4",
);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractorJob<'a> {
    pkg: &'a str,
    version: &'a str,
    url: &'a str,
    sha256: &'a str,
    py_versions: &'a [String],
}

impl NixBuildSystem {
    pub fn new(
        extractor_src: impl Into<PathBuf>,
        store: Option<PathBuf>,
        prime_timeout: Duration,
    ) -> Self {
        Self {
            extractor_src: extractor_src.into(),
            store,
            prime_timeout,
        }
    }

    fn with_store(&self, mut command: CommandSpec) -> CommandSpec {
        if let Some(store) = &self.store {
            command = command.arg("--store").arg(store);
        }
        command
    }

    /// Map a `/nix/store` path into the alternate store root, if one is configured.
    fn physical_path(&self, path: PathBuf) -> PathBuf {
        match (&self.store, path.strip_prefix(NIX_STORE)) {
            (Some(store), Ok(rest)) => store.join(NIX_STORE.trim_start_matches('/')).join(rest),
            _ => path,
        }
    }
}

fn nix_string(value: &str) -> String {
    format!("\"{value}\"")
}

impl BuildSystem for NixBuildSystem {
    fn prepare(&self, jobs: &mut [SdistJob]) -> Result<(), BuildError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let payload: Vec<ExtractorJob<'_>> = jobs
            .iter()
            .map(|job| ExtractorJob {
                pkg: &job.name,
                version: &job.version,
                url: &job.url,
                sha256: &job.sha256,
                py_versions: &job.runtime_tags,
            })
            .collect();
        let payload = serde_json::to_vec(&payload)
            .map_err(|err| BuildError::InvalidOutput(err.to_string()))?;

        let tempdir = tempfile::tempdir()
            .map_err(|err| BuildError::io("failed to create temp dir", err))?;
        let jobs_file = tempdir.path().join("jobs.json");
        std::fs::write(&jobs_file, payload)
            .map_err(|err| BuildError::io("failed to write jobs file", err))?;

        let command = self.with_store(
            CommandSpec::new("nix")
                .args(["eval", "--impure", "-f"])
                .arg(self.extractor_src.join("make-drvs.nix"))
                .env("EXTRACTOR_JOBS_JSON_FILE", jobs_file.as_os_str()),
        );
        tracing::debug!(target: "depcrawl.sdist", command = %command, "computing build references");
        let result = run_command_checked(&command, &RunOptions::default())?;

        // `nix eval` prints the JSON document as a Nix string literal.
        let inner: String = serde_json::from_str(result.output.stdout.trim())
            .map_err(|err| BuildError::InvalidOutput(err.to_string()))?;
        let references: HashMap<String, String> = serde_json::from_str(&inner)
            .map_err(|err| BuildError::InvalidOutput(err.to_string()))?;

        for job in jobs.iter_mut() {
            job.build_ref = references
                .get(&format!("{}#{}", job.name, job.version))
                .cloned();
        }
        Ok(())
    }

    fn build(&self, job: &SdistJob, out_link: &Path) -> Result<PathBuf, BuildError> {
        let reference = job.build_ref.as_deref().ok_or(BuildError::MissingReference)?;
        let command = self.with_store(
            CommandSpec::new("nix-build")
                .arg(reference)
                .arg("-o")
                .arg(out_link),
        );
        let opts = RunOptions {
            timeout: Some(job.timeout),
            ..RunOptions::default()
        };
        run_command_checked(&command, &opts).map_err(BuildError::from_command)?;

        let target = std::fs::read_link(out_link)
            .map_err(|err| BuildError::io("failed to resolve build output", err))?;
        Ok(self.physical_path(target))
    }

    fn prime(&self, runtime_tags: &[String]) -> Result<(), BuildError> {
        let (pkg, version, url, sha256) = PRIME_PACKAGE;
        let py_versions = runtime_tags
            .iter()
            .map(|tag| nix_string(tag))
            .collect::<Vec<_>>()
            .join(" ");
        let mut command =
            CommandSpec::new("nix-build").arg(self.extractor_src.join("fast-extractor.nix"));
        for (name, value) in [
            ("url", nix_string(url)),
            ("sha256", nix_string(sha256)),
            ("pkg", nix_string(pkg)),
            ("version", nix_string(version)),
            ("pyVersions", format!("[ {py_versions} ]")),
        ] {
            command = command.arg("--arg").arg(name).arg(value);
        }
        let command = self.with_store(command.arg("--no-out-link"));
        let opts = RunOptions {
            timeout: Some(self.prime_timeout),
            ..RunOptions::default()
        };
        run_command_checked(&command, &opts)?;
        Ok(())
    }

    fn collect_garbage(&self) -> Result<(), BuildError> {
        let command = self.with_store(CommandSpec::new("nix-collect-garbage"));
        run_command_checked(&command, &RunOptions::default())?;
        Ok(())
    }

    fn store_root(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| PathBuf::from(NIX_STORE))
    }
}
