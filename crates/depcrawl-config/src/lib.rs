//! Configuration for the depcrawl crawlers.
//!
//! Configuration is loaded from TOML once, overlaid with command line flags by the CLI and then
//! passed down explicitly; no component reads the process environment itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use depcrawl_core::{normalize_runtime_tag, SHARD_COUNT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlerConfig {
    /// Directory holding the upstream index shards.
    pub index_dir: PathBuf,
    pub run: RunConfig,
    pub sdist: SdistConfig,
    pub wheel: WheelConfig,
    pub logging: LoggingConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./pypi"),
            run: RunConfig::default(),
            sdist: SdistConfig::default(),
            wheel: WheelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Settings shared by both crawlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Total time budget of one run in minutes; `0` means unbounded.
    pub max_minutes: u64,
    pub shard_start: usize,
    pub shard_count: usize,
    /// Worker pool width. Defaults depend on the crawler.
    pub workers: Option<usize>,
    /// Maximum number of jobs executed per shard.
    pub jobs_per_shard: Option<usize>,
    /// When non-empty, only these packages are crawled.
    pub allow_names: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_minutes: 0,
            shard_start: 0,
            shard_count: SHARD_COUNT,
            workers: None,
            jobs_per_shard: None,
            allow_names: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        (self.max_minutes > 0).then(|| Duration::from_secs(self.max_minutes.saturating_mul(60)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdistConfig {
    /// Success store directory. The error store lives next to it in `<dump_dir>-errors`.
    pub dump_dir: PathBuf,
    /// Directory with the extractor's Nix expressions (`make-drvs.nix`, `fast-extractor.nix`).
    pub extractor_src: Option<PathBuf>,
    /// Alternate Nix store root.
    pub store: Option<PathBuf>,
    pub python_versions: Vec<String>,
    pub job_timeout_secs: u64,
    /// Garbage-collect the build store when free space drops below this many (decimal) GB.
    pub min_free_gb: u64,
    pub prime_timeout_secs: u64,
}

impl Default for SdistConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("./sdist"),
            extractor_src: None,
            store: None,
            python_versions: ["27", "36", "37", "38", "39", "310", "311"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            job_timeout_secs: 60,
            min_free_gb: 0,
            prime_timeout_secs: 1000,
        }
    }
}

impl SdistConfig {
    pub fn error_dir(&self) -> PathBuf {
        error_dir_for(&self.dump_dir)
    }

    /// Runtime tags in their stored, digits-only form.
    pub fn runtime_tags(&self) -> Vec<String> {
        self.python_versions
            .iter()
            .map(|tag| normalize_runtime_tag(tag))
            .collect()
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn prime_timeout(&self) -> Duration {
        Duration::from_secs(self.prime_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WheelConfig {
    pub dump_dir: PathBuf,
    /// Contact address sent in the `User-Agent` header.
    pub contact_email: Option<String>,
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("./wheel"),
            contact_email: None,
            max_attempts: 5,
            retry_backoff_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

impl WheelConfig {
    pub fn error_dir(&self) -> PathBuf {
        error_dir_for(&self.dump_dir)
    }

    pub fn user_agent(&self) -> String {
        match self.contact_email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => format!("Pypi Daily Sync (Contact: {email})"),
            _ => "Pypi Daily Sync".to_owned(),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn error_dir_for(dump_dir: &Path) -> PathBuf {
    let mut dir = dump_dir.as_os_str().to_owned();
    dir.push("-errors");
    PathBuf::from(dir)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` would include a snippet of the input; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    re.replace_all(message, r#""<redacted>""#).into_owned()
}

impl CrawlerConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(target: "depcrawl.config", path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.run.shard_start >= SHARD_COUNT {
            return invalid(format!(
                "run.shard_start must be below {SHARD_COUNT}, found {}",
                self.run.shard_start
            ));
        }
        if self.run.shard_count == 0 {
            return invalid("run.shard_count must be at least 1".to_owned());
        }
        if self.run.workers == Some(0) {
            return invalid("run.workers must be at least 1".to_owned());
        }
        if self.sdist.python_versions.is_empty() {
            return invalid("sdist.python_versions must not be empty".to_owned());
        }
        if let Some(tag) = self
            .sdist
            .python_versions
            .iter()
            .find(|tag| normalize_runtime_tag(tag).is_empty())
        {
            return invalid(format!("sdist.python_versions entry {tag:?} has no digits"));
        }
        let mut seen = HashMap::new();
        for tag in &self.sdist.python_versions {
            if let Some(first) = seen.insert(normalize_runtime_tag(tag), tag) {
                return invalid(format!(
                    "sdist.python_versions entries {first:?} and {tag:?} name the same runtime tag"
                ));
            }
        }
        if self.wheel.max_attempts == 0 {
            return invalid("wheel.max_attempts must be at least 1".to_owned());
        }
        Ok(())
    }

    /// The extractor source directory, required by the sdist crawler.
    pub fn extractor_src(&self) -> Result<&Path, ConfigError> {
        self.sdist.extractor_src.as_deref().ok_or_else(|| {
            ConfigError::Invalid(
                "sdist.extractor_src must point at the extractor's nix expressions".to_owned(),
            )
        })
    }

    /// Worker count for the sdist crawler: configured, or twice the available parallelism.
    pub fn sdist_workers(&self) -> usize {
        self.run.workers.unwrap_or_else(|| 2 * available_parallelism())
    }

    /// Worker count for the wheel crawler: configured, or the available parallelism.
    pub fn wheel_workers(&self) -> usize {
        self.run.workers.unwrap_or_else(available_parallelism)
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
