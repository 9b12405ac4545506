use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use depcrawl_config::CrawlerConfig;
use depcrawl_core::ShardId;
use depcrawl_crawl::{ArtifactFetcher, BuildError, BuildSystem, FetchError, SdistJob};
use depcrawl_store::shard_path;
use serde_json::{Map, Value};
use tempfile::TempDir;

pub struct Fixture {
    _root: TempDir,
    pub config: CrawlerConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = CrawlerConfig::default();
        config.index_dir = root.path().join("pypi");
        config.sdist.dump_dir = root.path().join("sdist");
        config.sdist.python_versions = vec!["37".into(), "38".into(), "3.9".into()];
        config.sdist.extractor_src = Some(root.path().join("extractor"));
        config.wheel.dump_dir = root.path().join("wheel");
        config.run.workers = Some(2);
        Self {
            _root: root,
            config,
        }
    }

    /// Restrict the run to the shard holding `name`.
    pub fn only_shard_of(&mut self, name: &str) -> ShardId {
        let shard = ShardId::for_name(name);
        self.config.run.shard_start = shard.index();
        self.config.run.shard_count = 1;
        shard
    }

    /// Write an upstream index, splitting the top-level packages into their shard files.
    pub fn write_index(&self, packages: Value) {
        let Value::Object(packages) = packages else {
            panic!("index must be an object");
        };
        let mut shards: BTreeMap<ShardId, Map<String, Value>> = BTreeMap::new();
        for (name, versions) in packages {
            shards
                .entry(ShardId::for_name(&name))
                .or_default()
                .insert(name, versions);
        }
        fs::create_dir_all(&self.config.index_dir).unwrap();
        for (shard, packages) in shards {
            fs::write(
                shard_path(&self.config.index_dir, shard),
                Value::Object(packages).to_string(),
            )
            .unwrap();
        }
    }
}

pub enum BuildScript {
    /// The build succeeds and leaves these files in its result directory.
    Files(Vec<(&'static str, String)>),
    Fail(String),
    Timeout(String),
}

/// A build system that plays back scripted results keyed by `name#version`.
pub struct FakeBuild {
    scripts: HashMap<String, BuildScript>,
    unresolved: HashSet<String>,
    free_bytes: u64,
    pub builds: Mutex<Vec<String>>,
    pub primes: AtomicUsize,
    pub collections: AtomicUsize,
}

impl FakeBuild {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            unresolved: HashSet::new(),
            free_bytes: u64::MAX,
            builds: Mutex::new(Vec::new()),
            primes: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
        }
    }

    pub fn script(mut self, name: &str, version: &str, script: BuildScript) -> Self {
        self.scripts.insert(format!("{name}#{version}"), script);
        self
    }

    /// Leave `name` without a build reference.
    pub fn unresolved(mut self, name: &str) -> Self {
        self.unresolved.insert(name.to_owned());
        self
    }

    pub fn free_bytes(mut self, free: u64) -> Self {
        self.free_bytes = free;
        self
    }

    pub fn built(&self) -> Vec<String> {
        let mut builds = self.builds.lock().unwrap().clone();
        builds.sort();
        builds
    }
}

impl BuildSystem for FakeBuild {
    fn prepare(&self, jobs: &mut [SdistJob]) -> Result<(), BuildError> {
        for job in jobs {
            job.build_ref = (!self.unresolved.contains(&job.name))
                .then(|| format!("{}#{}", job.name, job.version));
        }
        Ok(())
    }

    fn build(&self, job: &SdistJob, out_link: &Path) -> Result<PathBuf, BuildError> {
        let reference = job.build_ref.clone().ok_or(BuildError::MissingReference)?;
        self.builds.lock().unwrap().push(reference.clone());
        match self.scripts.get(&reference) {
            Some(BuildScript::Files(files)) => {
                fs::create_dir_all(out_link).unwrap();
                for (name, contents) in files {
                    fs::write(out_link.join(name), contents).unwrap();
                }
                Ok(out_link.to_path_buf())
            }
            Some(BuildScript::Fail(log)) => Err(BuildError::Failed { log: log.clone() }),
            Some(BuildScript::Timeout(log)) => Err(BuildError::TimedOut { log: log.clone() }),
            None => Err(BuildError::Failed {
                log: format!("no script for {reference}"),
            }),
        }
    }

    fn prime(&self, _runtime_tags: &[String]) -> Result<(), BuildError> {
        self.primes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn collect_garbage(&self) -> Result<(), BuildError> {
        self.collections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn store_root(&self) -> PathBuf {
        PathBuf::from("/fake/store")
    }

    fn free_space(&self) -> io::Result<u64> {
        Ok(self.free_bytes)
    }
}

pub enum Response {
    Body(Vec<u8>),
    Status(u16),
}

/// An artifact fetcher serving canned responses by URL. Unknown URLs are 404.
pub struct FakeFetcher {
    responses: HashMap<String, Response>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn respond(mut self, url: String, response: Response) -> Self {
        self.responses.insert(url, response);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl ArtifactFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_owned()).or_default() += 1;
        match self.responses.get(url) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Status(404)) | None => Err(FetchError::NotFound),
            Some(Response::Status(status)) => Err(FetchError::Status(*status)),
        }
    }
}

/// A minimal wheel holding only a METADATA member.
pub fn wheel_bytes(dist_info: &str, metadata: &str) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(
        format!("{dist_info}/METADATA"),
        zip::write::SimpleFileOptions::default(),
    )
    .unwrap();
    zip.write_all(metadata.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}
