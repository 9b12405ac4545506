use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use depcrawl_config::{init_tracing, CrawlerConfig};
use depcrawl_core::ShardId;
use depcrawl_crawl::{
    CrawlReport, HttpFetcher, NixBuildSystem, SdistCrawler, WheelCrawler, ZipMetadataExtractor,
};

#[derive(Parser)]
#[command(
    name = "depcrawl",
    version,
    about = "Incremental dependency metadata crawler for source and wheel releases"
)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build source distributions and record their dependency metadata
    Sdist(SdistArgs),
    /// Download wheels and record their METADATA
    Wheel(WheelArgs),
    /// Print the shard id of a package name
    Shard(ShardArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the upstream index shards
    #[arg(long)]
    index_dir: Option<PathBuf>,
    /// Directory of the success store; errors go to `<dump-dir>-errors`
    #[arg(long)]
    dump_dir: Option<PathBuf>,
    /// Total time budget in minutes (0 = unbounded)
    #[arg(long)]
    max_minutes: Option<u64>,
    #[arg(long)]
    shard_start: Option<usize>,
    #[arg(long)]
    shard_count: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    /// Cap on the number of jobs planned per shard
    #[arg(long)]
    jobs_per_shard: Option<usize>,
    /// Only crawl these package names
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,
    /// Emit the run report as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut CrawlerConfig) {
        if let Some(dir) = &self.index_dir {
            config.index_dir = dir.clone();
        }
        if let Some(minutes) = self.max_minutes {
            config.run.max_minutes = minutes;
        }
        if let Some(start) = self.shard_start {
            config.run.shard_start = start;
        }
        if let Some(count) = self.shard_count {
            config.run.shard_count = count;
        }
        if self.workers.is_some() {
            config.run.workers = self.workers;
        }
        if self.jobs_per_shard.is_some() {
            config.run.jobs_per_shard = self.jobs_per_shard;
        }
        if !self.names.is_empty() {
            config.run.allow_names = self.names.clone();
        }
    }
}

#[derive(Args)]
struct SdistArgs {
    #[command(flatten)]
    run: RunArgs,
    /// Directory with the extractor's nix expressions
    #[arg(long)]
    extractor_src: Option<PathBuf>,
    /// Alternative nix store to build in
    #[arg(long)]
    store: Option<PathBuf>,
    /// Runtime tags to extract for, e.g. `37,38,39`
    #[arg(long, value_delimiter = ',')]
    python_versions: Vec<String>,
    /// Per-build timeout in seconds
    #[arg(long)]
    job_timeout: Option<u64>,
    /// Collect garbage when the store has less free space than this
    #[arg(long)]
    min_free_gb: Option<u64>,
}

impl SdistArgs {
    fn apply(&self, config: &mut CrawlerConfig) {
        self.run.apply(config);
        if let Some(dir) = &self.run.dump_dir {
            config.sdist.dump_dir = dir.clone();
        }
        if self.extractor_src.is_some() {
            config.sdist.extractor_src = self.extractor_src.clone();
        }
        if self.store.is_some() {
            config.sdist.store = self.store.clone();
        }
        if !self.python_versions.is_empty() {
            config.sdist.python_versions = self.python_versions.clone();
        }
        if let Some(secs) = self.job_timeout {
            config.sdist.job_timeout_secs = secs;
        }
        if let Some(gb) = self.min_free_gb {
            config.sdist.min_free_gb = gb;
        }
    }
}

#[derive(Args)]
struct WheelArgs {
    #[command(flatten)]
    run: RunArgs,
}

impl WheelArgs {
    fn apply(&self, config: &mut CrawlerConfig) {
        self.run.apply(config);
        if let Some(dir) = &self.run.dump_dir {
            config.wheel.dump_dir = dir.clone();
        }
    }
}

#[derive(Args)]
struct ShardArgs {
    /// Package name
    name: String,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => CrawlerConfig::load_from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CrawlerConfig::default(),
    };

    match cli.command {
        Command::Shard(args) => {
            println!("{}", ShardId::for_name(&args.name));
            Ok(0)
        }
        Command::Sdist(args) => {
            args.apply(&mut config);
            config.validate()?;
            init_tracing(&config.logging);

            let build = NixBuildSystem::new(
                config.extractor_src()?,
                config.sdist.store.clone(),
                config.sdist.prime_timeout(),
            );
            let report = SdistCrawler::new(&config, build)
                .run()
                .context("sdist crawl aborted")?;
            log_report("sdist", &report);
            print_report(&report, args.run.json)?;
            Ok(0)
        }
        Command::Wheel(args) => {
            args.apply(&mut config);
            config.validate()?;
            init_tracing(&config.logging);

            let fetcher = HttpFetcher::new(&config.wheel.user_agent(), config.wheel.request_timeout());
            let report = WheelCrawler::new(&config, fetcher, ZipMetadataExtractor)
                .run()
                .context("wheel crawl aborted")?;
            log_report("wheel", &report);
            print_report(&report, args.run.json)?;
            Ok(0)
        }
    }
}

fn log_report(crawl: &str, report: &CrawlReport) {
    tracing::info!(
        target: "depcrawl.cli",
        crawl,
        shards_visited = report.shards_visited,
        jobs_executed = report.jobs_executed,
        records_written = report.records_written,
        errors_written = report.errors_written,
        failures = report.failures,
        deadline_reached = report.deadline_reached,
        last_shard = report.last_shard.as_deref().unwrap_or("-"),
        "run finished"
    );
}

fn print_report(report: &CrawlReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
