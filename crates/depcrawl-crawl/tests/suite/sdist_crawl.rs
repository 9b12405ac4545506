use std::sync::atomic::Ordering;
use std::time::Duration;

use depcrawl_core::{Requirements, SdistRecord, ShardId};
use depcrawl_crawl::{CrawlError, SdistCrawler, WorkerPool};
use depcrawl_store::{shard_path, SdistStore};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::suite::support::{BuildScript, FakeBuild, Fixture};

const IMP_TRACEBACK: &str = "Traceback (most recent call last):\n  File \"setup.py\", line 3, in <module>\n    import imp\nModuleNotFoundError: No module named 'imp'";

fn sdist(name: &str, version: &str) -> serde_json::Value {
    json!({ "sdist": ["0".repeat(64), format!("{name}-{version}.tar.gz")] })
}

fn record(requires: &[&str]) -> SdistRecord {
    SdistRecord {
        install_requires: Requirements::List(requires.iter().map(|r| (*r).to_owned()).collect()),
        ..SdistRecord::default()
    }
}

fn stores(fx: &Fixture, shard: ShardId) -> (SdistStore<SdistRecord>, SdistStore<String>) {
    (
        SdistStore::open(&fx.config.sdist.dump_dir, shard).unwrap(),
        SdistStore::open(fx.config.sdist.error_dir(), shard).unwrap(),
    )
}

fn crawl(fx: &Fixture, build: FakeBuild) -> SdistCrawler<FakeBuild> {
    SdistCrawler::new(&fx.config, build).with_pool(WorkerPool::new(2))
}

#[test]
fn results_are_split_between_success_and_error_stores() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("alpha");
    fx.write_index(json!({ "alpha": { "1.0": sdist("alpha", "1.0") } }));
    let extracted = r#"{"name": "alpha", "version": "1.0", "install_requires": ["six"]}"#;
    let build = FakeBuild::new().script(
        "alpha",
        "1.0",
        BuildScript::Files(vec![
            ("python37.json", extracted.to_owned()),
            ("python38.json", extracted.to_owned()),
            ("python39.json", String::new()),
            ("python39.log", IMP_TRACEBACK.to_owned()),
        ]),
    );

    let crawler = crawl(&fx, build);
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(1)).unwrap();

    assert_eq!(report.shards_visited, 1);
    assert_eq!(report.jobs_planned, 1);
    assert_eq!(report.jobs_executed, 1);
    assert_eq!(report.records_written, 2);
    assert_eq!(report.errors_written, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(crawler.build_system().built(), vec!["alpha#1.0".to_owned()]);
    assert_eq!(crawler.build_system().primes.load(Ordering::SeqCst), 1);

    let (success, errors) = stores(&fx, shard);
    assert_eq!(success.get("alpha", "1.0", "37"), Some(&record(&["six"])));
    assert_eq!(success.get("alpha", "1.0", "38"), Some(&record(&["six"])));
    assert!(!success.contains("alpha", "1.0", "39"));
    assert_eq!(
        errors.get("alpha", "1.0", "39").map(String::as_str),
        Some("ModuleNotFoundError: No module named 'imp'")
    );

    let raw: serde_json::Value = serde_json::from_slice(
        &std::fs::read(shard_path(&fx.config.sdist.dump_dir, shard)).unwrap(),
    )
    .unwrap();
    assert_eq!(
        raw,
        json!({
            "alpha": {
                "1.0": {
                    "37": { "install_requires": ["six"] },
                    "38": { "$ref": "37" }
                }
            }
        })
    );
}

#[test]
fn second_run_has_nothing_left_to_do() {
    let mut fx = Fixture::new();
    fx.only_shard_of("alpha");
    fx.write_index(json!({ "alpha": { "1.0": sdist("alpha", "1.0") } }));
    let build = FakeBuild::new().script(
        "alpha",
        "1.0",
        BuildScript::Fail("error: could not find setup.py".to_owned()),
    );
    let crawler = crawl(&fx, build);

    let first = crawler.run_with_rng(&mut StdRng::seed_from_u64(1)).unwrap();
    assert_eq!(first.errors_written, 3);

    let second = crawler.run_with_rng(&mut StdRng::seed_from_u64(2)).unwrap();
    assert_eq!(second.jobs_planned, 0);
    assert_eq!(second.jobs_executed, 0);
    assert_eq!(crawler.build_system().built().len(), 1);
    assert_eq!(crawler.build_system().primes.load(Ordering::SeqCst), 2);
}

#[test]
fn packages_gone_upstream_are_purged() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("beta");
    fx.write_index(json!({}));

    let mut success = SdistStore::<SdistRecord>::new(&fx.config.sdist.dump_dir, shard);
    for version in ["1.0", "1.1", "2.0"] {
        success.insert("beta", version, "37", record(&[]));
    }
    success.save().unwrap();
    let mut errors = SdistStore::<String>::new(fx.config.sdist.error_dir(), shard);
    errors.insert("beta", "0.1", "38", "error: boom".to_owned());
    errors.save().unwrap();

    let crawler = crawl(&fx, FakeBuild::new());
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(1)).unwrap();

    assert_eq!(report.purged, 4);
    assert_eq!(report.jobs_planned, 0);
    assert!(crawler.build_system().built().is_empty());
    let (success, errors) = stores(&fx, shard);
    assert!(!success.contains_package("beta"));
    assert!(!errors.contains_package("beta"));
}

#[test]
fn disk_exhaustion_leaves_no_trace() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("alpha");
    fx.write_index(json!({ "alpha": { "1.0": sdist("alpha", "1.0") } }));
    let build = FakeBuild::new().script(
        "alpha",
        "1.0",
        BuildScript::Timeout("OSError: [Errno 28] No space left on device".to_owned()),
    );

    let report = crawl(&fx, build)
        .run_with_rng(&mut StdRng::seed_from_u64(1))
        .unwrap();

    assert_eq!(report.discarded, 1);
    assert_eq!(report.records_written, 0);
    assert_eq!(report.errors_written, 0);
    assert!(!shard_path(&fx.config.sdist.dump_dir, shard).exists());
    assert!(!shard_path(&fx.config.sdist.error_dir(), shard).exists());
}

#[test]
fn exhausted_budget_dispatches_no_builds() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("alpha");
    fx.write_index(json!({ "alpha": { "1.0": sdist("alpha", "1.0") } }));

    let crawler = crawl(&fx, FakeBuild::new()).with_time_budget(Some(Duration::ZERO));
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(1)).unwrap();

    assert_eq!(report.jobs_planned, 1);
    assert_eq!(report.jobs_executed, 0);
    assert_eq!(report.failures, 1);
    assert!(report.deadline_reached);
    assert!(crawler.build_system().built().is_empty());
    let (success, errors) = stores(&fx, shard);
    assert_eq!(success.leaf_count() + errors.leaf_count(), 0);
}

#[test]
fn every_requested_tag_lands_in_exactly_one_store() {
    let fx = Fixture::new();
    fx.write_index(json!({
        "alpha": { "1.0": sdist("alpha", "1.0"), "2.0": sdist("alpha", "2.0") },
        "gamma": { "0.1": sdist("gamma", "0.1") },
        "delta": { "3.0": { "wheels": { "delta-3.0-py3-none-any.whl": ["0", "py3"] } } },
        "six": { "1.16.0": sdist("six", "1.16.0") },
    }));
    let ok = r#"{"install_requires": "requests"}"#.to_owned();
    let build = FakeBuild::new()
        .script(
            "alpha",
            "1.0",
            BuildScript::Files(vec![
                ("python37.json", ok.clone()),
                ("python38.json", ok.clone()),
                ("python39.json", ok.clone()),
            ]),
        )
        .script(
            "alpha",
            "2.0",
            BuildScript::Fail("error: setup.py crashed".to_owned()),
        )
        .script(
            "gamma",
            "0.1",
            BuildScript::Files(vec![
                ("python37.json", ok.clone()),
                ("python38.log", "SyntaxError: invalid syntax".to_owned()),
                ("python39.json", "  \n".to_owned()),
                ("python39.log", "error: no compiler".to_owned()),
            ]),
        )
        .unresolved("six");

    let crawler = SdistCrawler::new(&fx.config, build).with_pool(WorkerPool::new(4));
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(7)).unwrap();

    assert_eq!(report.shards_visited, 256);
    assert_eq!(report.jobs_planned, 4);
    assert_eq!(report.failures, 1);
    assert_eq!(report.records_written, 4);
    assert_eq!(report.errors_written, 5);

    for (name, versions) in [("alpha", &["1.0", "2.0"][..]), ("gamma", &["0.1"][..])] {
        let (success, errors) = stores(&fx, ShardId::for_name(name));
        for version in versions {
            for tag in ["37", "38", "39"] {
                let hits = [
                    success.contains(name, version, tag),
                    errors.contains(name, version, tag),
                ];
                assert_eq!(
                    hits.iter().filter(|hit| **hit).count(),
                    1,
                    "{name} {version} {tag}"
                );
            }
        }
    }
    let (_, errors) = stores(&fx, ShardId::for_name("gamma"));
    assert_eq!(
        errors.get("gamma", "0.1", "38").map(String::as_str),
        Some("SyntaxError: invalid syntax")
    );

    let (success, errors) = stores(&fx, ShardId::for_name("six"));
    assert!(!success.contains_package("six"));
    assert!(!errors.contains_package("six"));

    let rerun = crawler.run_with_rng(&mut StdRng::seed_from_u64(8)).unwrap();
    assert_eq!(rerun.jobs_planned, 1, "only the failed job is retried");
}

#[test]
fn garbage_collection_forces_a_fresh_prime() {
    let mut fx = Fixture::new();
    fx.config.sdist.min_free_gb = 10;
    fx.write_index(json!({
        "alpha": { "1.0": sdist("alpha", "1.0") },
        "beta": { "1.0": sdist("beta", "1.0") },
    }));
    let build = FakeBuild::new().free_bytes(1_000);

    let crawler = crawl(&fx, build);
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(3)).unwrap();

    let build = crawler.build_system();
    assert_eq!(report.garbage_collections, 256);
    assert_eq!(build.collections.load(Ordering::SeqCst), 256);
    // Once at start, then again before each of the two shards with jobs.
    assert_eq!(build.primes.load(Ordering::SeqCst), 3);
    assert_eq!(build.built(), vec!["alpha#1.0".to_owned(), "beta#1.0".to_owned()]);
}

#[test]
fn failed_build_references_abort_the_run() {
    struct Unreachable;

    impl depcrawl_crawl::BuildSystem for Unreachable {
        fn prepare(
            &self,
            _jobs: &mut [depcrawl_crawl::SdistJob],
        ) -> Result<(), depcrawl_crawl::BuildError> {
            Err(depcrawl_crawl::BuildError::InvalidOutput(
                "evaluation aborted".to_owned(),
            ))
        }

        fn build(
            &self,
            _job: &depcrawl_crawl::SdistJob,
            _out_link: &std::path::Path,
        ) -> Result<std::path::PathBuf, depcrawl_crawl::BuildError> {
            unreachable!("nothing is built without references")
        }

        fn prime(&self, _runtime_tags: &[String]) -> Result<(), depcrawl_crawl::BuildError> {
            Ok(())
        }

        fn collect_garbage(&self) -> Result<(), depcrawl_crawl::BuildError> {
            Ok(())
        }

        fn store_root(&self) -> std::path::PathBuf {
            std::path::PathBuf::from("/unreachable")
        }
    }

    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("alpha");
    fx.write_index(json!({ "alpha": { "1.0": sdist("alpha", "1.0") } }));

    let err = SdistCrawler::new(&fx.config, Unreachable)
        .with_pool(WorkerPool::inline())
        .run_with_rng(&mut StdRng::seed_from_u64(1))
        .unwrap_err();
    match err {
        CrawlError::Prepare { shard: failed, .. } => assert_eq!(failed, shard),
        other => panic!("unexpected error: {other:?}"),
    }
}
