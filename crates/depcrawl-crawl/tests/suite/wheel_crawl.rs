use std::time::Duration;

use depcrawl_core::{wheel_url, ArchiveErrorKind, ShardId, WheelError, WheelRecord};
use depcrawl_crawl::{RetryPolicy, WheelCrawler, WorkerPool, ZipMetadataExtractor};
use depcrawl_store::WheelStore;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::suite::support::{wheel_bytes, FakeFetcher, Fixture, Response};

const METADATA: &str = "Metadata-Version: 2.1
Name: wheelie
Version: 1.0
Requires-Dist: requests (>=2.0)
Requires-Dist: pytest ; extra == 'test'
Provides-Extra: test
Requires-Python: >=3.7

A long description that is not part of the headers.
";

const PURE: &str = "wheelie-1.0-py3-none-any.whl";
const CP37: &str = "wheelie-1.0-cp37-cp37m-manylinux1_x86_64.whl";
const CP38: &str = "wheelie-1.0-cp38-cp38-manylinux1_x86_64.whl";
const CP39: &str = "wheelie-1.0-cp39-cp39-manylinux1_x86_64.whl";
const OLD: &str = "wheelie-0.9-py3-none-any.whl";

fn index() -> serde_json::Value {
    json!({
        "wheelie": {
            "1.0": {
                "sdist": ["0", "wheelie-1.0.tar.gz"],
                "wheels": {
                    PURE: ["1", "py3"],
                    CP37: ["2", "cp37"],
                    CP38: ["3", "cp38"],
                    CP39: ["4", "cp39"],
                }
            },
            "0.9": { "wheels": { OLD: ["5", "py3"] } }
        }
    })
}

fn fetcher() -> FakeFetcher {
    FakeFetcher::new()
        .respond(
            wheel_url("wheelie", "py3", PURE),
            Response::Body(wheel_bytes("wheelie-1.0.dist-info", METADATA)),
        )
        .respond(
            wheel_url("wheelie", "cp37", CP37),
            Response::Body(b"definitely not a zip".to_vec()),
        )
        .respond(wheel_url("wheelie", "cp38", CP38), Response::Status(404))
        .respond(wheel_url("wheelie", "cp39", CP39), Response::Status(503))
        .respond(wheel_url("wheelie", "py3", OLD), Response::Status(500))
}

fn crawler(fx: &Fixture) -> WheelCrawler<FakeFetcher, ZipMetadataExtractor> {
    WheelCrawler::new(&fx.config, fetcher(), ZipMetadataExtractor)
        .with_pool(WorkerPool::new(2))
        .with_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        })
}

fn stores(fx: &Fixture, shard: ShardId) -> (WheelStore<WheelRecord>, WheelStore<WheelError>) {
    (
        WheelStore::open(&fx.config.wheel.dump_dir, shard).unwrap(),
        WheelStore::open(fx.config.wheel.error_dir(), shard).unwrap(),
    )
}

#[test]
fn every_wheel_outcome_is_classified() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("wheelie");
    fx.write_index(index());

    let crawler = crawler(&fx);
    let report = crawler.run_with_rng(&mut StdRng::seed_from_u64(5)).unwrap();

    assert_eq!(report.jobs_planned, 5);
    assert_eq!(report.jobs_executed, 5);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.errors_written, 3);
    assert_eq!(report.failures, 1);

    let (success, errors) = stores(&fx, shard);
    assert_eq!(
        success.get("wheelie", "py3", "1.0", PURE),
        Some(&WheelRecord {
            requires_dist: vec![
                "requests (>=2.0)".to_owned(),
                "pytest ; extra == 'test'".to_owned(),
            ],
            provides_extras: vec!["test".to_owned()],
            requires_external: Vec::new(),
            requires_python: Some(">=3.7".to_owned()),
        })
    );
    assert_eq!(
        errors.get("wheelie", "cp37", "1.0", CP37),
        Some(&WheelError::BadArchive {
            kind: ArchiveErrorKind::BadZip
        })
    );
    assert_eq!(
        errors.get("wheelie", "cp38", "1.0", CP38),
        Some(&WheelError::NotFound)
    );
    assert_eq!(
        errors.get("wheelie", "cp39", "1.0", CP39),
        Some(&WheelError::RetriesExhausted { status: 503 })
    );
    assert!(!success.contains("wheelie", "py3", "0.9", OLD));
    assert!(!errors.contains("wheelie", "py3", "0.9", OLD));

    let fetcher = crawler.fetcher();
    assert_eq!(fetcher.calls(&wheel_url("wheelie", "cp39", CP39)), 2);
    assert_eq!(fetcher.calls(&wheel_url("wheelie", "cp38", CP38)), 1);
    assert_eq!(fetcher.calls(&wheel_url("wheelie", "py3", OLD)), 1);
}

#[test]
fn only_unrecorded_wheels_are_fetched_again() {
    let mut fx = Fixture::new();
    fx.only_shard_of("wheelie");
    fx.write_index(index());
    let crawler = crawler(&fx);

    crawler.run_with_rng(&mut StdRng::seed_from_u64(5)).unwrap();
    let rerun = crawler.run_with_rng(&mut StdRng::seed_from_u64(6)).unwrap();

    assert_eq!(rerun.jobs_planned, 1);
    assert_eq!(rerun.failures, 1);
    assert_eq!(crawler.fetcher().calls(&wheel_url("wheelie", "py3", PURE)), 1);
    assert_eq!(crawler.fetcher().calls(&wheel_url("wheelie", "py3", OLD)), 2);
}

#[test]
fn files_no_longer_listed_are_purged() {
    let mut fx = Fixture::new();
    let shard = fx.only_shard_of("wheelie");
    fx.write_index(index());

    let mut success = WheelStore::<WheelRecord>::new(&fx.config.wheel.dump_dir, shard);
    success.insert("wheelie", "py3", "0.5", "wheelie-0.5-py3-none-any.whl", WheelRecord::default());
    // Listed upstream, but under a different runtime tag.
    success.insert("wheelie", "py2", "1.0", PURE, WheelRecord::default());
    success.save().unwrap();

    let report = crawler(&fx)
        .with_time_budget(Some(Duration::ZERO))
        .run_with_rng(&mut StdRng::seed_from_u64(1))
        .unwrap();

    assert_eq!(report.purged, 2);
    let (success, _) = stores(&fx, shard);
    assert!(!success.contains("wheelie", "py3", "0.5", "wheelie-0.5-py3-none-any.whl"));
    assert!(!success.contains("wheelie", "py2", "1.0", PURE));
}
