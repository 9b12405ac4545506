use std::path::PathBuf;

use depcrawl_config::{ConfigError, CrawlerConfig};
use pretty_assertions::assert_eq;

#[test]
fn loads_partial_config_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("depcrawl.toml");
    std::fs::write(
        &path,
        r#"
index_dir = "/data/pypi"

[run]
max_minutes = 30
shard_start = 16
workers = 4
allow_names = ["requests"]

[sdist]
extractor_src = "/src/extractor"
python_versions = ["3.8", "310"]

[logging]
level = "debug"
json = true
"#,
    )
    .unwrap();

    let config = CrawlerConfig::load_from_path(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.index_dir, PathBuf::from("/data/pypi"));
    assert_eq!(config.run.shard_count, 256);
    assert_eq!(config.run.time_budget().unwrap().as_secs(), 30 * 60);
    assert_eq!(config.sdist_workers(), 4);
    assert_eq!(config.wheel_workers(), 4);
    assert_eq!(config.sdist.runtime_tags(), ["38", "310"]);
    assert_eq!(config.sdist.job_timeout_secs, 60);
    assert_eq!(config.wheel.max_attempts, 5);
    assert_eq!(config.extractor_src().unwrap(), PathBuf::from("/src/extractor"));
    assert!(config.logging.json);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = CrawlerConfig::load_from_str("[run]\nbucket_jobs = 3\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CrawlerConfig::load_from_path(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err}");
}

#[test]
fn validation_rejects_out_of_range_values() {
    let cases: &[(&str, fn(&mut CrawlerConfig))] = &[
        ("shard_start", |c| c.run.shard_start = 256),
        ("shard_count", |c| c.run.shard_count = 0),
        ("workers", |c| c.run.workers = Some(0)),
        ("python_versions", |c| c.sdist.python_versions.clear()),
        ("no digits", |c| c.sdist.python_versions = vec!["pypy".to_owned()]),
        ("max_attempts", |c| c.wheel.max_attempts = 0),
    ];
    for (expected, mutate) in cases {
        let mut config = CrawlerConfig::default();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "expected {expected:?} in {err}"
        );
    }
}

#[test]
fn python_versions_naming_the_same_tag_are_rejected() {
    let mut config = CrawlerConfig::default();
    config.sdist.python_versions = vec!["3.8".to_owned(), "39".to_owned(), "38".to_owned()];

    let err = config.validate().unwrap_err();
    assert!(
        err.to_string()
            .contains(r#"entries "3.8" and "38" name the same runtime tag"#),
        "{err}"
    );
}

#[test]
fn sdist_runs_require_extractor_src() {
    let err = CrawlerConfig::default().extractor_src().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
