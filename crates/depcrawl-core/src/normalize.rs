//! Canonicalization of build failure logs.
//!
//! Failure logs end up verbatim in the error store, so they are rewritten into a form where
//! incidental details (store hashes, interpreter versions, line numbers, temp directories, the
//! version being built) no longer differ between otherwise identical failures.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum number of characters kept per log line.
pub const MAX_LINE_WIDTH: usize = 400;

/// Maximum number of lines kept per log.
pub const MAX_LINES: usize = 90;

/// Failures that collapse the whole log to the phrase itself.
const COMMON_FAILURES: &[&str] = &["unpacker produced multiple directories"];

/// Lines containing any of these are dropped.
const NOISE_MARKERS: &[&str] = &[
    "/homeless-shelter/.cache/pip/http",
    "/homeless-shelter/.cache/pip",
    "DEPRECATION: Python 2.7",
];

/// Markers of a build machine running out of disk, not of a broken package.
const INFRASTRUCTURE_MARKERS: &[&str] = &["o space left on device", "lack of free disk space"];

struct Patterns {
    store_hash: Regex,
    spaces: Regex,
    python_version: Regex,
    line_number: Regex,
    tmp_dir: Regex,
    trailing_exception: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        store_hash: Regex::new(r"(/nix/store/)\w+(-)").expect("store hash regex should compile"),
        spaces: Regex::new(r" {2,}").expect("whitespace regex should compile"),
        python_version: Regex::new(r"python[\d.\-ab]+").expect("python regex should compile"),
        line_number: Regex::new(r"line \d+").expect("line number regex should compile"),
        tmp_dir: Regex::new(r"tmp\w*").expect("tmp dir regex should compile"),
        trailing_exception: Regex::new(r"^(?s:.*)\s([\w.]*Error:.*)")
            .expect("exception regex should compile"),
    })
}

/// Rewrite a failure log into its canonical form.
///
/// `version` is the package version being built; occurrences are redacted literally.
pub fn normalize_error_log(log: &str, version: &str) -> String {
    let p = patterns();

    let log = p.store_hash.replace_all(log, "${1}#hash#${2}");
    let log = p.spaces.replace_all(&log, " ");
    let log = p.python_version.replace_all(&log, "python#VER#");
    let log = p.line_number.replace_all(&log, "line #NUM#");
    let log = p.tmp_dir.replace_all(&log, "#TMP#");
    let mut log = log.into_owned();
    if !version.is_empty() {
        log = log.replace(version, "#PKG_VER#");
    }

    if let Some(common) = COMMON_FAILURES.iter().find(|err| log.contains(*err)) {
        log = (*common).to_owned();
    }

    if let Some(exception) = p
        .trailing_exception
        .captures(&log)
        .and_then(|caps| caps.get(1))
    {
        log = exception.as_str().to_owned();
    }

    let mut out = String::with_capacity(log.len().min(MAX_LINES * MAX_LINE_WIDTH));
    for line in log
        .split_inclusive('\n')
        .filter(|line| !NOISE_MARKERS.iter().any(|marker| line.contains(marker)))
        .take(MAX_LINES)
    {
        let (content, newline) = match line.strip_suffix('\n') {
            Some(content) => (content, true),
            None => (line, false),
        };
        match content.char_indices().nth(MAX_LINE_WIDTH) {
            Some((cut, _)) => out.push_str(&content[..cut]),
            None => out.push_str(content),
        }
        if newline {
            out.push('\n');
        }
    }
    out
}

/// Whether a failure log describes exhaustion of local disk or build cache space.
///
/// Pass the raw log: normalization keeps only the first [`MAX_LINES`] lines, and the marker
/// usually comes last.
pub fn is_infrastructure_failure(log: &str) -> bool {
    INFRASTRUCTURE_MARKERS.iter().any(|marker| log.contains(marker))
}
