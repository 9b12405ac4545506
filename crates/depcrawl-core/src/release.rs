//! Release descriptors published by the upstream index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const FILES_BASE_URL: &str = "https://files.pythonhosted.org/packages";

/// `[sha256, filename]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<String>")]
pub struct SdistRelease {
    pub sha256: String,
    pub filename: String,
}

/// `[sha256, runtime_tag, ...]`, keyed by wheel filename.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<String>")]
pub struct WheelRelease {
    pub sha256: String,
    pub runtime_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("release descriptor needs at least two string elements, found {found}")]
pub struct DescriptorError {
    found: usize,
}

fn leading_strings(items: Vec<Value>) -> Result<(String, String), DescriptorError> {
    let found = items.len();
    let mut strings = items.into_iter().map(|item| match item {
        Value::String(s) => Some(s),
        _ => None,
    });
    match (strings.next().flatten(), strings.next().flatten()) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(DescriptorError { found }),
    }
}

impl TryFrom<Vec<Value>> for SdistRelease {
    type Error = DescriptorError;

    fn try_from(items: Vec<Value>) -> Result<Self, Self::Error> {
        let (sha256, filename) = leading_strings(items)?;
        Ok(Self { sha256, filename })
    }
}

impl From<SdistRelease> for Vec<String> {
    fn from(release: SdistRelease) -> Self {
        vec![release.sha256, release.filename]
    }
}

impl TryFrom<Vec<Value>> for WheelRelease {
    type Error = DescriptorError;

    fn try_from(items: Vec<Value>) -> Result<Self, Self::Error> {
        let (sha256, runtime_tag) = leading_strings(items)?;
        Ok(Self {
            sha256,
            runtime_tag,
        })
    }
}

impl From<WheelRelease> for Vec<String> {
    fn from(release: WheelRelease) -> Self {
        vec![release.sha256, release.runtime_tag]
    }
}

/// Release kinds available for one version. Unknown kinds are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseKinds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdist: Option<SdistRelease>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wheels: BTreeMap<String, WheelRelease>,
}

fn first_char(name: &str) -> &str {
    name.char_indices()
        .nth(1)
        .map_or(name, |(idx, _)| &name[..idx])
}

pub fn sdist_url(name: &str, filename: &str) -> String {
    format!("{FILES_BASE_URL}/source/{}/{name}/{filename}", first_char(name))
}

pub fn wheel_url(name: &str, runtime_tag: &str, filename: &str) -> String {
    format!(
        "{FILES_BASE_URL}/{runtime_tag}/{}/{name}/{filename}",
        first_char(name)
    )
}
