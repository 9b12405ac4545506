//! Payload records stored per `(package, version, runtime tag)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A requirement field after ingestion.
///
/// Extractors emit requirement fields as a string, an arbitrarily nested list of strings, or a
/// map of those. They are flattened once when results are ingested so consumers only ever see
/// one of these shapes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirements {
    #[default]
    Absent,
    List(Vec<String>),
    Keyed(BTreeMap<String, Vec<String>>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported {found} value in requirement list")]
    UnsupportedValue { found: &'static str },
    #[error("extractor output is a {found}, expected an object")]
    NotAnObject { found: &'static str },
}

impl Requirements {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Flatten a raw extractor value.
    ///
    /// Empty values (`null`, `false`, `""`, `[]`, `{}`) are absent.
    pub fn from_raw(value: &Value) -> Result<Self, IngestError> {
        match value {
            Value::Null | Value::Bool(false) => Ok(Self::Absent),
            Value::String(s) if s.is_empty() => Ok(Self::Absent),
            Value::String(s) => Ok(Self::List(vec![s.clone()])),
            Value::Array(_) => {
                let list = flatten_list(value)?;
                if list.is_empty() {
                    Ok(Self::Absent)
                } else {
                    Ok(Self::List(list))
                }
            }
            Value::Object(map) if map.is_empty() => Ok(Self::Absent),
            Value::Object(map) => {
                let mut keyed = BTreeMap::new();
                for (key, value) in map {
                    keyed.insert(key.clone(), flatten_list(value)?);
                }
                Ok(Self::Keyed(keyed))
            }
            other => Err(IngestError::UnsupportedValue {
                found: json_kind(other),
            }),
        }
    }
}

fn flatten_list(value: &Value) -> Result<Vec<String>, IngestError> {
    fn walk(value: &Value, out: &mut Vec<String>) -> Result<(), IngestError> {
        match value {
            Value::String(s) => {
                out.push(s.clone());
                Ok(())
            }
            Value::Array(items) => items.iter().try_for_each(|item| walk(item, out)),
            Value::Null => Ok(()),
            other => Err(IngestError::UnsupportedValue {
                found: json_kind(other),
            }),
        }
    }

    let mut out = Vec::new();
    walk(value, &mut out)?;
    Ok(out)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Dependency metadata extracted from a source distribution for one runtime tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdistRecord {
    #[serde(default, skip_serializing_if = "Requirements::is_absent")]
    pub install_requires: Requirements,
    #[serde(default, skip_serializing_if = "Requirements::is_absent")]
    pub setup_requires: Requirements,
    #[serde(default, skip_serializing_if = "Requirements::is_absent")]
    pub extras_require: Requirements,
    #[serde(default, skip_serializing_if = "Requirements::is_absent")]
    pub tests_require: Requirements,
    #[serde(default, skip_serializing_if = "Requirements::is_absent")]
    pub python_requires: Requirements,
}

impl SdistRecord {
    /// Build a record from the raw JSON an extractor wrote for one runtime tag.
    ///
    /// Identity fields (`name`, `version`) and unknown keys are dropped. A field that cannot be
    /// flattened is recorded as absent.
    pub fn from_extractor_output(raw: &Value) -> Result<Self, IngestError> {
        let Value::Object(map) = raw else {
            return Err(IngestError::NotAnObject {
                found: json_kind(raw),
            });
        };

        let field = |key: &str| -> Requirements {
            let Some(value) = map.get(key) else {
                return Requirements::Absent;
            };
            Requirements::from_raw(value).unwrap_or_else(|err| {
                tracing::debug!(
                    target: "depcrawl.ingest",
                    field = key,
                    error = %err,
                    "dropping requirement field that cannot be flattened"
                );
                Requirements::Absent
            })
        };

        Ok(Self {
            install_requires: field("install_requires"),
            setup_requires: field("setup_requires"),
            extras_require: field("extras_require"),
            tests_require: field("tests_require"),
            python_requires: field("python_requires"),
        })
    }
}

/// Metadata read from a binary wheel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WheelRecord {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_dist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides_extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_external: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveErrorKind {
    BadZip,
    MissingMetadata,
    InvalidMetadata,
}

/// Terminal per-file outcome recorded in the wheel error store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelError {
    NotFound,
    RetriesExhausted { status: u16 },
    BadArchive { kind: ArchiveErrorKind },
}
