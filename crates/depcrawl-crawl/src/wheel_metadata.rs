//! Reading dependency metadata out of wheel archives.

use std::io::{Cursor, Read};

use depcrawl_core::{ArchiveErrorKind, WheelRecord};
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a valid zip archive: {0}")]
    BadZip(String),
    #[error("archive has no .dist-info/METADATA member")]
    MissingMetadata,
    #[error("malformed METADATA: {0}")]
    InvalidMetadata(String),
}

impl ArchiveError {
    pub fn kind(&self) -> ArchiveErrorKind {
        match self {
            Self::BadZip(_) => ArchiveErrorKind::BadZip,
            Self::MissingMetadata => ArchiveErrorKind::MissingMetadata,
            Self::InvalidMetadata(_) => ArchiveErrorKind::InvalidMetadata,
        }
    }
}

pub trait MetadataExtractor: Sync {
    fn extract(&self, archive: &[u8]) -> Result<WheelRecord, ArchiveError>;
}

/// Reads `<name>.dist-info/METADATA` from a wheel held in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipMetadataExtractor;

impl MetadataExtractor for ZipMetadataExtractor {
    fn extract(&self, archive: &[u8]) -> Result<WheelRecord, ArchiveError> {
        let mut zip = ZipArchive::new(Cursor::new(archive))
            .map_err(|err| ArchiveError::BadZip(err.to_string()))?;

        let mut candidates: Vec<String> = zip
            .file_names()
            .filter(|name| is_metadata_member(name))
            .map(str::to_owned)
            .collect();
        candidates.sort();
        let member = candidates.first().ok_or(ArchiveError::MissingMetadata)?;

        let mut raw = Vec::new();
        zip.by_name(member)
            .and_then(|mut entry| entry.read_to_end(&mut raw).map_err(Into::into))
            .map_err(|err| ArchiveError::BadZip(err.to_string()))?;
        let text = String::from_utf8(raw)
            .map_err(|_| ArchiveError::InvalidMetadata("not valid UTF-8".to_owned()))?;
        parse_metadata(&text)
    }
}

fn is_metadata_member(name: &str) -> bool {
    matches!(
        name.split_once('/'),
        Some((dir, "METADATA")) if dir.ends_with(".dist-info")
    )
}

/// Parse the RFC 822 header block of a METADATA file. The body after the first blank line is
/// the long description and is ignored.
pub fn parse_metadata(text: &str) -> Result<WheelRecord, ArchiveError> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            let Some((_, value)) = headers.last_mut() else {
                return Err(ArchiveError::InvalidMetadata(format!(
                    "line {} continues no header",
                    lineno + 1
                )));
            };
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(ArchiveError::InvalidMetadata(format!(
                "line {} is not a header",
                lineno + 1
            )));
        };
        headers.push((key.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    let all = |field: &str| -> Vec<String> {
        headers
            .iter()
            .filter(|(key, value)| key == field && !value.is_empty())
            .map(|(_, value)| value.clone())
            .collect()
    };
    Ok(WheelRecord {
        requires_dist: all("requires-dist"),
        provides_extras: all("provides-extra"),
        requires_external: all("requires-external"),
        requires_python: all("requires-python").into_iter().next(),
    })
}
