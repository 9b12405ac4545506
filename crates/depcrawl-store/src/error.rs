use std::path::PathBuf;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced while loading or persisting store shards.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("json error: {message}")]
    Json { message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: sanitize_json_error_message(&err.to_string()),
        }
    }
}

impl StoreError {
    pub(crate) fn decode(path: impl Into<PathBuf>, err: &serde_json::Error) -> Self {
        Self::Decode {
            path: path.into(),
            message: sanitize_json_error_message(&err.to_string()),
        }
    }
}

/// Redact double-quoted substrings from a serde_json message.
///
/// Store payloads carry arbitrary upstream text (error logs, requirement strings); error
/// messages keep the structure and position without echoing them.
fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..=start]);
        rest = &rest[start + 1..];

        let bytes = rest.as_bytes();
        let end = bytes.iter().enumerate().position(|(idx, &b)| {
            b == b'"' && bytes[..idx].iter().rev().take_while(|&&c| c == b'\\').count() % 2 == 0
        });
        match end {
            Some(end) => {
                out.push_str("<redacted>\"");
                rest = &rest[end + 1..];
            }
            None => {
                out.push_str("<redacted>");
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
