//! Retrieval of wheel artifacts.

use std::io::Read;
use std::time::Duration;

/// Upper bound on a single downloaded artifact.
const MAX_ARTIFACT_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("artifact not found")]
    NotFound,
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("artifact exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read response body: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Statuses that mean "try again later" rather than "this request is wrong".
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status(502 | 503))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }
}

pub trait ArtifactFetcher: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`ArtifactFetcher`] over HTTPS.
#[derive(Debug)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout(timeout)
            .build();
        Self { agent }
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(404, _) => FetchError::NotFound,
            ureq::Error::Status(code, _) => FetchError::Status(code),
            ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
        })?;

        read_body(response.into_reader(), MAX_ARTIFACT_BYTES)
    }
}

/// Read a whole response body, refusing bodies longer than `limit`.
fn read_body(reader: impl Read, limit: u64) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(FetchError::TooLarge { limit });
    }
    Ok(body)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// The last error is returned when every attempt was retryable.
    pub fn run<T>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let attempts = self.max_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt(n) {
                Err(err) if err.is_retryable() && n < attempts => {
                    tracing::warn!(
                        target: "depcrawl.wheel",
                        attempt = n,
                        error = %err,
                        backoff_secs = self.backoff.as_secs_f64(),
                        "retrying fetch"
                    );
                    std::thread::sleep(self.backoff);
                    n += 1;
                }
                result => return result,
            }
        }
    }
}
