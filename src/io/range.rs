use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Progress callback: `(bytes received so far, bytes requested)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A contiguous byte range `[start, start + len)`; the unit of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    pub start: u64,
    pub len: u64,
}

impl ByteWindow {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value for the `Range` header. Only meaningful for non-empty windows.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end() - 1)
    }
}

impl fmt::Display for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "bytes={}-(empty)", self.start)
        } else {
            f.write_str(&self.range_header())
        }
    }
}

/// Attempt budget and per-request timeout for range reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            delay: Self::DEFAULT_DELAY,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// One HTTP connection pool. Never repaired: a failed attempt swaps in a
/// freshly built value.
#[derive(Clone)]
struct Connection {
    client: Client,
    generation: u64,
}

impl Connection {
    fn open(timeout: Duration, generation: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connectivity {
                attempts: 0,
                cause: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, generation })
    }

    fn reopen(&self, timeout: Duration) -> Result<Self> {
        Self::open(timeout, self.generation + 1)
    }
}

/// Why a single attempt failed.
enum AttemptError {
    Transport(String),
    Status(StatusCode),
    Short { expected: u64, received: u64 },
    Unsupported(String),
}

impl AttemptError {
    fn into_error(self, attempts: u32) -> Error {
        match self {
            AttemptError::Transport(cause) => Error::Connectivity { attempts, cause },
            AttemptError::Status(status) => Error::Connectivity {
                attempts,
                cause: format!("unexpected HTTP status {status}"),
            },
            AttemptError::Short { expected, received } => Error::DataIntegrity {
                attempts,
                expected,
                received,
            },
            AttemptError::Unsupported(msg) => Error::UnsupportedServer(msg),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(cause) => f.write_str(cause),
            AttemptError::Status(status) => write!(f, "unexpected HTTP status {status}"),
            AttemptError::Short { expected, received } => {
                write!(f, "short read: expected {expected} bytes, received {received}")
            }
            AttemptError::Unsupported(msg) => f.write_str(msg),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        AttemptError::Transport(e.to_string())
    }
}

/// Retrying HTTP range reader for one remote resource.
///
/// Construction sends a HEAD probe to learn the total size and confirm that
/// the server honours `Range: bytes=...`. Each [`fetch`](Self::fetch)
/// returns exactly the bytes of the requested window or fails.
pub struct RangeSource {
    url: String,
    size: u64,
    policy: RetryPolicy,
    connection: Connection,
    progress: Option<ProgressFn>,
}

impl RangeSource {
    /// Probe `url` and build a source for it.
    pub async fn connect(url: impl Into<String>, policy: RetryPolicy) -> Result<Self> {
        let url = url.into();
        let mut connection = Connection::open(policy.timeout, 0)?;
        let mut last = None;

        for attempt in 1..=policy.max_attempts {
            match probe(&connection.client, &url).await {
                Ok(size) => {
                    debug!(%url, size, "remote source supports range requests");
                    return Ok(Self {
                        url,
                        size,
                        policy,
                        connection,
                        progress: None,
                    });
                }
                Err(AttemptError::Unsupported(msg)) => return Err(Error::UnsupportedServer(msg)),
                Err(e) => {
                    warn!(%url, attempt, max = policy.max_attempts, error = %e, "probe failed");
                    last = Some(e);
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.delay).await;
                        connection = connection.reopen(policy.timeout)?;
                    }
                }
            }
        }

        Err(exhausted(last, policy.max_attempts))
    }

    /// Attach a progress callback fired after every received block.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// An independent source for the same resource with its own connection.
    ///
    /// No probe is sent. The fork carries no progress callback; callers that
    /// fan out over forks report progress at their own level.
    pub fn fork(&self) -> Result<Self> {
        Ok(Self {
            url: self.url.clone(),
            size: self.size,
            policy: self.policy.clone(),
            connection: Connection::open(self.policy.timeout, 0)?,
            progress: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch exactly `window`, retrying under the source's [`RetryPolicy`].
    pub async fn fetch(&mut self, window: ByteWindow) -> Result<Vec<u8>> {
        if window.end() > self.size {
            return Err(Error::Range {
                target: window.end() as i128,
                size: self.size,
            });
        }
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let mut last = None;
        for attempt in 1..=self.policy.max_attempts {
            match self.fetch_once(window).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(
                        url = %self.url,
                        %window,
                        attempt,
                        max = self.policy.max_attempts,
                        error = %e,
                        "range request failed"
                    );
                    last = Some(e);
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay).await;
                        self.connection = self.connection.reopen(self.policy.timeout)?;
                    }
                }
            }
        }

        Err(exhausted(last, self.policy.max_attempts))
    }

    async fn fetch_once(&self, window: ByteWindow) -> Result<Vec<u8>, AttemptError> {
        debug!(
            %window,
            connection = self.connection.generation,
            "sending range request"
        );
        let mut resp = self
            .connection
            .client
            .get(&self.url)
            .header(header::RANGE, window.range_header())
            .send()
            .await?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(AttemptError::Status(resp.status()));
        }

        let expected = window.len;
        let mut data = Vec::with_capacity(expected as usize);
        while let Some(block) = resp.chunk().await? {
            data.extend_from_slice(&block);
            let received = data.len() as u64;
            if received > expected {
                return Err(AttemptError::Short { expected, received });
            }
            if let Some(progress) = &self.progress {
                progress(received, expected);
            }
            trace!(%window, received, "received block");
        }

        let received = data.len() as u64;
        if received != expected {
            return Err(AttemptError::Short { expected, received });
        }
        Ok(data)
    }
}

async fn probe(client: &Client, url: &str) -> Result<u64, AttemptError> {
    let resp = client.head(url).send().await?;

    if !resp.status().is_success() {
        return Err(AttemptError::Status(resp.status()));
    }

    let accept_ranges = resp
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    if !accept_ranges.contains("bytes") {
        return Err(AttemptError::Unsupported(
            "remote server does not support Range requests".to_string(),
        ));
    }

    // HEAD bodies are empty, so the size has to come from the header itself.
    let size: u64 = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if size == 0 {
        return Err(AttemptError::Unsupported(
            "remote server did not report a usable Content-Length".to_string(),
        ));
    }

    Ok(size)
}

fn exhausted(last: Option<AttemptError>, attempts: u32) -> Error {
    match last {
        Some(e) => e.into_error(attempts),
        None => Error::Connectivity {
            attempts,
            cause: "no attempts were made".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_header() {
        let w = ByteWindow::new(0, 1024);
        assert_eq!(w.range_header(), "bytes=0-1023");
        assert_eq!(w.end(), 1024);
        assert_eq!(ByteWindow::new(10, 1).to_string(), "bytes=10-10");
        assert_eq!(ByteWindow::new(7, 0).to_string(), "bytes=7-(empty)");
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_exhausted_reports_last_kind() {
        let err = exhausted(
            Some(AttemptError::Short {
                expected: 8,
                received: 3,
            }),
            3,
        );
        assert!(matches!(
            err,
            Error::DataIntegrity {
                attempts: 3,
                expected: 8,
                received: 3
            }
        ));

        let err = exhausted(Some(AttemptError::Status(StatusCode::BAD_GATEWAY)), 3);
        match err {
            Error::Connectivity { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert!(cause.contains("502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
