//! HTTP downloads with a stall timeout and bounded retry.

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::{ProvisionError, Result};

/// User agent sent with every request (GitHub rejects requests without one)
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Downloads URLs to files
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Fetcher {
    /// Create a fetcher whose attempts fail once the connection sits idle for
    /// `timeout`. A slow body that keeps delivering bytes is never cut off.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            retry,
            timeout,
        })
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// An empty body counts as a failure. The destination never holds a
    /// partial file after an error.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.retry.backoff(attempt - 1);
                log::info!("retrying {} in {:?} (attempt {}/{})", url, delay, attempt, attempts);
                tokio::time::sleep(delay).await;
            }
            match self.fetch_once(url, dest).await {
                Ok(bytes) => {
                    log::info!("fetched {} ({} bytes) to {}", url, bytes, dest.display());
                    return Ok(bytes);
                }
                Err(e) => {
                    log::warn!("fetch attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    let _ = tokio::fs::remove_file(dest).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProvisionError::fetch(url, "no attempts made")))
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::fetch(url, format!("HTTP {}", status)));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(url, e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(ProvisionError::fetch(url, "empty response body"));
        }
        Ok(written)
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> ProvisionError {
        if err.is_timeout() {
            ProvisionError::fetch(url, format!("stalled for {:?}", self.timeout))
        } else {
            ProvisionError::fetch(url, err.to_string())
        }
    }
}

/// Verify a file against a hex-encoded SHA-256 digest
pub async fn verify_sha256(path: &Path, expected_hex: &str) -> Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let actual = hex::encode(Sha256::digest(&bytes));
    if actual.eq_ignore_ascii_case(expected_hex.trim()) {
        Ok(())
    } else {
        Err(ProvisionError::action(
            format!("verify {}", path.display()),
            format!("sha256 mismatch: expected {}, got {}", expected_hex, actual),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(10), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_fetch_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pkg.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"debian-binary".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested").join("pkg.deb");
        let fetcher = Fetcher::new(Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/pkg.deb", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"debian-binary");
    }

    #[tokio::test]
    async fn test_fetch_empty_body_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("empty");
        let fetcher = Fetcher::new(Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/empty", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::NetworkFetch { .. }));
        assert!(err.to_string().contains("empty response body"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(Duration::from_secs(5), quick_retry(3)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/flaky", server.uri()), &dir.path().join("flaky"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("slow");
        let fetcher = Fetcher::new(Duration::from_millis(100), RetryPolicy::none()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/slow", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::NetworkFetch { .. }));
        assert!(!dest.exists());
    }

    /// Serve `body` one byte at a time with `gap` between bytes
    async fn trickle_server(body: &'static [u8], gap: Duration) -> String {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for byte in body {
                tokio::time::sleep(gap).await;
                if socket.write_all(&[*byte]).await.is_err() {
                    return;
                }
            }
        });
        format!("http://{}/trickle", addr)
    }

    #[tokio::test]
    async fn test_slow_but_steady_body_is_not_cut_off() {
        let url = trickle_server(b"0123456789", Duration::from_millis(100)).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("trickle");
        let fetcher = Fetcher::new(Duration::from_millis(400), RetryPolicy::none()).unwrap();
        let bytes = fetcher.fetch(&url, &dest).await.unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let url = trickle_server(b"01", Duration::from_secs(3)).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("stalled");
        let fetcher = Fetcher::new(Duration::from_millis(200), RetryPolicy::none()).unwrap();
        let err = fetcher.fetch(&url, &dest).await.unwrap_err();

        assert!(matches!(err, ProvisionError::NetworkFetch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_verify_sha256() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"abc").unwrap();
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

        assert!(verify_sha256(&file, digest).await.is_ok());
        assert!(verify_sha256(&file, &digest.to_uppercase()).await.is_ok());
        assert!(verify_sha256(&file, &"0".repeat(64)).await.is_err());
    }
}
