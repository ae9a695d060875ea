//! Shared HTTP synthesis client with retry, backoff, and usage accounting.
//!
//! All adapters route their synthesis calls through [`SynthesisClient`] so the
//! retry loop and the usage counters live in exactly one place. The retry loop
//! is bounded and sequential: transient errors back off exponentially up to the
//! policy's retry budget; fatal errors (auth, quota, malformed request, provider
//! rate limit) abort immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::base::{EngineError, EngineResult, RetryPolicy, classify_status};

/// Per-adapter usage counters.
#[derive(Debug, Default)]
pub struct UsageStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    characters: AtomicU64,
}

/// Point-in-time view of an adapter's usage counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub characters: u64,
    /// Rough spend estimate derived from synthesized characters
    pub cost_estimate_usd: f64,
}

impl UsageStats {
    pub fn snapshot(&self, cost_per_million_chars: f64) -> UsageSnapshot {
        let characters = self.characters.load(Ordering::Relaxed);
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            characters,
            cost_estimate_usd: characters as f64 / 1_000_000.0 * cost_per_million_chars,
        }
    }
}

/// HTTP client wrapper shared by all engine adapters.
pub struct SynthesisClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    stats: Arc<UsageStats>,
}

impl SynthesisClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            policy,
            stats: Arc::new(UsageStats::default()),
        }
    }

    /// Raw HTTP client for non-synthesis calls (catalog fetches).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &UsageStats {
        &self.stats
    }

    /// Execute one synthesis request with the bounded retry loop.
    ///
    /// `build` is called once per attempt to produce a fresh request.
    /// `characters` is the logical text length, recorded once per call
    /// regardless of how many HTTP attempts it takes.
    pub async fn execute<F>(&self, engine: &str, characters: usize, build: F) -> EngineResult<Bytes>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats
            .characters
            .fetch_add(characters as u64, Ordering::Relaxed);

        let mut attempt: u32 = 0;
        loop {
            let request = build(&self.http).timeout(self.policy.request_timeout);
            let error = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.bytes().await {
                        Ok(bytes) => {
                            self.stats.successes.fetch_add(1, Ordering::Relaxed);
                            return Ok(bytes);
                        }
                        Err(e) => EngineError::Network(format!("failed to read body: {e}")),
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<unreadable body>".to_string());
                    classify_status(status, body)
                }
                Err(e) if e.is_timeout() => EngineError::Timeout(self.policy.request_timeout),
                Err(e) => EngineError::Network(e.to_string()),
            };

            if error.is_fatal() {
                warn!(engine, %error, "synthesis failed fast");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                warn!(engine, %error, attempts = attempt + 1, "synthesis retries exhausted");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }

            let backoff = self.policy.backoff_for(attempt);
            debug!(engine, %error, ?backoff, attempt, "retrying synthesis");
            sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::base::PerformanceMode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client() -> SynthesisClient {
        SynthesisClient::new(RetryPolicy {
            request_timeout: std::time::Duration::from_secs(2),
            max_retries: 2,
            base_backoff: std::time::Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn success_returns_bytes_and_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/speak"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
            .mount(&server)
            .await;

        let client = fast_client();
        let url = format!("{}/speak", server.uri());
        let bytes = client
            .execute("test", 11, |http| http.post(&url))
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"audio");
        let snap = client.stats().snapshot(100.0);
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.characters, 11);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let client = fast_client();
        let url = server.uri();
        let bytes = client
            .execute("test", 2, |http| http.post(&url))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client();
        let url = server.uri();
        let err = client
            .execute("test", 4, |http| http.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(client.stats().snapshot(0.0).failures, 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3) // initial + 2 retries
            .mount(&server)
            .await;

        let client = fast_client();
        let url = server.uri();
        let err = client
            .execute("test", 1, |http| http.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider { status: 500, .. }));
    }

    #[test]
    fn cost_estimate_scales_with_characters() {
        let client = SynthesisClient::new(RetryPolicy::for_mode(PerformanceMode::Fast));
        client
            .stats()
            .characters
            .store(2_000_000, Ordering::Relaxed);
        let snap = client.stats().snapshot(15.0);
        assert!((snap.cost_estimate_usd - 30.0).abs() < f64::EPSILON);
    }
}
