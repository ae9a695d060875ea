//! Base trait abstraction for speech-synthesis engines.
//!
//! Every engine (ElevenLabs, Deepgram, Google) implements [`SynthesisEngine`],
//! a uniform capability interface: synthesize text to audio, expose a voice
//! catalog, and resolve a default voice for a language. The orchestrator only
//! ever talks to this trait; provider wire formats stay inside the adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Engine;
use super::client::UsageSnapshot;

/// Errors produced by synthesis engines.
///
/// The split between fatal and transient variants drives retry behavior:
/// transient errors are retried with backoff inside the adapter, fatal ones
/// fail fast (retrying an auth or quota error cannot help). Either way the
/// orchestrator may still try the next engine in the fallback chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("engine has no credentials configured")]
    NotConfigured,

    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
}

impl EngineError {
    /// Whether retrying the same request on the same engine cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Auth(_)
                | EngineError::Forbidden(_)
                | EngineError::BadRequest(_)
                | EngineError::QuotaExceeded(_)
                | EngineError::RateLimited(_)
                | EngineError::NotConfigured
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Map an HTTP status to the engine error taxonomy.
///
/// 400/401/402/403/429 are fatal for this request; everything else
/// (5xx, unexpected statuses) is treated as a transient provider error.
pub fn classify_status(status: reqwest::StatusCode, body: String) -> EngineError {
    match status.as_u16() {
        400 => EngineError::BadRequest(body),
        401 => EngineError::Auth(body),
        402 => EngineError::QuotaExceeded(body),
        403 => EngineError::Forbidden(body),
        429 => EngineError::RateLimited(body),
        status => EngineError::Provider { status, body },
    }
}

/// A single entry in an engine's voice catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    /// Provider voice ID or canonical name
    pub id: String,
    /// Display name of the voice
    pub name: String,
    /// Primary language of the voice (ISO 639-1 where known)
    pub language: String,
    /// Gender of the voice ("Female", "Male", "Unknown")
    pub gender: String,
    /// Optional delivery style ("narration", "conversational", ...)
    pub style: Option<String>,
}

impl Voice {
    pub fn new(id: &str, name: &str, language: &str, gender: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            language: language.to_string(),
            gender: gender.to_string(),
            style: None,
        }
    }
}

/// A single synthesis job handed to an engine adapter.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Text to synthesize (already filtered and truncated upstream)
    pub text: String,
    /// Voice ID, valid for this engine's catalog
    pub voice_id: String,
    /// Speaking rate (0.25 to 4.0, 1.0 is normal)
    pub speed: f32,
}

/// Latency/reliability preset that drives each adapter's timeout and
/// retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    /// Lowest latency, single retry, short timeout
    Fast,
    /// Default trade-off
    #[default]
    Balanced,
    /// Highest reliability, generous timeout
    Quality,
}

/// Concrete timeout/retry numbers behind a [`PerformanceMode`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Per-attempt request timeout
    pub request_timeout: Duration,
    /// Retries after the initial attempt (transient errors only)
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn for_mode(mode: PerformanceMode) -> Self {
        match mode {
            PerformanceMode::Fast => Self {
                request_timeout: Duration::from_secs(3),
                max_retries: 1,
                base_backoff: Duration::from_millis(150),
            },
            PerformanceMode::Balanced => Self {
                request_timeout: Duration::from_secs(8),
                max_retries: 2,
                base_backoff: Duration::from_millis(400),
            },
            PerformanceMode::Quality => Self {
                request_timeout: Duration::from_secs(20),
                max_retries: 3,
                base_backoff: Duration::from_millis(800),
            },
        }
    }

    /// Backoff delay before retry attempt `n` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Base trait for speech-synthesis engines.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Which member of the closed engine set this adapter implements.
    fn engine(&self) -> Engine;

    /// Whether credentials are configured. Unconfigured engines are skipped
    /// during availability substitution and fallback walks.
    fn is_configured(&self) -> bool;

    /// Synthesize text to audio bytes.
    ///
    /// Retries transient failures with bounded exponential backoff per the
    /// adapter's [`RetryPolicy`]; fails fast on fatal errors.
    async fn synthesize(&self, request: &SynthesisRequest) -> EngineResult<Bytes>;

    /// The engine's voice catalog.
    ///
    /// Dynamic catalogs are TTL-cached with single-flight fetch coalescing.
    /// On fetch failure a stale catalog is preferred over nothing, then the
    /// bundled static list. Never returns an empty catalog.
    async fn voices(&self) -> Arc<Vec<Voice>>;

    /// The bundled static catalog. Pure; no network.
    fn bundled_voices(&self) -> &[Voice];

    /// The voice this engine maps to `language`, if it has one.
    ///
    /// Pure lookup against the bundled static catalog; no network.
    fn voice_for_language(&self, language: &str) -> Option<String>;

    /// Like [`Self::voice_for_language`] but always resolves, falling back
    /// to the engine's hardcoded default voice.
    fn default_voice_for_language(&self, language: &str) -> String;

    /// Per-adapter usage accounting for observability.
    fn usage(&self) -> UsageSnapshot;
}

/// Boxed engine trait object.
pub type BoxedEngine = Arc<dyn SynthesisEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_statuses_fail_fast() {
        for status in [400u16, 401, 402, 403, 429] {
            let err = classify_status(
                reqwest::StatusCode::from_u16(status).unwrap(),
                "nope".to_string(),
            );
            assert!(err.is_fatal(), "status {status} should be fatal");
        }
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [500u16, 502, 503, 504] {
            let err = classify_status(
                reqwest::StatusCode::from_u16(status).unwrap(),
                "boom".to_string(),
            );
            assert!(!err.is_fatal(), "status {status} should be retryable");
        }
    }

    #[test]
    fn retry_policy_presets_scale_with_mode() {
        let fast = RetryPolicy::for_mode(PerformanceMode::Fast);
        let balanced = RetryPolicy::for_mode(PerformanceMode::Balanced);
        let quality = RetryPolicy::for_mode(PerformanceMode::Quality);

        assert!(fast.request_timeout < balanced.request_timeout);
        assert!(balanced.request_timeout < quality.request_timeout);
        assert!(fast.max_retries < quality.max_retries);
    }

    #[test]
    fn backoff_is_exponential() {
        let policy = RetryPolicy::for_mode(PerformanceMode::Balanced);
        assert_eq!(policy.backoff_for(1), policy.backoff_for(0) * 2);
        assert_eq!(policy.backoff_for(2), policy.backoff_for(0) * 4);
    }
}
