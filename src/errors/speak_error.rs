//! Speak-pipeline error taxonomy.
//!
//! Every rejection carries a stable machine-readable `reason()` code next to
//! its human-readable message. Chat-originated rejections are logged and
//! dropped by the caller; manual requests surface the structured error.

use thiserror::Error;

use crate::core::queue::EnqueueRejection;
use crate::core::store::StoreError;
use crate::core::tts::{Engine, EngineError};

/// One failed synthesis attempt inside a fallback walk.
#[derive(Debug, Clone)]
pub struct EngineAttempt {
    pub engine: Engine,
    pub voice: String,
    pub error: EngineError,
}

#[derive(Debug, Error)]
pub enum SpeakError {
    /// Global kill-switch is off
    #[error("TTS is disabled")]
    TtsDisabled,

    /// Insufficient grant; admin-recoverable, never retried
    #[error("permission denied: {reason}")]
    PermissionDenied {
        reason: &'static str,
        required_level: Option<u8>,
        actual_level: Option<u8>,
    },

    /// Strict-mode profanity match; never retried
    #[error("message rejected by content filter ({} matches)", .matches.len())]
    ProfanityRejected { matches: Vec<String> },

    /// Nothing left to say after filtering
    #[error("text is empty after filtering")]
    EmptyText,

    /// Transient queue rejection; the caller may retry
    #[error(transparent)]
    Backpressure(#[from] EnqueueRejection),

    /// All attempted engines failed
    #[error("synthesis failed on {} engine(s)", .attempts.len())]
    SynthesisFailed { attempts: Vec<EngineAttempt> },

    /// No engine has credentials configured at all
    #[error("no synthesis engines are available")]
    NoEnginesAvailable,

    /// Unexpected internal failure, surfaced generically
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpeakError {
    /// Stable reason code for logs, events, and API consumers.
    pub fn reason(&self) -> &'static str {
        match self {
            SpeakError::TtsDisabled => "tts_disabled",
            SpeakError::PermissionDenied { .. } => "permission_denied",
            SpeakError::ProfanityRejected { .. } => "profanity_detected",
            SpeakError::EmptyText => "empty_text",
            SpeakError::Backpressure(rejection) => rejection.reason(),
            SpeakError::SynthesisFailed { .. } => "synthesis_failed",
            SpeakError::NoEnginesAvailable => "no_engines_available",
            SpeakError::Internal(_) => "synthesis_failed",
        }
    }

    /// Whether the caller may usefully retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SpeakError::Backpressure(_) | SpeakError::SynthesisFailed { .. }
        )
    }
}

impl From<StoreError> for SpeakError {
    fn from(e: StoreError) -> Self {
        // Store failures are unexpected infrastructure errors; they surface
        // generically while the full diagnostics go to the log.
        SpeakError::Internal(format!("record store failure: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(SpeakError::TtsDisabled.reason(), "tts_disabled");
        assert_eq!(SpeakError::EmptyText.reason(), "empty_text");
        assert_eq!(
            SpeakError::Backpressure(EnqueueRejection::DuplicateContent).reason(),
            "duplicate_content"
        );
        assert_eq!(
            SpeakError::Backpressure(EnqueueRejection::RateLimited { retry_after_secs: 3 })
                .reason(),
            "rate_limit"
        );
        assert_eq!(
            SpeakError::Internal("boom".to_string()).reason(),
            "synthesis_failed"
        );
    }

    #[test]
    fn transience_classification() {
        assert!(SpeakError::Backpressure(EnqueueRejection::DuplicateContent).is_transient());
        assert!(!SpeakError::TtsDisabled.is_transient());
        assert!(!SpeakError::PermissionDenied {
            reason: "blacklisted",
            required_level: None,
            actual_level: None,
        }
        .is_transient());
    }
}
