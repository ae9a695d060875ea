//! Google Cloud Text-to-Speech adapter using the REST `text:synthesize`
//! endpoint with API-key authentication.
//!
//! The response carries base64-encoded audio in `audioContent`, so unlike the
//! other adapters this one post-processes the HTTP body before handing audio
//! to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

use super::base::{
    EngineError, EngineResult, RetryPolicy, SynthesisEngine, SynthesisRequest, Voice,
};
use super::catalog::{CATALOG_TTL, CatalogCache};
use super::client::{SynthesisClient, UsageSnapshot};
use super::Engine;

pub const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com";

/// Hardcoded last-resort voice.
const DEFAULT_VOICE: &str = "en-US-Neural2-C";

/// Curated multilingual catalog; Google does not expose a keyed voice-listing
/// endpoint comparable to the other providers, so this list is authoritative.
static STATIC_VOICES: Lazy<Vec<Voice>> = Lazy::new(|| {
    vec![
        Voice::new("en-US-Neural2-C", "US English C", "en", "Female"),
        Voice::new("en-US-Neural2-D", "US English D", "en", "Male"),
        Voice::new("en-GB-Neural2-A", "British English A", "en", "Female"),
        Voice::new("de-DE-Neural2-B", "German B", "de", "Male"),
        Voice::new("de-DE-Neural2-F", "German F", "de", "Female"),
        Voice::new("es-ES-Neural2-A", "Spanish A", "es", "Female"),
        Voice::new("fr-FR-Neural2-A", "French A", "fr", "Female"),
        Voice::new("it-IT-Neural2-A", "Italian A", "it", "Female"),
        Voice::new("pt-BR-Neural2-A", "Brazilian Portuguese A", "pt", "Female"),
        Voice::new("nl-NL-Wavenet-D", "Dutch D", "nl", "Female"),
        Voice::new("pl-PL-Wavenet-A", "Polish A", "pl", "Female"),
        Voice::new("tr-TR-Wavenet-A", "Turkish A", "tr", "Female"),
        Voice::new("ru-RU-Wavenet-C", "Russian C", "ru", "Female"),
        Voice::new("ja-JP-Neural2-B", "Japanese B", "ja", "Female"),
        Voice::new("ko-KR-Neural2-A", "Korean A", "ko", "Female"),
        Voice::new("hi-IN-Neural2-A", "Hindi A", "hi", "Female"),
        Voice::new("ar-XA-Wavenet-A", "Arabic A", "ar", "Female"),
        Voice::new("cmn-CN-Wavenet-A", "Mandarin A", "zh", "Female"),
    ]
});

static LANGUAGE_DEFAULTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "en-US-Neural2-C"),
        ("de", "de-DE-Neural2-B"),
        ("es", "es-ES-Neural2-A"),
        ("fr", "fr-FR-Neural2-A"),
        ("it", "it-IT-Neural2-A"),
        ("pt", "pt-BR-Neural2-A"),
        ("nl", "nl-NL-Wavenet-D"),
        ("pl", "pl-PL-Wavenet-A"),
        ("tr", "tr-TR-Wavenet-A"),
        ("ru", "ru-RU-Wavenet-C"),
        ("ja", "ja-JP-Neural2-B"),
        ("ko", "ko-KR-Neural2-A"),
        ("hi", "hi-IN-Neural2-A"),
        ("ar", "ar-XA-Wavenet-A"),
        ("zh", "cmn-CN-Wavenet-A"),
    ])
});

const COST_PER_MILLION_CHARS: f64 = 16.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

pub struct GoogleEngine {
    api_key: Option<String>,
    base_url: String,
    client: SynthesisClient,
    catalog: CatalogCache,
}

impl GoogleEngine {
    pub fn new(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            api_key,
            base_url: GOOGLE_TTS_URL.to_string(),
            client: SynthesisClient::new(policy),
            catalog: CatalogCache::new(CATALOG_TTL, STATIC_VOICES.clone()),
        }
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Derive the BCP-47 language code the API expects from a voice ID
    /// ("de-DE-Neural2-B" → "de-DE").
    fn language_code_for_voice(voice_id: &str) -> String {
        let mut parts = voice_id.splitn(3, '-');
        match (parts.next(), parts.next()) {
            (Some(lang), Some(region)) => format!("{lang}-{region}"),
            _ => "en-US".to_string(),
        }
    }
}

#[async_trait]
impl SynthesisEngine for GoogleEngine {
    fn engine(&self) -> Engine {
        Engine::Google
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> EngineResult<Bytes> {
        let api_key = self.api_key.as_deref().ok_or(EngineError::NotConfigured)?;

        let url = format!("{}/v1/text:synthesize?key={}", self.base_url, api_key);
        let body = json!({
            "input": { "text": request.text },
            "voice": {
                "languageCode": Self::language_code_for_voice(&request.voice_id),
                "name": request.voice_id,
            },
            "audioConfig": {
                "audioEncoding": "MP3",
                "speakingRate": request.speed,
            },
        });

        let raw = self
            .client
            .execute("google", request.text.chars().count(), |http| {
                http.post(&url)
                    .header("Content-Type", "application/json")
                    .json(&body)
            })
            .await?;

        let parsed: SynthesizeResponse = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::InvalidAudio(format!("synthesize response parse: {e}")))?;
        let audio = BASE64
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| EngineError::InvalidAudio(format!("audioContent decode: {e}")))?;
        Ok(Bytes::from(audio))
    }

    async fn voices(&self) -> Arc<Vec<Voice>> {
        self.catalog.static_list()
    }

    fn bundled_voices(&self) -> &[Voice] {
        &STATIC_VOICES
    }

    fn voice_for_language(&self, language: &str) -> Option<String> {
        LANGUAGE_DEFAULTS.get(language).map(|v| v.to_string())
    }

    fn default_voice_for_language(&self, language: &str) -> String {
        self.voice_for_language(language)
            .unwrap_or_else(|| DEFAULT_VOICE.to_string())
    }

    fn usage(&self) -> UsageSnapshot {
        self.client.stats().snapshot(COST_PER_MILLION_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::base::PerformanceMode;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(key: Option<&str>) -> GoogleEngine {
        GoogleEngine::new(
            key.map(|k| k.to_string()),
            RetryPolicy::for_mode(PerformanceMode::Fast),
        )
    }

    #[test]
    fn language_code_derivation() {
        assert_eq!(
            GoogleEngine::language_code_for_voice("de-DE-Neural2-B"),
            "de-DE"
        );
        assert_eq!(
            GoogleEngine::language_code_for_voice("cmn-CN-Wavenet-A"),
            "cmn-CN"
        );
        assert_eq!(GoogleEngine::language_code_for_voice("bogus"), "en-US");
    }

    #[tokio::test]
    async fn synthesize_decodes_base64_audio() {
        let server = MockServer::start().await;
        let audio_b64 = BASE64.encode(b"mp3-bytes");
        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .and(body_partial_json(json!({
                "voice": { "languageCode": "ja-JP", "name": "ja-JP-Neural2-B" }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "audioContent": audio_b64 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(Some("g-key")).with_base_url(server.uri());
        let audio = engine
            .synthesize(&SynthesisRequest {
                text: "こんにちは".to_string(),
                voice_id: "ja-JP-Neural2-B".to_string(),
                speed: 1.0,
            })
            .await
            .unwrap();
        assert_eq!(&audio[..], b"mp3-bytes");
    }

    #[tokio::test]
    async fn garbage_audio_content_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "audioContent": "!!not-base64!!" })),
            )
            .mount(&server)
            .await;

        let engine = engine(Some("g-key")).with_base_url(server.uri());
        let err = engine
            .synthesize(&SynthesisRequest {
                text: "hi".to_string(),
                voice_id: DEFAULT_VOICE.to_string(),
                speed: 1.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAudio(_)));
    }

    #[test]
    fn broad_language_coverage() {
        let engine = engine(None);
        for lang in ["en", "de", "es", "fr", "ja", "ko", "ru", "ar", "zh"] {
            assert!(engine.voice_for_language(lang).is_some(), "missing {lang}");
        }
    }
}
