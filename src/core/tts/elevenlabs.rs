//! ElevenLabs synthesis adapter using the HTTP REST API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
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

pub const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io";

/// Multilingual model used for all synthesis requests.
const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

/// Hardcoded last-resort voice (Rachel).
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// Bundled catalog used when the live voice listing is unreachable.
static STATIC_VOICES: Lazy<Vec<Voice>> = Lazy::new(|| {
    vec![
        Voice::new("21m00Tcm4TlvDq8ikWAM", "Rachel", "en", "Female"),
        Voice::new("AZnzlk1XvdvUeBnXmlld", "Domi", "de", "Female"),
        Voice::new("EXAVITQu4vr4xnSDxMaL", "Sarah", "es", "Female"),
        Voice::new("ErXwobaYiN019PkySvjV", "Antoni", "fr", "Male"),
        Voice::new("MF3mGyEYCl7XYWbV9V6O", "Elli", "it", "Female"),
        Voice::new("TxGEqnHWrfWFTfGW9XjX", "Josh", "en", "Male"),
        Voice::new("VR6AewLTigWG4xSOukaG", "Arnold", "en", "Male"),
        Voice::new("pNInz6obpgDQGcFmaJgB", "Adam", "pl", "Male"),
        Voice::new("yoZ06aMxZJJ28mfd3POQ", "Sam", "pt", "Male"),
    ]
});

/// Per-language default voices. The synthesis model is multilingual, so
/// these map languages onto voices that read them naturally.
static LANGUAGE_DEFAULTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "21m00Tcm4TlvDq8ikWAM"),
        ("de", "AZnzlk1XvdvUeBnXmlld"),
        ("es", "EXAVITQu4vr4xnSDxMaL"),
        ("fr", "ErXwobaYiN019PkySvjV"),
        ("it", "MF3mGyEYCl7XYWbV9V6O"),
        ("pl", "pNInz6obpgDQGcFmaJgB"),
        ("pt", "yoZ06aMxZJJ28mfd3POQ"),
    ])
});

/// Cost estimate basis: USD per million synthesized characters.
const COST_PER_MILLION_CHARS: f64 = 180.0;

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<ApiVoice>,
}

#[derive(Debug, Deserialize)]
struct ApiVoice {
    voice_id: String,
    name: String,
    labels: Option<HashMap<String, String>>,
    verified_languages: Option<Vec<ApiLanguage>>,
}

#[derive(Debug, Deserialize)]
struct ApiLanguage {
    language: String,
}

pub struct ElevenLabsEngine {
    api_key: Option<String>,
    base_url: String,
    model_id: String,
    client: SynthesisClient,
    catalog: CatalogCache,
}

impl ElevenLabsEngine {
    pub fn new(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            api_key,
            base_url: ELEVENLABS_API_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            client: SynthesisClient::new(policy),
            catalog: CatalogCache::new(CATALOG_TTL, STATIC_VOICES.clone()),
        }
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_voices(&self, api_key: &str) -> EngineResult<Vec<Voice>> {
        let url = format!("{}/v2/voices", self.base_url);
        let response = self
            .client
            .http()
            .get(&url)
            .header("xi-api-key", api_key)
            .timeout(self.client.policy().request_timeout)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::base::classify_status(status, body));
        }

        let parsed: VoicesResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidAudio(format!("voice listing parse error: {e}")))?;

        Ok(parsed
            .voices
            .into_iter()
            .map(|voice| {
                let language = voice
                    .verified_languages
                    .as_ref()
                    .and_then(|langs| langs.first())
                    .map(|l| l.language.clone())
                    .unwrap_or_else(|| "en".to_string());
                let gender = voice
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get("gender"))
                    .map(|g| {
                        let g = g.to_lowercase();
                        if g.contains("female") {
                            "Female".to_string()
                        } else if g.contains("male") {
                            "Male".to_string()
                        } else {
                            "Unknown".to_string()
                        }
                    })
                    .unwrap_or_else(|| "Unknown".to_string());
                let style = voice
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get("use_case").cloned());
                Voice {
                    id: voice.voice_id,
                    name: voice.name,
                    language,
                    gender,
                    style,
                }
            })
            .collect())
    }
}

#[async_trait]
impl SynthesisEngine for ElevenLabsEngine {
    fn engine(&self) -> Engine {
        Engine::ElevenLabs
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> EngineResult<Bytes> {
        let api_key = self.api_key.as_deref().ok_or(EngineError::NotConfigured)?;

        let url = format!(
            "{}/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.base_url, request.voice_id
        );
        let body = json!({
            "text": request.text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.8,
                "speed": request.speed,
            },
        });

        self.client
            .execute("elevenlabs", request.text.chars().count(), |http| {
                http.post(&url)
                    .header("xi-api-key", api_key)
                    .header("Content-Type", "application/json")
                    .header("Accept", "audio/mpeg")
                    .json(&body)
            })
            .await
    }

    async fn voices(&self) -> Arc<Vec<Voice>> {
        match self.api_key.as_deref() {
            Some(api_key) if !api_key.is_empty() => {
                self.catalog
                    .get_or_fetch("elevenlabs", || self.fetch_voices(api_key))
                    .await
            }
            _ => self.catalog.static_list(),
        }
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
