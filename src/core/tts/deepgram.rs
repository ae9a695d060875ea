//! Deepgram synthesis adapter using the Aura HTTP speak API.

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

pub const DEEPGRAM_API_URL: &str = "https://api.deepgram.com";

/// Hardcoded last-resort voice.
const DEFAULT_VOICE: &str = "aura-asteria-en";

/// The Aura voice family is English-only; the static catalog mirrors that.
static STATIC_VOICES: Lazy<Vec<Voice>> = Lazy::new(|| {
    vec![
        Voice::new("aura-asteria-en", "Asteria", "en", "Female"),
        Voice::new("aura-luna-en", "Luna", "en", "Female"),
        Voice::new("aura-stella-en", "Stella", "en", "Female"),
        Voice::new("aura-athena-en", "Athena", "en", "Female"),
        Voice::new("aura-hera-en", "Hera", "en", "Female"),
        Voice::new("aura-orion-en", "Orion", "en", "Male"),
        Voice::new("aura-arcas-en", "Arcas", "en", "Male"),
        Voice::new("aura-perseus-en", "Perseus", "en", "Male"),
        Voice::new("aura-angus-en", "Angus", "en", "Male"),
        Voice::new("aura-orpheus-en", "Orpheus", "en", "Male"),
        Voice::new("aura-helios-en", "Helios", "en", "Male"),
        Voice::new("aura-zeus-en", "Zeus", "en", "Male"),
    ]
});

const COST_PER_MILLION_CHARS: f64 = 15.0;

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    tts: Option<Vec<TtsModel>>,
}

#[derive(Debug, Deserialize)]
struct TtsModel {
    name: String,
    canonical_name: String,
    languages: Vec<String>,
    metadata: Option<ModelMetadata>,
}

#[derive(Debug, Deserialize)]
struct ModelMetadata {
    tags: Option<Vec<String>>,
}

pub struct DeepgramEngine {
    api_key: Option<String>,
    base_url: String,
    client: SynthesisClient,
    catalog: CatalogCache,
}

impl DeepgramEngine {
    pub fn new(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            api_key,
            base_url: DEEPGRAM_API_URL.to_string(),
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
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .http()
            .get(&url)
            .header("Authorization", format!("Token {api_key}"))
            .timeout(self.client.policy().request_timeout)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::base::classify_status(status, body));
        }

        let parsed: ModelsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidAudio(format!("model listing parse error: {e}")))?;

        Ok(parsed
            .tts
            .unwrap_or_default()
            .into_iter()
            .map(|model| {
                let gender = model
                    .metadata
                    .as_ref()
                    .and_then(|m| m.tags.as_ref())
                    .and_then(|tags| {
                        tags.iter().find_map(|tag| {
                            let tag = tag.to_lowercase();
                            if tag.contains("feminine") {
                                Some("Female".to_string())
                            } else if tag.contains("masculine") {
                                Some("Male".to_string())
                            } else {
                                None
                            }
                        })
                    })
                    .unwrap_or_else(|| "Unknown".to_string());
                let language = model
                    .languages
                    .first()
                    .map(|l| l.split('-').next().unwrap_or(l).to_string())
                    .unwrap_or_else(|| "en".to_string());
                Voice {
                    id: model.canonical_name,
                    name: model.name,
                    language,
                    gender,
                    style: None,
                }
            })
            .collect())
    }
}

#[async_trait]
impl SynthesisEngine for DeepgramEngine {
    fn engine(&self) -> Engine {
        Engine::Deepgram
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> EngineResult<Bytes> {
        let api_key = self.api_key.as_deref().ok_or(EngineError::NotConfigured)?;

        // The speak API has no rate parameter; speed is applied at playback.
        let url = format!(
            "{}/v1/speak?model={}&encoding=mp3",
            self.base_url, request.voice_id
        );
        let body = json!({ "text": request.text });

        self.client
            .execute("deepgram", request.text.chars().count(), |http| {
                http.post(&url)
                    .header("Authorization", format!("Token {api_key}"))
                    .header("Content-Type", "application/json")
                    .json(&body)
            })
            .await
    }

    async fn voices(&self) -> Arc<Vec<Voice>> {
        match self.api_key.as_deref() {
            Some(api_key) if !api_key.is_empty() => {
                self.catalog
                    .get_or_fetch("deepgram", || self.fetch_voices(api_key))
                    .await
            }
            _ => self.catalog.static_list(),
        }
    }

    fn bundled_voices(&self) -> &[Voice] {
        &STATIC_VOICES
    }

    fn voice_for_language(&self, language: &str) -> Option<String> {
        (language == "en").then(|| DEFAULT_VOICE.to_string())
    }

    fn default_voice_for_language(&self, language: &str) -> String {
        self.voice_for_language(language)
            .unwrap_or_else(|| DEFAULT_VOICE.to_string())
    }

    fn usage(&self) -> UsageSnapshot {
        self.client.stats().snapshot(COST_PER_MILLION_CHARS)
    }
}
