//! Speech-synthesis engine set.
//!
//! Engines form a closed set ([`Engine`]) with a fixed fallback-chain table;
//! dispatch goes through the uniform [`SynthesisEngine`] capability trait.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod base;
pub mod catalog;
pub mod client;
pub mod deepgram;
pub mod elevenlabs;
pub mod google;

pub use base::{
    BoxedEngine, EngineError, EngineResult, PerformanceMode, RetryPolicy, SynthesisEngine,
    SynthesisRequest, Voice, classify_status,
};
pub use catalog::{CATALOG_TTL, CatalogCache};
pub use client::{SynthesisClient, UsageSnapshot, UsageStats};
pub use deepgram::DeepgramEngine;
pub use elevenlabs::ElevenLabsEngine;
pub use google::GoogleEngine;

/// The closed set of synthesis backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    ElevenLabs,
    Deepgram,
    Google,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::ElevenLabs, Engine::Deepgram, Engine::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::ElevenLabs => "elevenlabs",
            Engine::Deepgram => "deepgram",
            Engine::Google => "google",
        }
    }

    /// Ordered list of alternate engines tried when this engine is
    /// unconfigured or fails.
    pub const fn fallback_chain(self) -> &'static [Engine] {
        match self {
            Engine::ElevenLabs => &[Engine::Deepgram, Engine::Google],
            Engine::Deepgram => &[Engine::Google, Engine::ElevenLabs],
            Engine::Google => &[Engine::Deepgram, Engine::ElevenLabs],
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elevenlabs" => Ok(Engine::ElevenLabs),
            "deepgram" => Ok(Engine::Deepgram),
            "google" => Ok(Engine::Google),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

/// All engine adapters, one per [`Engine`] variant.
#[derive(Clone)]
pub struct EngineSet {
    elevenlabs: Arc<dyn SynthesisEngine>,
    deepgram: Arc<dyn SynthesisEngine>,
    google: Arc<dyn SynthesisEngine>,
}

impl EngineSet {
    pub fn new(
        elevenlabs: Arc<dyn SynthesisEngine>,
        deepgram: Arc<dyn SynthesisEngine>,
        google: Arc<dyn SynthesisEngine>,
    ) -> Self {
        Self {
            elevenlabs,
            deepgram,
            google,
        }
    }

    /// Build the production adapters from API keys and a performance mode.
    pub fn from_credentials(
        elevenlabs_api_key: Option<String>,
        deepgram_api_key: Option<String>,
        google_api_key: Option<String>,
        mode: PerformanceMode,
    ) -> Self {
        let policy = RetryPolicy::for_mode(mode);
        Self::new(
            Arc::new(ElevenLabsEngine::new(elevenlabs_api_key, policy)),
            Arc::new(DeepgramEngine::new(deepgram_api_key, policy)),
            Arc::new(GoogleEngine::new(google_api_key, policy)),
        )
    }

    pub fn get(&self, engine: Engine) -> &Arc<dyn SynthesisEngine> {
        match engine {
            Engine::ElevenLabs => &self.elevenlabs,
            Engine::Deepgram => &self.deepgram,
            Engine::Google => &self.google,
        }
    }

    pub fn is_configured(&self, engine: Engine) -> bool {
        self.get(engine).is_configured()
    }

    /// First configured engine in `order`, if any.
    pub fn first_configured(&self, order: impl IntoIterator<Item = Engine>) -> Option<Engine> {
        order.into_iter().find(|e| self.is_configured(*e))
    }

    pub fn any_configured(&self) -> bool {
        Engine::ALL.iter().any(|e| self.is_configured(*e))
    }

    /// The language of a voice according to the engine's bundled catalog.
    ///
    /// Pure lookup; used to preserve a voice assignment's language when
    /// substituting engines without re-running text detection.
    pub fn assigned_voice_language(&self, engine: Engine, voice_id: &str) -> Option<String> {
        self.get(engine)
            .bundled_voices()
            .iter()
            .find(|v| v.id == voice_id)
            .map(|v| v.language.clone())
    }
}
