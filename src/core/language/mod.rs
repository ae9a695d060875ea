//! Statistical language detection with conservative confidence estimation.
//!
//! Classification itself comes from `whatlang`'s trigram model, but the
//! confidence score does not: chat messages are short and noisy, so the
//! classifier's own probability is ignored in favor of an estimate banded by
//! text length, boosted when the text carries the candidate language's native
//! script, and capped hard for single-word inputs. Anything below the
//! configured threshold falls back to the default language while keeping the
//! raw detection around for diagnostics.

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::tts::SynthesisEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Texts shorter than this (in chars) are never trusted
    pub min_length: usize,
    /// Detections below this confidence fall back
    pub confidence_threshold: f32,
    /// System default language (ISO 639-1)
    pub fallback_language: String,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            confidence_threshold: 0.90,
            fallback_language: "en".to_string(),
            cache_capacity: 2048,
            cache_ttl_secs: 300,
        }
    }
}

/// Why a detection resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionReason {
    Detected,
    TextTooShort,
    DetectionUndefined,
    BelowThreshold,
}

impl DetectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionReason::Detected => "detected",
            DetectionReason::TextTooShort => "text_too_short",
            DetectionReason::DetectionUndefined => "detection_undefined",
            DetectionReason::BelowThreshold => "below_threshold",
        }
    }
}

/// Outcome of one detection.
#[derive(Debug, Clone)]
pub struct Detection {
    /// The language the caller should act on
    pub language: String,
    pub confidence: f32,
    /// Whether the classifier produced any candidate at all
    pub detected: bool,
    pub used_fallback: bool,
    pub reason: DetectionReason,
    /// The classifier's candidate, kept even when the fallback wins
    pub raw_detection: Option<String>,
}

/// A fully resolved (language, voice) pair for one engine.
#[derive(Debug, Clone)]
pub struct ResolvedVoice {
    pub language: String,
    pub voice_id: String,
    pub detection: Detection,
}

pub struct LanguageDetector {
    config: DetectorConfig,
    cache: Cache<u64, Detection>,
}

impl LanguageDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();
        Self { config, cache }
    }

    /// Drop cached results. Called on configuration changes.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Detect the language of `text`.
    pub fn detect(&self, text: &str, fallback_override: Option<&str>) -> Detection {
        let fallback = fallback_override.unwrap_or(&self.config.fallback_language);
        let trimmed = text.trim();

        if trimmed.chars().count() < self.config.min_length {
            return Detection {
                language: fallback.to_string(),
                confidence: 0.0,
                detected: false,
                used_fallback: true,
                reason: DetectionReason::TextTooShort,
                raw_detection: None,
            };
        }

        let key = xxh3_64(format!("{fallback}\u{1f}{trimmed}").as_bytes());
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let detection = self.classify(trimmed, fallback);
        self.cache.insert(key, detection.clone());
        detection
    }

    fn classify(&self, trimmed: &str, fallback: &str) -> Detection {
        let Some(info) = whatlang::detect(trimmed) else {
            debug!("classifier produced no candidate");
            return Detection {
                language: fallback.to_string(),
                confidence: 0.0,
                detected: false,
                used_fallback: true,
                reason: DetectionReason::DetectionUndefined,
                raw_detection: None,
            };
        };

        let candidate = iso639_1(info.lang());
        let confidence = self.estimate_confidence(trimmed, &candidate);

        if confidence < self.config.confidence_threshold {
            debug!("detection of '{candidate}' at {confidence:.2} below threshold, using fallback");
            return Detection {
                language: fallback.to_string(),
                confidence,
                detected: true,
                used_fallback: true,
                reason: DetectionReason::BelowThreshold,
                raw_detection: Some(candidate),
            };
        }

        Detection {
            language: candidate.clone(),
            confidence,
            detected: true,
            used_fallback: false,
            reason: DetectionReason::Detected,
            raw_detection: Some(candidate),
        }
    }

    /// Estimated confidence: five length bands, a native-script boost, and a
    /// hard cap for single-word inputs.
    fn estimate_confidence(&self, text: &str, candidate: &str) -> f32 {
        let len = text.chars().count();
        let mut confidence: f32 = match len {
            0..=11 => 0.50,
            12..=23 => 0.70,
            24..=47 => 0.85,
            48..=95 => 0.93,
            _ => 0.97,
        };

        if has_native_script(candidate, text) {
            confidence = (confidence + 0.05).min(0.99);
        }

        // A lone word carries too little signal regardless of its length
        if !text.contains(char::is_whitespace) {
            confidence = confidence.min(0.60);
        }

        confidence
    }

    /// Detect and resolve a voice on `engine` in one step.
    ///
    /// Falls back to the system default language (and that language's voice
    /// on the engine) when the engine maps no voice for the detected
    /// language. Never returns an unresolved voice.
    pub fn detect_and_get_voice(
        &self,
        text: &str,
        engine: &dyn SynthesisEngine,
        fallback_override: Option<&str>,
    ) -> ResolvedVoice {
        let detection = self.detect(text, fallback_override);

        if let Some(voice_id) = engine.voice_for_language(&detection.language) {
            return ResolvedVoice {
                language: detection.language.clone(),
                voice_id,
                detection,
            };
        }

        let default_lang = self.config.fallback_language.clone();
        let voice_id = engine.default_voice_for_language(&default_lang);
        ResolvedVoice {
            language: default_lang,
            voice_id,
            detection,
        }
    }
}

/// Map whatlang's ISO 639-3 codes onto the two-letter codes the voice
/// catalogs use. Unmapped languages keep their 639-3 code.
fn iso639_1(lang: whatlang::Lang) -> String {
    use whatlang::Lang;
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Deu => "de",
        Lang::Fra => "fr",
        Lang::Por => "pt",
        Lang::Ita => "it",
        Lang::Nld => "nl",
        Lang::Pol => "pl",
        Lang::Tur => "tr",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        Lang::Ara => "ar",
        Lang::Hin => "hi",
        Lang::Ell => "el",
        Lang::Heb => "he",
        Lang::Tha => "th",
        Lang::Bul => "bg",
        Lang::Ces => "cs",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Hun => "hu",
        Lang::Nob => "no",
        Lang::Swe => "sv",
        Lang::Vie => "vi",
        Lang::Ind => "id",
        Lang::Ron => "ro",
        other => return other.code().to_string(),
    }
    .to_string()
}

/// Whether `text` contains characters from the candidate language's native
/// script (or, for Latin-script languages, its distinctive diacritics).
fn has_native_script(language: &str, text: &str) -> bool {
    let in_range = |c: char, lo: u32, hi: u32| (lo..=hi).contains(&(c as u32));
    match language {
        "ru" | "uk" | "bg" => text.chars().any(|c| in_range(c, 0x0400, 0x04FF)),
        "el" => text.chars().any(|c| in_range(c, 0x0370, 0x03FF)),
        "ar" => text.chars().any(|c| in_range(c, 0x0600, 0x06FF)),
        "he" => text.chars().any(|c| in_range(c, 0x0590, 0x05FF)),
        "hi" => text.chars().any(|c| in_range(c, 0x0900, 0x097F)),
        "th" => text.chars().any(|c| in_range(c, 0x0E00, 0x0E7F)),
        "ja" => text.chars().any(|c| in_range(c, 0x3040, 0x30FF)),
        "ko" => text
            .chars()
            .any(|c| in_range(c, 0xAC00, 0xD7AF) || in_range(c, 0x1100, 0x11FF)),
        "zh" => text.chars().any(|c| in_range(c, 0x4E00, 0x9FFF)),
        "de" => text.chars().any(|c| "äöüÄÖÜß".contains(c)),
        "es" => text.chars().any(|c| "ñ¿¡áéíóú".contains(c)),
        "fr" => text.chars().any(|c| "çàâêëèéîïôûùœ".contains(c)),
        "pt" => text.chars().any(|c| "ãõçáâéêíóôú".contains(c)),
        "tr" => text.chars().any(|c| "ğşıİçö".contains(c)),
        "pl" => text.chars().any(|c| "ąćęłńśźż".contains(c)),
        _ => false,
    }
}
