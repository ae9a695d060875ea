//! The speak pipeline: permission → filtering → voice/engine resolution →
//! synthesis with fallback → enqueue.
//!
//! The pipeline is linear and short-circuits on the first failing stage.
//! Synthesis runs concurrently with whatever is currently playing; only the
//! final enqueue step touches shared queue state.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CrierConfig;
use crate::core::events::{EventBus, PipelineEvent, PipelineStage};
use crate::core::filter::{FilterAction, ProfanityFilter};
use crate::core::language::LanguageDetector;
use crate::core::permissions::{PermissionManager, UserPermission};
use crate::core::queue::{NewSpeech, QueueManager, RequestSource};
use crate::core::store::RecordStore;
use crate::core::tts::{Engine, EngineSet, SynthesisRequest, UsageSnapshot};
use crate::errors::{EngineAttempt, SpeakError};

/// Durable flag key for the global kill-switch.
pub const TTS_ENABLED_FLAG: &str = "tts_enabled";

/// One speak request, however it arrived.
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub text: String,
    pub user_id: String,
    pub username: String,
    pub requested_voice: Option<String>,
    pub requested_engine: Option<Engine>,
    pub source: RequestSource,
    pub team_level: u8,
    pub is_subscriber: bool,
    pub priority_override: Option<i32>,
}

/// Inbound chat message from the event source.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub text: String,
    pub user_id: String,
    pub username: String,
    pub team_level: u8,
    pub is_subscriber: bool,
    pub timestamp: SystemTime,
}

/// Successful pipeline outcome: the message is queued for playback.
#[derive(Debug, Clone)]
pub struct SpeakSuccess {
    pub request_id: Uuid,
    pub item_id: Uuid,
    pub position: usize,
    pub queue_size: usize,
    pub estimated_wait_ms: u64,
    pub engine: Engine,
    pub voice: String,
}

/// How the voice was resolved, kept so engine substitution can re-resolve
/// with the same intent.
#[derive(Debug, Clone)]
enum VoiceResolution {
    /// System source with an explicit voice; never auto-detected
    Pinned,
    /// Per-user assignment; substitution maps to the assignment's language
    /// default on the new engine, never back to text detection
    Assigned { language: String },
    /// Everything else; substitution re-runs detection (when enabled) or
    /// falls back to the default language's voice
    General,
}

pub struct Orchestrator {
    config: Arc<CrierConfig>,
    store: Arc<dyn RecordStore>,
    permissions: Arc<PermissionManager>,
    filter: ProfanityFilter,
    detector: LanguageDetector,
    engines: EngineSet,
    queue: Arc<QueueManager>,
    events: EventBus,
    started_at: SystemTime,
}

impl Orchestrator {
    pub fn new(
        config: Arc<CrierConfig>,
        store: Arc<dyn RecordStore>,
        permissions: Arc<PermissionManager>,
        engines: EngineSet,
        queue: Arc<QueueManager>,
        events: EventBus,
    ) -> Self {
        let filter = ProfanityFilter::new(config.filter.clone());
        let detector = LanguageDetector::new(config.detector.clone());
        Self {
            config,
            store,
            permissions,
            filter,
            detector,
            engines,
            queue,
            events,
            started_at: SystemTime::now(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    /// Per-engine usage accounting.
    pub fn usage(&self) -> Vec<(Engine, UsageSnapshot)> {
        Engine::ALL
            .iter()
            .map(|e| (*e, self.engines.get(*e).usage()))
            .collect()
    }

    /// Flip the durable global kill-switch.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SpeakError> {
        info!(enabled, "setting global TTS flag");
        self.store.set_flag(TTS_ENABLED_FLAG, enabled).await?;
        Ok(())
    }

    pub async fn is_enabled(&self) -> Result<bool, SpeakError> {
        Ok(self
            .store
            .get_flag(TTS_ENABLED_FLAG)
            .await?
            .unwrap_or(self.config.enabled_default))
    }

    /// Entry point for the chat-event source.
    ///
    /// Events timestamped before orchestrator startup are ignored (no
    /// backlog replay on restart). Rejections are logged, never surfaced
    /// to the audience.
    pub async fn handle_chat_event(&self, event: ChatEvent) -> Option<SpeakSuccess> {
        if event.timestamp < self.started_at {
            debug!(user_id = %event.user_id, "ignoring chat event from before startup");
            return None;
        }
        let request = SpeakRequest {
            text: event.text,
            user_id: event.user_id,
            username: event.username,
            requested_voice: None,
            requested_engine: None,
            source: RequestSource::Chat,
            team_level: event.team_level,
            is_subscriber: event.is_subscriber,
            priority_override: None,
        };
        match self.speak(request).await {
            Ok(success) => Some(success),
            Err(e) => {
                info!(reason = e.reason(), error = %e, "chat message not spoken");
                None
            }
        }
    }

    /// Run the full speak pipeline for one request.
    pub async fn speak(&self, request: SpeakRequest) -> Result<SpeakSuccess, SpeakError> {
        let request_id = Uuid::new_v4();
        self.events.emit(PipelineEvent::request(
            request_id,
            PipelineStage::Received,
            format!("source={:?} user={}", request.source, request.user_id),
        ));

        let result = self.speak_inner(request_id, &request).await;
        match &result {
            Ok(success) => {
                self.events.emit(PipelineEvent::request(
                    request_id,
                    PipelineStage::Enqueued,
                    format!("position={} engine={}", success.position, success.engine),
                ));
            }
            Err(e) => {
                self.events.emit(PipelineEvent::request(
                    request_id,
                    PipelineStage::Rejected,
                    e.reason(),
                ));
            }
        }
        result
    }

    async fn speak_inner(
        &self,
        request_id: Uuid,
        request: &SpeakRequest,
    ) -> Result<SpeakSuccess, SpeakError> {
        // 1. Global kill-switch, checked first and unconditionally
        if !self.is_enabled().await? {
            return Err(SpeakError::TtsDisabled);
        }

        // 2. Permission
        let decision = self
            .permissions
            .check_permission(
                &request.user_id,
                &request.username,
                request.team_level,
                self.config.min_team_level,
            )
            .await?;
        self.events.emit(PipelineEvent::request(
            request_id,
            PipelineStage::PermissionChecked,
            decision.reason.as_str(),
        ));
        if !decision.allowed {
            return Err(SpeakError::PermissionDenied {
                reason: decision.reason.as_str(),
                required_level: decision.required_level,
                actual_level: decision.actual_level,
            });
        }
        let user = self
            .permissions
            .get_or_create(&request.user_id, &request.username)
            .await?;

        // 3. Content filter
        let outcome = self
            .filter
            .filter(&request.text, user.language_preference.as_deref());
        self.events.emit(PipelineEvent::request(
            request_id,
            PipelineStage::Filtered,
            format!("matches={}", outcome.matches.len()),
        ));
        if outcome.action == FilterAction::Drop {
            return Err(SpeakError::ProfanityRejected {
                matches: outcome.matches,
            });
        }
        let mut text = outcome.filtered;
        if self.config.strip_emoji {
            text = strip_emoji(&text);
        }

        // 4. Validation: empty is rejected, over-length is truncated
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SpeakError::EmptyText);
        }
        let (text, truncated) = truncate_with_ellipsis(&text, self.config.max_text_length);
        if truncated {
            debug!(user_id = %request.user_id, "truncated over-length message");
        }

        // 5 + 6. Voice/engine resolution and availability substitution
        let (engine, voice, resolution) = self.resolve_voice(request_id, request, &user, &text)?;
        self.events.emit(PipelineEvent::request(
            request_id,
            PipelineStage::EngineSelected,
            format!("engine={engine} voice={voice}"),
        ));

        // 7. Synthesis, walking the fallback chain on failure
        let (final_engine, final_voice, audio) = self
            .synthesize_with_fallback(request_id, engine, voice, &resolution, &text)
            .await?;

        // 8. Enqueue; rejection is surfaced as-is, never retried
        let volume = (self.config.base_volume * user.volume_gain).clamp(0.0, 2.0);
        let enqueued = self.queue.enqueue(NewSpeech {
            user_id: request.user_id.clone(),
            username: request.username.clone(),
            text,
            voice: final_voice.clone(),
            engine: final_engine,
            audio,
            source: request.source,
            team_level: request.team_level,
            is_subscriber: request.is_subscriber,
            priority_override: request.priority_override,
            volume,
            speed: self.config.speed,
        })?;

        Ok(SpeakSuccess {
            request_id,
            item_id: enqueued.id,
            position: enqueued.position,
            queue_size: enqueued.queue_size,
            estimated_wait_ms: enqueued.estimated_wait_ms,
            engine: final_engine,
            voice: final_voice,
        })
    }

    /// Steps 5 and 6: pick engine and voice, then substitute an available
    /// engine if the chosen one has no credentials.
    fn resolve_voice(
        &self,
        request_id: Uuid,
        request: &SpeakRequest,
        user: &UserPermission,
        text: &str,
    ) -> Result<(Engine, String, VoiceResolution), SpeakError> {
        // (a) system sources pin the requested engine/voice, never detected
        let engine = match request.source {
            RequestSource::System => request
                .requested_engine
                .unwrap_or(self.config.default_engine),
            _ => user
                .assigned_engine
                .or(request.requested_engine)
                .unwrap_or(self.config.default_engine),
        };
        let adapter = self.engines.get(engine);

        let (voice, resolution) = if request.source == RequestSource::System {
            let voice = request
                .requested_voice
                .clone()
                .unwrap_or_else(|| adapter.default_voice_for_language(&self.config.default_language));
            (voice, VoiceResolution::Pinned)
        } else if let Some(assigned) = &user.assigned_voice_id {
            // (b) an explicit assignment beats any request-supplied voice
            let language = self
                .engines
                .assigned_voice_language(user.assigned_engine.unwrap_or(engine), assigned)
                .or_else(|| user.language_preference.clone())
                .unwrap_or_else(|| self.config.default_language.clone());
            (assigned.clone(), VoiceResolution::Assigned { language })
        } else if let Some(requested) = &request.requested_voice {
            (requested.clone(), VoiceResolution::General)
        } else if self.config.auto_detect_language {
            // (c) detect against the selected engine's catalog
            let resolved = self.detector.detect_and_get_voice(
                text,
                adapter.as_ref(),
                user.language_preference.as_deref(),
            );
            self.events.emit(PipelineEvent::request(
                request_id,
                PipelineStage::LanguageDetected,
                format!(
                    "language={} confidence={:.2} fallback={}",
                    resolved.detection.language,
                    resolved.detection.confidence,
                    resolved.detection.used_fallback,
                ),
            ));
            (resolved.voice_id, VoiceResolution::General)
        } else {
            // (d) configured default voice
            (self.config.default_voice.clone(), VoiceResolution::General)
        };

        // (e) absolute last resort: synthesis never starts with an empty voice
        let voice = if voice.trim().is_empty() {
            adapter.default_voice_for_language(&self.config.default_language)
        } else {
            voice
        };

        // Step 6: availability check and substitution
        if self.engines.is_configured(engine) {
            return Ok((engine, voice, resolution));
        }
        let Some(substitute) = self
            .engines
            .first_configured(engine.fallback_chain().iter().copied())
        else {
            return Err(SpeakError::NoEnginesAvailable);
        };
        debug!(%engine, %substitute, "engine unconfigured, substituting");
        let voice = self.substitute_voice(substitute, &resolution, text);
        Ok((substitute, voice, resolution))
    }

    /// Re-resolve a voice for a different engine, preserving the original
    /// resolution's intent: an assignment maps to the assigned language's
    /// default voice on the new engine and is never re-detected from text.
    fn substitute_voice(&self, engine: Engine, resolution: &VoiceResolution, text: &str) -> String {
        let adapter = self.engines.get(engine);
        match resolution {
            VoiceResolution::Assigned { language } => adapter.default_voice_for_language(language),
            VoiceResolution::General if self.config.auto_detect_language => {
                self.detector
                    .detect_and_get_voice(text, adapter.as_ref(), None)
                    .voice_id
            }
            _ => adapter.default_voice_for_language(&self.config.default_language),
        }
    }

    /// Step 7: attempt synthesis, walking the engine's fallback chain.
    async fn synthesize_with_fallback(
        &self,
        request_id: Uuid,
        engine: Engine,
        voice: String,
        resolution: &VoiceResolution,
        text: &str,
    ) -> Result<(Engine, String, Bytes), SpeakError> {
        let mut candidates = vec![engine];
        for e in engine.fallback_chain() {
            if self.engines.is_configured(*e) && !candidates.contains(e) {
                candidates.push(*e);
            }
        }

        let mut attempts: Vec<EngineAttempt> = Vec::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            let attempt_voice = if i == 0 {
                voice.clone()
            } else {
                self.substitute_voice(candidate, resolution, text)
            };
            self.events.emit(PipelineEvent::request(
                request_id,
                PipelineStage::SynthesisStarted,
                format!("engine={candidate} voice={attempt_voice}"),
            ));

            let request = SynthesisRequest {
                text: text.to_string(),
                voice_id: attempt_voice.clone(),
                speed: self.config.speed,
            };
            match self.engines.get(candidate).synthesize(&request).await {
                Ok(audio) => {
                    self.events.emit(PipelineEvent::request(
                        request_id,
                        PipelineStage::SynthesisSucceeded,
                        format!("engine={candidate} bytes={}", audio.len()),
                    ));
                    return Ok((candidate, attempt_voice, audio));
                }
                Err(error) => {
                    warn!(engine = %candidate, %error, "synthesis attempt failed");
                    self.events.emit(PipelineEvent::request(
                        request_id,
                        PipelineStage::SynthesisFailed,
                        format!("engine={candidate} error={error}"),
                    ));
                    attempts.push(EngineAttempt {
                        engine: candidate,
                        voice: attempt_voice,
                        error,
                    });
                    // A fatal error on one provider is independent of the
                    // next; the walk continues either way, unless fallback
                    // is disabled entirely.
                    if !self.config.auto_fallback {
                        break;
                    }
                }
            }
        }

        if attempts.is_empty() {
            // Primary unconfigured and no chain member configured either
            return Err(SpeakError::NoEnginesAvailable);
        }
        Err(SpeakError::SynthesisFailed { attempts })
    }
}

/// Remove emoji and related presentation characters.
fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_emoji_char(*c)).collect()
}

fn is_emoji_char(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF   // pictographs, emoticons, transport, supplemental
        | 0x2600..=0x27BF   // misc symbols and dingbats
        | 0x2B00..=0x2BFF   // arrows and stars
        | 0xFE0E..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
        | 0x20E3            // combining enclosing keycap
    )
}

/// Hard-truncate to `max_chars`, marking the cut with an ellipsis.
fn truncate_with_ellipsis(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push('…');
    (truncated, true)
}
