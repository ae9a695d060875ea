//! Cross-engine fallback behavior: availability substitution, fallback
//! walks on failure, fail-fast status handling, and preservation of voice
//! assignment intent.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crier::config::CrierConfig;
use crier::core::events::EventBus;
use crier::core::orchestrator::{Orchestrator, SpeakRequest};
use crier::core::permissions::PermissionManager;
use crier::core::queue::{QueueConfig, QueueManager, RequestSource};
use crier::core::store::MemoryRecordStore;
use crier::core::tts::base::RetryPolicy;
use crier::core::tts::{
    DeepgramEngine, ElevenLabsEngine, Engine, EngineSet, GoogleEngine,
};
use crier::errors::SpeakError;

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        request_timeout: Duration::from_secs(2),
        max_retries: 1,
        base_backoff: Duration::from_millis(10),
    }
}

fn test_config() -> CrierConfig {
    let mut config = CrierConfig::default();
    config.queue = QueueConfig {
        max_size: 10,
        dedup_window_secs: 5,
        rate_limit_max: 10,
        rate_limit_window_secs: 5,
        ms_per_char: 1,
        playback_buffer_ms: 10,
    };
    config
}

struct Harness {
    orchestrator: Orchestrator,
    queue: Arc<QueueManager>,
    permissions: Arc<PermissionManager>,
}

fn harness(config: CrierConfig, engines: EngineSet) -> Harness {
    let config = Arc::new(config);
    let store = Arc::new(MemoryRecordStore::new());
    let events = EventBus::new();
    let permissions = Arc::new(PermissionManager::new(store.clone()));
    let queue = QueueManager::new(config.queue.clone(), events.clone());
    let orchestrator = Orchestrator::new(
        config,
        store,
        permissions.clone(),
        engines,
        queue.clone(),
        events,
    );
    Harness {
        orchestrator,
        queue,
        permissions,
    }
}

fn request(text: &str) -> SpeakRequest {
    SpeakRequest {
        text: text.to_string(),
        user_id: "u1".to_string(),
        username: "u1".to_string(),
        requested_voice: None,
        requested_engine: None,
        source: RequestSource::Manual,
        team_level: 0,
        is_subscriber: false,
        priority_override: None,
    }
}

async fn mock_google_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/text:synthesize"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "audioContent": BASE64.encode(b"google-audio") })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn failing_primary_falls_back_to_next_chain_engine() {
    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speak"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2) // initial attempt + 1 retry
        .mount(&deepgram)
        .await;
    let google = MockServer::start().await;
    mock_google_ok(&google).await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(
            DeepgramEngine::new(Some("dg-key".to_string()), test_policy())
                .with_base_url(deepgram.uri()),
        ),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let h = harness(test_config(), engines);

    let success = h
        .orchestrator
        .speak(request("welcome everyone to the stream tonight"))
        .await
        .unwrap();

    assert_eq!(success.engine, Engine::Google);
    // Voice was re-resolved for the fallback engine's catalog
    assert!(success.voice.starts_with("en-"));
    assert_eq!(&h.queue.upcoming(1)[0].audio[..], b"google-audio");
}

#[tokio::test]
async fn fatal_error_fails_fast_but_still_tries_next_engine() {
    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speak"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .expect(1) // no retry on auth errors despite the retry budget
        .mount(&deepgram)
        .await;
    let google = MockServer::start().await;
    mock_google_ok(&google).await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(
            DeepgramEngine::new(Some("bad-key".to_string()), test_policy())
                .with_base_url(deepgram.uri()),
        ),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let h = harness(test_config(), engines);

    let success = h
        .orchestrator
        .speak(request("welcome everyone to the stream tonight"))
        .await
        .unwrap();
    assert_eq!(success.engine, Engine::Google);
}

#[tokio::test]
async fn disabled_auto_fallback_surfaces_the_first_error() {
    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speak"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&deepgram)
        .await;
    let google = MockServer::start().await;
    let google_mock = Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "audioContent": "" })))
        .expect(0); // never reached
    google_mock.mount(&google).await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(
            DeepgramEngine::new(Some("dg-key".to_string()), test_policy())
                .with_base_url(deepgram.uri()),
        ),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let mut config = test_config();
    config.auto_fallback = false;
    let h = harness(config, engines);

    let err = h
        .orchestrator
        .speak(request("this will not be heard"))
        .await
        .unwrap_err();
    match err {
        SpeakError::SynthesisFailed { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].engine, Engine::Deepgram);
        }
        other => panic!("expected synthesis failure, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_chain_aggregates_all_attempts() {
    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&deepgram)
        .await;
    let google = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&google)
        .await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(
            DeepgramEngine::new(Some("dg-key".to_string()), test_policy())
                .with_base_url(deepgram.uri()),
        ),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let h = harness(test_config(), engines);

    let err = h
        .orchestrator
        .speak(request("nobody is home tonight"))
        .await
        .unwrap_err();
    match err {
        SpeakError::SynthesisFailed { attempts } => {
            let tried: Vec<Engine> = attempts.iter().map(|a| a.engine).collect();
            assert_eq!(tried, vec![Engine::Deepgram, Engine::Google]);
        }
        other => panic!("expected aggregated failure, got {other:?}"),
    }
}

#[tokio::test]
async fn no_configured_engines_is_a_distinct_error() {
    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(DeepgramEngine::new(None, test_policy())),
        Arc::new(GoogleEngine::new(None, test_policy())),
    );
    let h = harness(test_config(), engines);

    let err = h
        .orchestrator
        .speak(request("is this thing on"))
        .await
        .unwrap_err();
    assert!(matches!(err, SpeakError::NoEnginesAvailable));
}

#[tokio::test]
async fn assignment_intent_survives_engine_substitution() {
    // The user has a German ElevenLabs voice assigned, but ElevenLabs has
    // no credentials. The substitute engine must use its own German default
    // voice; running text detection instead would pick an English voice
    // because the message text is English.
    let google = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text:synthesize"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "audioContent": BASE64.encode(b"german-audio") })),
        )
        .mount(&google)
        .await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())), // unconfigured
        Arc::new(DeepgramEngine::new(None, test_policy())),   // unconfigured
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let h = harness(test_config(), engines);

    // Domi is a German voice in the ElevenLabs catalog
    h.permissions
        .assign_voice("u1", "u1", Engine::ElevenLabs, "AZnzlk1XvdvUeBnXmlld")
        .await
        .unwrap();

    let success = h
        .orchestrator
        .speak(request("this message is written in plain english"))
        .await
        .unwrap();

    assert_eq!(success.engine, Engine::Google);
    assert_eq!(success.voice, "de-DE-Neural2-B");
}

#[tokio::test]
async fn assignment_intent_survives_mid_synthesis_fallback() {
    // Same intent rule when the assigned engine is configured but failing:
    // the fallback engine gets the assignment language's default voice.
    let elevenlabs = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&elevenlabs)
        .await;
    let google = MockServer::start().await;
    mock_google_ok(&google).await;

    let engines = EngineSet::new(
        Arc::new(
            ElevenLabsEngine::new(Some("xi-key".to_string()), test_policy())
                .with_base_url(elevenlabs.uri()),
        ),
        Arc::new(DeepgramEngine::new(None, test_policy())),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let h = harness(test_config(), engines);

    h.permissions
        .assign_voice("u1", "u1", Engine::ElevenLabs, "AZnzlk1XvdvUeBnXmlld")
        .await
        .unwrap();

    let success = h
        .orchestrator
        .speak(request("this message is written in plain english"))
        .await
        .unwrap();

    assert_eq!(success.engine, Engine::Google);
    assert_eq!(success.voice, "de-DE-Neural2-B");
}

#[tokio::test]
async fn requested_engine_is_honored_when_configured() {
    let google = MockServer::start().await;
    mock_google_ok(&google).await;
    let deepgram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/speak"))
        .and(query_param("model", "aura-asteria-en"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"dg-audio".to_vec()))
        .mount(&deepgram)
        .await;

    let engines = EngineSet::new(
        Arc::new(ElevenLabsEngine::new(None, test_policy())),
        Arc::new(
            DeepgramEngine::new(Some("dg-key".to_string()), test_policy())
                .with_base_url(deepgram.uri()),
        ),
        Arc::new(
            GoogleEngine::new(Some("g-key".to_string()), test_policy())
                .with_base_url(google.uri()),
        ),
    );
    let mut config = test_config();
    config.default_engine = Engine::Google;
    let h = harness(config, engines);

    let mut req = request("please use the requested engine");
    req.requested_engine = Some(Engine::Deepgram);
    let success = h.orchestrator.speak(req).await.unwrap();
    assert_eq!(success.engine, Engine::Deepgram);
}
