pub mod config;
pub mod core;
pub mod errors;
pub mod state;

// Re-export commonly used items for convenience
pub use crate::config::CrierConfig;
pub use crate::core::events::{EventBus, PipelineEvent, PipelineStage};
pub use crate::core::orchestrator::{
    ChatEvent, Orchestrator, SpeakRequest, SpeakSuccess, TTS_ENABLED_FLAG,
};
pub use crate::core::queue::{
    EnqueueRejection, LoggingSink, PlaybackPayload, PlaybackSink, QueueItem, QueueManager,
    RequestSource,
};
pub use crate::core::tts::{Engine, EngineError, PerformanceMode, SynthesisEngine, Voice};
pub use crate::errors::SpeakError;
pub use crate::state::AppState;
