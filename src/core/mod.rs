pub mod events;
pub mod filter;
pub mod language;
pub mod orchestrator;
pub mod permissions;
pub mod queue;
pub mod store;
pub mod tts;

// Re-export commonly used types for convenience
pub use events::{EventBus, PipelineEvent, PipelineStage};
pub use filter::{FilterAction, FilterConfig, FilterMode, FilterOutcome, ProfanityFilter};
pub use language::{Detection, DetectorConfig, LanguageDetector, ResolvedVoice};
pub use orchestrator::{ChatEvent, Orchestrator, SpeakRequest, SpeakSuccess};
pub use permissions::{PermissionDecision, PermissionManager, PermissionReason, UserPermission};
pub use queue::{
    CurrentItem, DuckingHints, EnqueueRejection, Enqueued, NewSpeech, PlaybackPayload,
    PlaybackSink, QueueConfig, QueueItem, QueueManager, RequestSource,
};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreError};
pub use tts::{
    Engine, EngineError, EngineSet, PerformanceMode, SynthesisEngine, SynthesisRequest, Voice,
};
