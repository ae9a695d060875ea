//! Debug/event stream of pipeline-stage transitions.
//!
//! Every stage of the speak pipeline and the playback worker emits a
//! [`PipelineEvent`] on a broadcast channel. Nothing in the pipeline depends
//! on subscribers existing; emission with no receivers is a no-op.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    PermissionChecked,
    Filtered,
    LanguageDetected,
    EngineSelected,
    SynthesisStarted,
    SynthesisFailed,
    SynthesisSucceeded,
    Enqueued,
    Rejected,
    PlaybackStarted,
    PlaybackFinished,
    PlaybackSkipped,
    QueueCleared,
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    /// Speak-pipeline request this event belongs to, if any
    pub request_id: Option<Uuid>,
    /// Queue item this event belongs to, if any
    pub item_id: Option<Uuid>,
    pub stage: PipelineStage,
    pub detail: String,
    /// Unix seconds
    pub at: u64,
}

impl PipelineEvent {
    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn request(request_id: Uuid, stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id),
            item_id: None,
            stage,
            detail: detail.into(),
            at: Self::now(),
        }
    }

    pub fn queue(stage: PipelineStage, item_id: Option<Uuid>) -> Self {
        Self {
            request_id: None,
            item_id,
            stage,
            detail: String::new(),
            at: Self::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        // No receivers is fine; the stream is purely observational
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
