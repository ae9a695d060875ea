//! Owned application state with an explicit lifecycle.
//!
//! Everything mutable (the enable flag, caches, the queue) lives behind this
//! state object: built at construction, mutated only through the defined
//! admin entry points, torn down on shutdown. There is no global state.

use std::sync::Arc;

use crate::config::CrierConfig;
use crate::core::events::EventBus;
use crate::core::orchestrator::Orchestrator;
use crate::core::permissions::PermissionManager;
use crate::core::queue::{PlaybackSink, QueueManager};
use crate::core::store::{RecordStore, open_store};
use crate::core::tts::EngineSet;

pub struct AppState {
    pub config: Arc<CrierConfig>,
    pub store: Arc<dyn RecordStore>,
    pub permissions: Arc<PermissionManager>,
    pub queue: Arc<QueueManager>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wire the full stack: store → permissions → engines → queue →
    /// orchestrator, and start the playback worker.
    pub async fn new(config: CrierConfig, sink: Arc<dyn PlaybackSink>) -> Arc<Self> {
        let store = open_store(config.store_path.clone()).await;
        Self::with_store(config, store, sink)
    }

    /// Like [`Self::new`] but with a caller-provided store (embedding hosts,
    /// tests).
    pub fn with_store(
        config: CrierConfig,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let events = EventBus::new();
        let permissions = Arc::new(PermissionManager::new(store.clone()));
        let engines = EngineSet::from_credentials(
            config.elevenlabs_api_key.clone(),
            config.deepgram_api_key.clone(),
            config.google_api_key.clone(),
            config.performance_mode,
        );
        let queue = QueueManager::new(config.queue.clone(), events.clone());
        queue.start(sink);

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            store.clone(),
            permissions.clone(),
            engines,
            queue.clone(),
            events,
        ));

        Arc::new(Self {
            config,
            store,
            permissions,
            queue,
            orchestrator,
        })
    }

    /// Stop the playback worker. Queue contents are dropped.
    pub fn shutdown(&self) {
        self.queue.clear();
        self.queue.stop();
    }
}
