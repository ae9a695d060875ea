//! Priority-ordered, rate-limited, deduplicated playback queue.
//!
//! A single worker task owns the playback slot: it pops the highest-priority
//! ready item, hands it to the [`PlaybackSink`], then waits out the item's
//! estimated duration before looking at the queue again, so two items never
//! overlap. The worker is woken by enqueue rather than polling; skip and
//! shutdown interrupt the pacing wait without touching in-flight synthesis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::events::{EventBus, PipelineEvent, PipelineStage};
use crate::core::tts::Engine;

/// Where a speak request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Chat,
    Manual,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued (not yet played) items
    pub max_size: usize,
    /// Window during which identical (user, text) pairs are duplicates
    pub dedup_window_secs: u64,
    /// Requests allowed per user within the rate window
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    /// Playback-duration policy: milliseconds per character at speed 1.0
    pub ms_per_char: u64,
    /// Fixed pause appended after each item
    pub playback_buffer_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 20,
            dedup_window_secs: 30,
            rate_limit_max: 5,
            rate_limit_window_secs: 60,
            ms_per_char: 60,
            playback_buffer_ms: 500,
        }
    }
}

/// An accepted playback job. Owned exclusively by the queue until dequeued.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub voice: String,
    pub engine: Engine,
    pub audio: Bytes,
    pub priority: i32,
    /// Unix seconds at enqueue, for introspection
    pub enqueued_at: u64,
    pub source: RequestSource,
    pub team_level: u8,
    pub volume: f32,
    pub speed: f32,
}

/// A synthesized item ready for enqueueing.
#[derive(Debug, Clone)]
pub struct NewSpeech {
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub voice: String,
    pub engine: Engine,
    pub audio: Bytes,
    pub source: RequestSource,
    pub team_level: u8,
    pub is_subscriber: bool,
    pub priority_override: Option<i32>,
    pub volume: f32,
    pub speed: f32,
}

/// Successful enqueue result.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub id: Uuid,
    /// 1-based position among waiting items after priority ordering
    pub position: usize,
    pub queue_size: usize,
    /// Rough linear estimate, not a guarantee
    pub estimated_wait_ms: u64,
}

/// Backpressure rejections. Transient; the caller may retry, the queue
/// never retries internally.
#[derive(Debug, Clone, Error)]
pub enum EnqueueRejection {
    #[error("duplicate content within the dedup window")]
    DuplicateContent,

    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("queue is full ({capacity} items)")]
    QueueFull { capacity: usize },
}

impl EnqueueRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            EnqueueRejection::DuplicateContent => "duplicate_content",
            EnqueueRejection::RateLimited { .. } => "rate_limit",
            EnqueueRejection::QueueFull { .. } => "queue_full",
        }
    }
}

/// Hints for the playback layer about other audio on the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckingHints {
    /// Lower other sources while this item plays
    pub duck_others: bool,
    /// Restore ramp after playback ends
    pub restore_ms: u64,
}

impl Default for DuckingHints {
    fn default() -> Self {
        Self {
            duck_others: true,
            restore_ms: 250,
        }
    }
}

/// What the playback layer receives per item.
#[derive(Debug, Clone)]
pub struct PlaybackPayload {
    pub item_id: Uuid,
    pub audio: Bytes,
    pub voice: String,
    pub engine: Engine,
    pub volume: f32,
    pub speed: f32,
    pub ducking: DuckingHints,
}

/// Playback sink consumed by the worker. The queue never plays audio
/// itself; it only paces by estimated duration.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, payload: PlaybackPayload);
}

/// Sink that just logs, for harnesses and tests.
pub struct LoggingSink;

#[async_trait]
impl PlaybackSink for LoggingSink {
    async fn play(&self, payload: PlaybackPayload) {
        info!(
            item = %payload.item_id,
            engine = %payload.engine,
            voice = %payload.voice,
            bytes = payload.audio.len(),
            volume = %payload.volume,
            "playing item"
        );
    }
}

/// Priority: explicit override wins, otherwise team-level weight plus
/// subscriber and source bonuses on a fixed baseline.
pub fn compute_priority(
    source: RequestSource,
    team_level: u8,
    is_subscriber: bool,
    priority_override: Option<i32>,
) -> i32 {
    if let Some(p) = priority_override {
        return p;
    }
    let mut priority = 10;
    priority += i32::from(team_level.min(5)) * 5;
    if is_subscriber {
        priority += 10;
    }
    priority += match source {
        RequestSource::Manual => 100,
        RequestSource::System => 50,
        RequestSource::Chat => 0,
    };
    priority
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Case- and whitespace-insensitive form used for dedup hashing.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn content_hash(user_id: &str, text: &str) -> u64 {
    xxh3_64(format!("{user_id}\u{1f}{}", normalize(text)).as_bytes())
}

/// Currently playing item, kept for introspection.
#[derive(Debug, Clone)]
pub struct CurrentItem {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub voice: String,
    pub engine: Engine,
    pub started_at: u64,
    pub estimated_duration_ms: u64,
}

struct QueueState {
    items: Vec<QueueItem>,
    current: Option<CurrentItem>,
    /// content hash → last accepted time
    dedup: HashMap<u64, Instant>,
    /// user → accepted request timestamps within the rate window
    rate: HashMap<String, VecDeque<Instant>>,
}

pub struct QueueManager {
    config: QueueConfig,
    state: Mutex<QueueState>,
    wake: Notify,
    skip: Notify,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: EventBus,
}

impl QueueManager {
    pub fn new(config: QueueConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                current: None,
                dedup: HashMap::new(),
                rate: HashMap::new(),
            }),
            wake: Notify::new(),
            skip: Notify::new(),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            events,
        })
    }

    /// Estimated playback duration for `text` at `speed`. Replaceable
    /// policy heuristic; there is no real-audio feedback.
    pub fn estimate_duration_ms(&self, text: &str, speed: f32) -> u64 {
        let chars = text.chars().count() as f32;
        let speed = speed.clamp(0.25, 4.0);
        (chars * self.config.ms_per_char as f32 / speed) as u64 + self.config.playback_buffer_ms
    }

    /// Try to accept a synthesized item. Checks, in order: duplicate
    /// content, per-user rate limit, capacity.
    pub fn enqueue(&self, new: NewSpeech) -> Result<Enqueued, EnqueueRejection> {
        let now = Instant::now();
        let dedup_window = Duration::from_secs(self.config.dedup_window_secs);
        let rate_window = Duration::from_secs(self.config.rate_limit_window_secs);
        let hash = content_hash(&new.user_id, &new.text);

        let mut state = self.state.lock();

        // (a) duplicate content
        state
            .dedup
            .retain(|_, accepted| now.duration_since(*accepted) < dedup_window);
        if state.dedup.contains_key(&hash) {
            debug!(user_id = %new.user_id, "rejecting duplicate content");
            return Err(EnqueueRejection::DuplicateContent);
        }

        // (b) per-user rate limit
        let timestamps = state.rate.entry(new.user_id.clone()).or_default();
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= rate_window)
        {
            timestamps.pop_front();
        }
        if timestamps.len() >= self.config.rate_limit_max as usize {
            let oldest = *timestamps.front().expect("non-empty window");
            let retry_after = rate_window.saturating_sub(now.duration_since(oldest));
            let retry_after_secs = retry_after.as_secs().max(1);
            debug!(user_id = %new.user_id, retry_after_secs, "rate limiting user");
            return Err(EnqueueRejection::RateLimited { retry_after_secs });
        }

        // (c) capacity
        if state.items.len() >= self.config.max_size {
            warn!(capacity = self.config.max_size, "queue full");
            return Err(EnqueueRejection::QueueFull {
                capacity: self.config.max_size,
            });
        }

        // Accepted: record dedup + rate, insert, compute position
        state.dedup.insert(hash, now);
        state
            .rate
            .get_mut(&new.user_id)
            .expect("entry created above")
            .push_back(now);

        let priority = compute_priority(
            new.source,
            new.team_level,
            new.is_subscriber,
            new.priority_override,
        );
        let item = QueueItem {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            username: new.username,
            text: new.text,
            voice: new.voice,
            engine: new.engine,
            audio: new.audio,
            priority,
            enqueued_at: unix_now(),
            source: new.source,
            team_level: new.team_level,
            volume: new.volume,
            speed: new.speed,
        };
        let id = item.id;
        let estimate_of_current = state
            .current
            .as_ref()
            .map(|c| c.estimated_duration_ms)
            .unwrap_or(0);
        state.items.push(item);
        // Stable sort: descending priority, FIFO within equal priorities
        state.items.sort_by_key(|i| std::cmp::Reverse(i.priority));

        let position = state
            .items
            .iter()
            .position(|i| i.id == id)
            .expect("just inserted")
            + 1;
        let estimated_wait_ms = estimate_of_current
            + state.items[..position - 1]
                .iter()
                .map(|i| self.estimate_duration_ms(&i.text, i.speed))
                .sum::<u64>();
        let queue_size = state.items.len();
        drop(state);

        self.wake.notify_one();
        Ok(Enqueued {
            id,
            position,
            queue_size,
            estimated_wait_ms,
        })
    }

    /// Pop the highest-priority item, re-sorting first.
    fn pop_next(&self) -> Option<QueueItem> {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            return None;
        }
        state.items.sort_by_key(|i| std::cmp::Reverse(i.priority));
        Some(state.items.remove(0))
    }

    /// Number of waiting items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The item currently occupying the playback slot.
    pub fn current(&self) -> Option<CurrentItem> {
        self.state.lock().current.clone()
    }

    /// The next `n` waiting items in playback order.
    pub fn upcoming(&self, n: usize) -> Vec<QueueItem> {
        let mut state = self.state.lock();
        state.items.sort_by_key(|i| std::cmp::Reverse(i.priority));
        state.items.iter().take(n).cloned().collect()
    }

    /// Empty the queue and the dedup cache. Cleared content can be re-said
    /// immediately. Returns the number of dropped items.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.dedup.clear();
        drop(state);
        info!(dropped, "queue cleared");
        self.events.emit(PipelineEvent::queue(PipelineStage::QueueCleared, None));
        dropped
    }

    /// Abandon the in-flight item without waiting out its estimated
    /// duration. Does not abort synthesis already issued.
    pub fn skip_current(&self) {
        if self.state.lock().current.is_some() {
            info!("skipping current item");
            self.skip.notify_waiters();
        }
    }

    /// Spawn the playback worker. Idempotent.
    pub fn start(self: &Arc<Self>, sink: Arc<dyn PlaybackSink>) {
        let mut guard = self.worker.lock();
        if guard.is_some() {
            return;
        }
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            debug!("playback worker started");
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => {
                        debug!("playback worker shutting down");
                        break;
                    }
                    _ = async {
                        let Some(item) = manager.pop_next() else {
                            manager.wake.notified().await;
                            return;
                        };
                        manager.play_one(item, sink.as_ref()).await;
                    } => {}
                }
            }
        });
        *guard = Some(handle);
    }

    async fn play_one(&self, item: QueueItem, sink: &dyn PlaybackSink) {
        let estimated_duration_ms = self.estimate_duration_ms(&item.text, item.speed);
        {
            let mut state = self.state.lock();
            state.current = Some(CurrentItem {
                id: item.id,
                user_id: item.user_id.clone(),
                username: item.username.clone(),
                text: item.text.clone(),
                voice: item.voice.clone(),
                engine: item.engine,
                started_at: unix_now(),
                estimated_duration_ms,
            });
        }
        self.events.emit(PipelineEvent::queue(
            PipelineStage::PlaybackStarted,
            Some(item.id),
        ));

        sink.play(PlaybackPayload {
            item_id: item.id,
            audio: item.audio.clone(),
            voice: item.voice.clone(),
            engine: item.engine,
            volume: item.volume,
            speed: item.speed,
            ducking: DuckingHints::default(),
        })
        .await;

        // Pace playback: one slot, no overlap. Skip cuts the wait short.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(estimated_duration_ms)) => {
                self.events.emit(PipelineEvent::queue(
                    PipelineStage::PlaybackFinished,
                    Some(item.id),
                ));
            }
            _ = self.skip.notified() => {
                self.events.emit(PipelineEvent::queue(
                    PipelineStage::PlaybackSkipped,
                    Some(item.id),
                ));
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.state.lock().current = None;
    }

    /// Stop the worker. The queue contents survive; call [`Self::clear`]
    /// separately to drop them.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}
