//! Per-user permission records and access decisions.
//!
//! Resolution order, first match wins: blacklisted → deny; assigned voice →
//! allow (bypasses team gating); allow flag → allow; team level ≥ minimum →
//! allow; otherwise deny. Unknown users are auto-created with TTS disabled on
//! first contact. Decisions are cached for a short TTL and the cache is
//! cleared wholesale on any mutation, so admin actions take effect at once.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::store::{RecordStore, StoreResult};
use crate::core::tts::Engine;

/// How long a permission decision stays cached.
const DECISION_TTL: Duration = Duration::from_secs(60);

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Durable per-user permission record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: String,
    pub username: String,
    /// Explicit whitelist flag
    pub allow_tts: bool,
    /// Admin-assigned voice; implies `allow_tts`
    pub assigned_voice_id: Option<String>,
    pub assigned_engine: Option<Engine>,
    /// Preferred language, used as the detection fallback for this user
    pub language_preference: Option<String>,
    /// Multiplier applied to the base playback volume
    pub volume_gain: f32,
    pub is_blacklisted: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl UserPermission {
    pub fn new(user_id: &str, username: &str) -> Self {
        let now = unix_now();
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            allow_tts: false,
            assigned_voice_id: None,
            assigned_engine: None,
            language_preference: None,
            volume_gain: 1.0,
            is_blacklisted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

/// Why a permission check resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionReason {
    Blacklisted,
    VoiceAssigned,
    Whitelisted,
    TeamLevel,
    TeamLevelInsufficient,
}

impl PermissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionReason::Blacklisted => "blacklisted",
            PermissionReason::VoiceAssigned => "voice_assigned",
            PermissionReason::Whitelisted => "whitelisted",
            PermissionReason::TeamLevel => "team_level",
            PermissionReason::TeamLevelInsufficient => "team_level_insufficient",
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: PermissionReason,
    /// Attached on team-level denials
    pub required_level: Option<u8>,
    pub actual_level: Option<u8>,
}

pub struct PermissionManager {
    store: Arc<dyn RecordStore>,
    decisions: Cache<(String, u8, u8), PermissionDecision>,
}

impl PermissionManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            decisions: Cache::builder()
                .max_capacity(4096)
                .time_to_live(DECISION_TTL)
                .build(),
        }
    }

    /// Fetch a user's record, creating the default (no TTS) record on first
    /// contact.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        username: &str,
    ) -> StoreResult<UserPermission> {
        if let Some(record) = self.store.get_user(user_id).await? {
            return Ok(record);
        }
        let record = UserPermission::new(user_id, username);
        debug!(user_id, username, "auto-creating permission record");
        self.store.put_user(record.clone()).await?;
        Ok(record)
    }

    /// Check whether a user may trigger speech.
    pub async fn check_permission(
        &self,
        user_id: &str,
        username: &str,
        team_level: u8,
        min_team_level: u8,
    ) -> StoreResult<PermissionDecision> {
        let key = (user_id.to_string(), team_level, min_team_level);
        if let Some(cached) = self.decisions.get(&key) {
            return Ok(cached);
        }

        let record = self.get_or_create(user_id, username).await?;
        let decision = Self::resolve(&record, team_level, min_team_level);
        self.decisions.insert(key, decision.clone());
        Ok(decision)
    }

    fn resolve(record: &UserPermission, team_level: u8, min_team_level: u8) -> PermissionDecision {
        if record.is_blacklisted {
            return PermissionDecision {
                allowed: false,
                reason: PermissionReason::Blacklisted,
                required_level: None,
                actual_level: None,
            };
        }
        if record.assigned_voice_id.is_some() {
            return PermissionDecision {
                allowed: true,
                reason: PermissionReason::VoiceAssigned,
                required_level: None,
                actual_level: None,
            };
        }
        if record.allow_tts {
            return PermissionDecision {
                allowed: true,
                reason: PermissionReason::Whitelisted,
                required_level: None,
                actual_level: None,
            };
        }
        if team_level >= min_team_level {
            return PermissionDecision {
                allowed: true,
                reason: PermissionReason::TeamLevel,
                required_level: None,
                actual_level: None,
            };
        }
        PermissionDecision {
            allowed: false,
            reason: PermissionReason::TeamLevelInsufficient,
            required_level: Some(min_team_level),
            actual_level: Some(team_level),
        }
    }

    async fn mutate<F>(&self, user_id: &str, username: &str, apply: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut UserPermission),
    {
        let mut record = self.get_or_create(user_id, username).await?;
        apply(&mut record);
        record.touch();
        self.store.put_user(record).await?;
        self.decisions.invalidate_all();
        Ok(true)
    }

    // Admin operations. All are idempotent upserts; each clears the decision
    // cache wholesale.

    pub async fn allow(&self, user_id: &str, username: &str) -> StoreResult<bool> {
        info!(user_id, "allowing TTS");
        self.mutate(user_id, username, |r| r.allow_tts = true).await
    }

    pub async fn deny(&self, user_id: &str, username: &str) -> StoreResult<bool> {
        info!(user_id, "denying TTS");
        self.mutate(user_id, username, |r| {
            r.allow_tts = false;
            r.assigned_voice_id = None;
            r.assigned_engine = None;
        })
        .await
    }

    pub async fn blacklist(&self, user_id: &str, username: &str) -> StoreResult<bool> {
        info!(user_id, "blacklisting user");
        self.mutate(user_id, username, |r| r.is_blacklisted = true)
            .await
    }

    pub async fn unblacklist(&self, user_id: &str, username: &str) -> StoreResult<bool> {
        info!(user_id, "unblacklisting user");
        self.mutate(user_id, username, |r| r.is_blacklisted = false)
            .await
    }

    /// Assign a voice. An assignment implies the user may speak, so the
    /// allow flag is set alongside it.
    pub async fn assign_voice(
        &self,
        user_id: &str,
        username: &str,
        engine: Engine,
        voice_id: &str,
    ) -> StoreResult<bool> {
        info!(user_id, %engine, voice_id, "assigning voice");
        self.mutate(user_id, username, |r| {
            r.assigned_voice_id = Some(voice_id.to_string());
            r.assigned_engine = Some(engine);
            r.allow_tts = true;
        })
        .await
    }

    pub async fn remove_voice_assignment(
        &self,
        user_id: &str,
        username: &str,
    ) -> StoreResult<bool> {
        info!(user_id, "removing voice assignment");
        self.mutate(user_id, username, |r| {
            r.assigned_voice_id = None;
            r.assigned_engine = None;
        })
        .await
    }

    pub async fn set_language_preference(
        &self,
        user_id: &str,
        username: &str,
        language: Option<&str>,
    ) -> StoreResult<bool> {
        self.mutate(user_id, username, |r| {
            r.language_preference = language.map(|l| l.to_string());
        })
        .await
    }

    pub async fn set_volume_gain(
        &self,
        user_id: &str,
        username: &str,
        gain: f32,
    ) -> StoreResult<bool> {
        let gain = gain.clamp(0.0, 2.0);
        self.mutate(user_id, username, |r| r.volume_gain = gain).await
    }

    pub async fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        info!(user_id, "deleting permission record");
        let existed = self.store.delete_user(user_id).await?;
        self.decisions.invalidate_all();
        Ok(existed)
    }

    pub async fn list_users(&self) -> StoreResult<Vec<UserPermission>> {
        self.store.list_users().await
    }
}
