// Persistence contract: a plain key-value store, plus typed accessors for the
// records a session keeps so it can be resumed after a reload.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::model::{PlayerId, TruthSet};
use crate::engine::progression::{GameState, LobbySettings};
use crate::error::StoreError;

pub const GAME_STATE_KEY: &str = "2tai_game_state";
pub const TRUTH_INPUTS_KEY: &str = "2tai_truth_inputs";
pub const TRUTH_INPUTS_PLAYER_KEY: &str = "2tai_truth_inputs_player";
pub const LOBBY_SETTINGS_KEY: &str = "2tai_lobby_settings";
pub const APP_SETTINGS_KEY: &str = "2tai_app_settings";

pub fn session_key(prefix: &str, session_id: Uuid) -> String {
    format!("{prefix}:{session_id}")
}

pub trait KeyValueStore: Send + Sync {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>>;
    fn save<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StoreError>>;
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// In-process store, used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        async move { Ok(self.entries.read().await.get(key).cloned()) }.boxed()
    }

    fn save<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.entries.write().await.insert(key.to_string(), value);
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.entries.write().await.remove(key);
            Ok(())
        }
        .boxed()
    }
}

/// Preferences shared by every game on this install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub theme: String,
    pub bg_music: String,
    pub master_volume: f32,
    pub bg_music_volume: f32,
    pub sfx_volume: f32,
    pub sfx_enabled: bool,
    pub sfx_file: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: "theme-default".into(),
            bg_music: "bloop-vibes.mp3".into(),
            master_volume: 0.2,
            bg_music_volume: 0.2,
            sfx_volume: 0.2,
            sfx_enabled: true,
            sfx_file: "button-click.mp3".into(),
        }
    }
}

impl AppSettings {
    /// Clamp volumes into 0..=1.
    pub fn normalized(mut self) -> Self {
        for v in [
            &mut self.master_volume,
            &mut self.bg_music_volume,
            &mut self.sfx_volume,
        ] {
            *v = if v.is_finite() { (*v).clamp(0.0, 1.0) } else { 0.0 };
        }
        self
    }
}

/// Truth sets typed so far, per player, before they are submitted.
pub type TruthDrafts = BTreeMap<PlayerId, Vec<TruthSet>>;

/// Typed view over a [`KeyValueStore`].
///
/// Unreadable records are treated as absent: a stale or corrupt save must not
/// keep a session from starting over.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.kv.load(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, "Discarding unreadable record: {e}");
                Ok(None)
            }
        }
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.kv.save(key, raw).await
    }

    // ── Game state ───────────────────────────────────────────────────

    pub async fn load_game(&self, session_id: Uuid) -> Result<Option<GameState>, StoreError> {
        self.load_json(&session_key(GAME_STATE_KEY, session_id))
            .await
    }

    pub async fn save_game(&self, session_id: Uuid, game: &GameState) -> Result<(), StoreError> {
        self.save_json(&session_key(GAME_STATE_KEY, session_id), game)
            .await
    }

    // ── Truth entry drafts ───────────────────────────────────────────

    pub async fn load_truth_drafts(&self, session_id: Uuid) -> Result<TruthDrafts, StoreError> {
        Ok(self
            .load_json(&session_key(TRUTH_INPUTS_KEY, session_id))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_truth_drafts(
        &self,
        session_id: Uuid,
        drafts: &TruthDrafts,
    ) -> Result<(), StoreError> {
        self.save_json(&session_key(TRUTH_INPUTS_KEY, session_id), drafts)
            .await
    }

    /// Index of the player whose truths are being typed.
    pub async fn load_draft_player(&self, session_id: Uuid) -> Result<usize, StoreError> {
        Ok(self
            .load_json(&session_key(TRUTH_INPUTS_PLAYER_KEY, session_id))
            .await?
            .unwrap_or(0))
    }

    pub async fn save_draft_player(&self, session_id: Uuid, index: usize) -> Result<(), StoreError> {
        self.save_json(&session_key(TRUTH_INPUTS_PLAYER_KEY, session_id), &index)
            .await
    }

    pub async fn clear_drafts(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.kv
            .remove(&session_key(TRUTH_INPUTS_KEY, session_id))
            .await?;
        self.kv
            .remove(&session_key(TRUTH_INPUTS_PLAYER_KEY, session_id))
            .await
    }

    /// Forget everything a session stored.
    pub async fn clear_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.clear_drafts(session_id).await?;
        self.kv
            .remove(&session_key(GAME_STATE_KEY, session_id))
            .await
    }

    // ── Cross-game settings ──────────────────────────────────────────

    pub async fn load_lobby_settings(&self) -> Result<Option<LobbySettings>, StoreError> {
        Ok(self
            .load_json::<LobbySettings>(LOBBY_SETTINGS_KEY)
            .await?
            .filter(|s| s.validate().is_ok()))
    }

    pub async fn save_lobby_settings(&self, settings: &LobbySettings) -> Result<(), StoreError> {
        self.save_json(LOBBY_SETTINGS_KEY, settings).await
    }

    pub async fn load_app_settings(&self) -> Result<AppSettings, StoreError> {
        Ok(self
            .load_json::<AppSettings>(APP_SETTINGS_KEY)
            .await?
            .unwrap_or_default()
            .normalized())
    }

    pub async fn save_app_settings(&self, settings: &AppSettings) -> Result<(), StoreError> {
        self.save_json(APP_SETTINGS_KEY, settings).await
    }
}
