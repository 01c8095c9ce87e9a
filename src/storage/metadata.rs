//! Replay metadata
//!
//! [`GameInfo`] is written as the JSON sidecar while a game is captured and
//! becomes the first line of the archive blob. Relational storage lives
//! behind [`ReplayMetadataStore`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Metadata describing one archived game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    #[serde(rename = "uid")]
    pub game_id: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub complete: bool,
    pub desynced: bool,
    pub ticks: u32,
    #[serde(default)]
    pub max_watchers: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_mod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapname: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub featured_mod_versions: BTreeMap<String, u32>,

    /// Any other fields supplied by the metadata store
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GameInfo {
    /// Metadata for a game that just started
    pub fn new(game_id: u64) -> Self {
        Self {
            game_id,
            started_at: Utc::now(),
            ended_at: None,
            complete: false,
            desynced: false,
            ticks: 0,
            max_watchers: 0,
            featured_mod: None,
            game_type: None,
            title: None,
            mapname: None,
            featured_mod_versions: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the store still has to fill in lobby details
    pub fn needs_enrichment(&self) -> bool {
        self.featured_mod.is_none()
    }

    /// Merge lobby details from the metadata store
    ///
    /// Stream-derived fields (ticks, flags, times) are never overwritten.
    pub fn merge_enrichment(&mut self, other: GameInfo) {
        if other.featured_mod.is_some() {
            self.featured_mod = other.featured_mod;
        }
        if other.game_type.is_some() {
            self.game_type = other.game_type;
        }
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.mapname.is_some() {
            self.mapname = other.mapname;
        }
        self.featured_mod_versions
            .extend(other.featured_mod_versions);
        self.extra.extend(other.extra);
    }
}

/// External relational metadata storage
pub trait ReplayMetadataStore: Send + Sync + 'static {
    /// Lobby details for a game, if the store knows it
    fn get_game_info(
        &self,
        game_id: u64,
    ) -> impl Future<Output = Result<Option<GameInfo>, StorageError>> + Send;

    /// Record an archived replay
    ///
    /// May be called again for the same game after a crash; implementations
    /// should upsert keyed by game id.
    fn insert_replay(
        &self,
        info: &GameInfo,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// In-process metadata store
///
/// Replays are upserted by game id, so re-running persistence never creates
/// a second record.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    games: Mutex<HashMap<u64, GameInfo>>,
    replays: Mutex<HashMap<u64, GameInfo>>,
    inserts: AtomicUsize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed lobby details returned by `get_game_info`
    pub fn with_game(self, info: GameInfo) -> Self {
        self.games
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.game_id, info);
        self
    }

    /// Stored replay record for a game
    pub fn replay(&self, game_id: u64) -> Option<GameInfo> {
        self.replays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&game_id)
            .cloned()
    }

    /// Number of distinct replay records
    pub fn replay_count(&self) -> usize {
        self.replays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of `insert_replay` calls, including repeats
    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::Relaxed)
    }
}

impl ReplayMetadataStore for MemoryMetadataStore {
    async fn get_game_info(&self, game_id: u64) -> Result<Option<GameInfo>, StorageError> {
        tracing::debug!(game_id = game_id, "Get game info from metadata store");
        Ok(self
            .games
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&game_id)
            .cloned())
    }

    async fn insert_replay(&self, info: &GameInfo) -> Result<(), StorageError> {
        tracing::debug!(game_id = info.game_id, "Insert replay into metadata store");
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.replays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.game_id, info.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(game_id: u64) -> GameInfo {
        let mut info = GameInfo::new(game_id);
        info.featured_mod = Some("faf".into());
        info.title = Some("4v4 full share".into());
        info.mapname = Some("setons_clutch".into());
        info.featured_mod_versions.insert("1".into(), 3758);
        info.extra
            .insert("num_players".into(), serde_json::Value::from(8));
        info
    }

    #[test]
    fn test_json_field_names() {
        let mut info = GameInfo::new(77);
        info.ticks = 1200;
        info.desynced = true;

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["uid"], 77);
        assert_eq!(json["ticks"], 1200);
        assert_eq!(json["desynced"], true);
        assert!(json.get("featured_mod").is_none());

        let back: GameInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_extra_fields_survive() {
        let info = lobby(5);
        let text = serde_json::to_string(&info).unwrap();
        let back: GameInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(back.extra["num_players"], 8);
        assert_eq!(back.featured_mod_versions.get("1"), Some(&3758));
    }

    #[test]
    fn test_merge_keeps_stream_fields() {
        let mut info = GameInfo::new(5);
        info.ticks = 900;
        info.complete = true;
        assert!(info.needs_enrichment());

        let mut ext = lobby(5);
        ext.ticks = 0;
        ext.complete = false;
        info.merge_enrichment(ext);

        assert!(!info.needs_enrichment());
        assert_eq!(info.ticks, 900);
        assert!(info.complete);
        assert_eq!(info.title.as_deref(), Some("4v4 full share"));
        assert_eq!(info.extra["num_players"], 8);
    }

    #[tokio::test]
    async fn test_memory_store_upserts() {
        let store = MemoryMetadataStore::new().with_game(lobby(9));

        assert!(store.get_game_info(9).await.unwrap().is_some());
        assert!(store.get_game_info(10).await.unwrap().is_none());

        let mut info = GameInfo::new(9);
        store.insert_replay(&info).await.unwrap();
        info.ticks = 10;
        store.insert_replay(&info).await.unwrap();

        assert_eq!(store.insert_calls(), 2);
        assert_eq!(store.replay_count(), 1);
        assert_eq!(store.replay(9).map(|r| r.ticks), Some(10));
    }
}
