//! Two-tier preview cache keyed by tournament, round and game row key.
//!
//! The memory tier is read synchronously while rendering. Writes to the
//! persisted tier go through the debouncer and are skipped when the round's
//! content hash has not changed since the last write.

use crate::cache::debounce::{DEFAULT_DELAY, Debouncer};
use crate::cache::keys;
use crate::cache::store::{KvStore, StoreError, get_json};
use broadcast_api::{GameRecord, GameResult};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewCacheEntry {
    pub preview_fen: Option<String>,
    pub last_move: Option<String>,
    #[serde(default)]
    pub result: Option<GameResult>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PreviewCacheEntry {
    fn from_game(game: &GameRecord) -> Option<Self> {
        if game.preview_fen.is_none() && game.result().is_none() {
            return None;
        }
        Some(Self {
            preview_fen: game.preview_fen.clone(),
            last_move: game.preview_last_move.clone().or_else(|| game.last_move.clone()),
            result: game.result(),
            updated_at: game.updated_at,
        })
    }
}

/// Row key → entry, ordered so serialization (and its hash) is stable.
pub type RoundPreviews = BTreeMap<String, PreviewCacheEntry>;

fn content_hash(serialized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

pub struct PreviewCache {
    store: Arc<dyn KvStore>,
    debouncer: Debouncer,
    memory: HashMap<String, RoundPreviews>,
    saved_hashes: HashMap<String, u64>,
    hydration_attempts: HashSet<(String, u32)>,
    /// Round IDs whose mirror key was written, per tournament.
    mirrored: HashMap<String, BTreeSet<String>>,
}

impl PreviewCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let debouncer = Debouncer::new(store.clone(), DEFAULT_DELAY);
        Self::with_debouncer(store, debouncer)
    }

    pub fn with_debouncer(store: Arc<dyn KvStore>, debouncer: Debouncer) -> Self {
        Self {
            store,
            debouncer,
            memory: HashMap::new(),
            saved_hashes: HashMap::new(),
            hydration_attempts: HashSet::new(),
            mirrored: HashMap::new(),
        }
    }

    pub fn get(&self, tournament_key: &str, round: u32) -> Option<&RoundPreviews> {
        self.memory.get(&keys::preview_fen_cache(tournament_key, round))
    }

    pub fn entry(&self, tournament_key: &str, round: u32, row_key: &str) -> Option<&PreviewCacheEntry> {
        self.get(tournament_key, round)?.get(row_key)
    }

    /// Fold a round's computed previews into memory and schedule a persisted
    /// write when the content changed. Returns whether a write was scheduled.
    pub fn record_round(
        &mut self,
        tournament_key: &str,
        round: u32,
        round_id: Option<&str>,
        games: &[GameRecord],
    ) -> bool {
        let key = keys::preview_fen_cache(tournament_key, round);
        let previews = self.memory.entry(key.clone()).or_default();
        for game in games.iter().filter(|g| g.round == round) {
            if let Some(entry) = PreviewCacheEntry::from_game(game) {
                previews.insert(game.row_key(), entry);
            }
        }
        if previews.is_empty() {
            return false;
        }

        let serialized = match serde_json::to_string(&*previews) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not serialize previews for {key}: {e}");
                return false;
            }
        };
        let hash = content_hash(&serialized);
        if self.saved_hashes.get(&key) == Some(&hash) {
            return false;
        }
        self.saved_hashes.insert(key.clone(), hash);

        if let Some(round_id) = round_id.filter(|id| !id.is_empty()) {
            self.mirrored.entry(tournament_key.to_string()).or_default().insert(round_id.to_string());
            self.debouncer.schedule(keys::preview_fen_by_round(round_id), serialized.clone());
        }
        self.debouncer.schedule(key, serialized);
        true
    }

    /// Read a round from the persisted tier, by tournament key then by round ID.
    pub async fn load(
        store: &dyn KvStore,
        tournament_key: &str,
        round: u32,
        round_id: Option<&str>,
    ) -> Option<RoundPreviews> {
        let by_key: Option<RoundPreviews> =
            get_json(store, &keys::preview_fen_cache(tournament_key, round)).await;
        if let Some(previews) = by_key.filter(|p| !p.is_empty()) {
            return Some(previews);
        }
        let round_id = round_id.filter(|id| !id.is_empty())?;
        get_json::<RoundPreviews>(store, &keys::preview_fen_by_round(round_id))
            .await
            .filter(|p| !p.is_empty())
    }

    /// Install previews that came from the persisted tier or a PGN hydration.
    /// Existing memory entries win. Rows read back from the persisted tier are
    /// marked saved; PGN-derived rows are written on the next `record_round`.
    pub fn insert_loaded(&mut self, tournament_key: &str, round: u32, loaded: RoundPreviews, persisted: bool) {
        let key = keys::preview_fen_cache(tournament_key, round);
        let previews = self.memory.entry(key.clone()).or_default();
        let before = previews.len();
        for (row_key, entry) in loaded {
            previews.entry(row_key).or_insert(entry);
        }
        if previews.len() == before || !persisted {
            return;
        }
        if let Ok(serialized) = serde_json::to_string(&*previews) {
            self.saved_hashes.insert(key, content_hash(&serialized));
        }
    }

    /// Check-and-set: true only for the first caller per `(tournament, round)`.
    pub fn begin_hydration(&mut self, tournament_key: &str, round: u32) -> bool {
        self.hydration_attempts.insert((tournament_key.to_string(), round))
    }

    /// Fill missing previews, and results for games that are not live, from
    /// cached entries. Returns how many games changed.
    pub fn apply_to_games(&self, tournament_key: &str, round: u32, games: &mut [GameRecord]) -> usize {
        let Some(previews) = self.get(tournament_key, round) else {
            return 0;
        };
        let mut applied = 0;
        for game in games.iter_mut() {
            let Some(entry) = previews.get(&game.row_key()) else {
                continue;
            };
            let mut changed = false;
            if game.preview_fen.is_none() && entry.preview_fen.is_some() {
                game.preview_fen = entry.preview_fen.clone();
                game.preview_last_move = entry.last_move.clone();
                changed = true;
            }
            if let Some(result) = entry.result
                && !game.is_finished()
                && !game.is_live
            {
                game.finish(result);
                changed = true;
            }
            if changed {
                applied += 1;
            }
        }
        applied
    }

    pub async fn invalidate_round(
        &mut self,
        tournament_key: &str,
        round: u32,
        round_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = keys::preview_fen_cache(tournament_key, round);
        debug!("invalidating {key}");
        self.memory.remove(&key);
        self.saved_hashes.remove(&key);
        self.hydration_attempts.remove(&(tournament_key.to_string(), round));
        self.debouncer.cancel(&key);
        self.store.remove(&key).await?;
        if let Some(round_id) = round_id.filter(|id| !id.is_empty()) {
            if let Some(ids) = self.mirrored.get_mut(tournament_key) {
                ids.remove(round_id);
            }
            let mirror = keys::preview_fen_by_round(round_id);
            self.debouncer.cancel(&mirror);
            self.store.remove(&mirror).await?;
        }
        Ok(())
    }

    /// Drop every round of a tournament, including the round-ID mirrors of
    /// `round_ids` and of every round this cache mirrored itself.
    pub async fn invalidate_tournament(
        &mut self,
        tournament_key: &str,
        round_ids: impl IntoIterator<Item = String>,
    ) -> Result<usize, StoreError> {
        let prefix = keys::preview_fen_cache_prefix(tournament_key);
        self.memory.retain(|k, _| !k.starts_with(&prefix));
        self.saved_hashes.retain(|k, _| !k.starts_with(&prefix));
        self.hydration_attempts.retain(|(t, _)| t != tournament_key);
        self.debouncer.cancel_prefix(&prefix);

        let mut mirrored = self.mirrored.remove(tournament_key).unwrap_or_default();
        mirrored.extend(round_ids.into_iter().filter(|id| !id.is_empty()));
        for round_id in &mirrored {
            let mirror = keys::preview_fen_by_round(round_id);
            self.debouncer.cancel(&mirror);
            self.store.remove(&mirror).await?;
        }

        let persisted = self.store.keys_with_prefix(&prefix).await?;
        for key in &persisted {
            self.store.remove(key).await?;
        }
        Ok(persisted.len())
    }

    pub async fn flush(&self) -> usize {
        self.debouncer.flush().await
    }
}

/// Build cache entries from games, e.g. a hydration PGN.
pub fn previews_from_games(games: &[GameRecord]) -> RoundPreviews {
    games
        .iter()
        .filter_map(|g| PreviewCacheEntry::from_game(g).map(|e| (g.row_key(), e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use std::time::Duration;

    fn game(board: u32, white: &str, black: &str) -> GameRecord {
        let mut game = GameRecord::new(2, board, white, black);
        game.preview_fen = Some(format!("8/8/8/8/8/8/8/{board}K6 w - - 0 40"));
        game.preview_last_move = Some("e2e4".into());
        game
    }

    #[tokio::test(start_paused = true)]
    async fn round_trips_through_persisted_tier() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut cache = PreviewCache::new(store.clone());
        let mut finished = game(1, "Magnus Carlsen", "Hikaru Nakamura");
        finished.finish(GameResult::WhiteWins);
        let games = vec![finished, game(2, "Wei Yi", "Anish Giri")];

        assert!(cache.record_round("tata", 2, Some("rid2"), &games));
        assert!(!cache.record_round("tata", 2, Some("rid2"), &games), "same content, no rewrite");
        tokio::time::sleep(Duration::from_secs(3)).await;

        let loaded = PreviewCache::load(store.as_ref(), "tata", 2, None).await.unwrap();
        assert_eq!(loaded.len(), 2);

        let mut fresh = PreviewCache::new(store.clone());
        fresh.insert_loaded("tata", 2, loaded, true);
        let mut rows = vec![
            GameRecord::new(2, 1, "Carlsen, Magnus", "Nakamura, Hikaru"),
            GameRecord::new(2, 2, "Wei Yi", "Anish Giri"),
        ];
        assert_eq!(fresh.apply_to_games("tata", 2, &mut rows), 2);
        assert_eq!(rows[0].result(), Some(GameResult::WhiteWins));
        assert_eq!(rows[1].preview_fen, games[1].preview_fen);

        store.remove(&keys::preview_fen_cache("tata", 2)).await.unwrap();
        let by_round_id = PreviewCache::load(store.as_ref(), "tata", 2, Some("rid2")).await;
        assert_eq!(by_round_id.map(|p| p.len()), Some(2));
    }

    #[tokio::test]
    async fn live_games_keep_their_state() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut cache = PreviewCache::new(store);
        let mut done = game(1, "A", "B");
        done.finish(GameResult::Draw);
        cache.record_round("t", 2, None, &[done]);

        let mut live = GameRecord::new(2, 1, "A", "B");
        live.mark_live();
        live.preview_fen = Some("8/8/8/8/8/8/8/K7 b - - 0 1".into());
        assert_eq!(cache.apply_to_games("t", 2, std::slice::from_mut(&mut live)), 0);
        assert!(live.is_live);
        assert_eq!(live.result(), None);
    }

    #[tokio::test]
    async fn hydration_is_attempted_once() {
        let mut cache = PreviewCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.begin_hydration("t", 3));
        assert!(!cache.begin_hydration("t", 3));
        assert!(cache.begin_hydration("t", 4));
    }

    #[tokio::test(start_paused = true)]
    async fn hydrated_rows_are_persisted_on_next_record() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut cache = PreviewCache::new(store.clone());
        let hydrated = previews_from_games(&[game(1, "A", "B")]);
        cache.insert_loaded("t", 2, hydrated, false);
        assert!(cache.entry("t", 2, &row_key_for("A", "B")).is_some());

        assert!(cache.record_round("t", 2, None, &[]));
        assert_eq!(cache.flush().await, 1);
        let stored = PreviewCache::load(store.as_ref(), "t", 2, None).await;
        assert_eq!(stored.map(|p| p.len()), Some(1));
    }

    fn row_key_for(white: &str, black: &str) -> String {
        GameRecord::new(2, 1, white, black).row_key()
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_clears_both_tiers() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut cache = PreviewCache::new(store.clone());
        for round in [1, 2] {
            let mut g = game(1, "A", "B");
            g.round = round;
            let round_id = format!("rid{round}");
            cache.record_round("t", round, Some(round_id.as_str()), &[g]);
        }
        store.set(&keys::preview_fen_by_round("rid9"), "{}").await.unwrap();
        assert_eq!(cache.flush().await, 4);
        cache.begin_hydration("t", 1);

        cache.invalidate_round("t", 1, Some("rid1")).await.unwrap();
        assert!(cache.get("t", 1).is_none());
        assert!(cache.get("t", 2).is_some());
        assert!(cache.begin_hydration("t", 1));
        assert_eq!(store.get(&keys::preview_fen_cache("t", 1)).await.unwrap(), None);
        assert_eq!(store.get(&keys::preview_fen_by_round("rid1")).await.unwrap(), None);

        assert_eq!(cache.invalidate_tournament("t", ["rid9".to_string()]).await.unwrap(), 1);
        assert!(cache.get("t", 2).is_none());
        assert!(store.keys_with_prefix("previewFenCache:t:").await.unwrap().is_empty());
        assert!(store.keys_with_prefix("previewFenByRound:").await.unwrap().is_empty());
        assert!(PreviewCache::load(store.as_ref(), "t", 2, Some("rid2")).await.is_none());
    }
}
