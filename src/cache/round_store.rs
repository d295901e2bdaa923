//! Persisted round baselines and last-good round views.

use crate::cache::keys;
use crate::cache::store::{KvStore, StoreError, get_json, set_json};
use broadcast_api::GameRecord;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct RoundStore {
    store: Arc<dyn KvStore>,
    slug: String,
    baselines: BTreeMap<u32, Vec<GameRecord>>,
    loaded: bool,
}

impl RoundStore {
    pub fn new(store: Arc<dyn KvStore>, slug: impl Into<String>) -> Self {
        Self { store, slug: slug.into(), baselines: BTreeMap::new(), loaded: false }
    }

    async fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        let key = keys::tournament_games_cache(&self.slug);
        if let Some(baselines) = get_json::<BTreeMap<u32, Vec<GameRecord>>>(self.store.as_ref(), &key).await {
            debug!("loaded {} round baselines from {key}", baselines.len());
            self.baselines = baselines;
        }
    }

    pub async fn baseline(&mut self, round: u32) -> Option<Vec<GameRecord>> {
        self.ensure_loaded().await;
        self.baselines.get(&round).cloned()
    }

    /// Replace a round's baseline wholesale and persist every baseline.
    pub async fn set_baseline(&mut self, round: u32, games: Vec<GameRecord>) -> Result<(), StoreError> {
        self.ensure_loaded().await;
        info!("round {round} baseline established with {} games", games.len());
        self.baselines.insert(round, games);
        set_json(self.store.as_ref(), &keys::tournament_games_cache(&self.slug), &self.baselines).await
    }

    pub async fn save_snapshot(&self, round: u32, games: &[GameRecord]) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &keys::round_ui_cache(&self.slug, round), games).await
    }

    pub async fn load_snapshot(&self, round: u32) -> Option<Vec<GameRecord>> {
        get_json::<Vec<GameRecord>>(self.store.as_ref(), &keys::round_ui_cache(&self.slug, round))
            .await
            .filter(|games| !games.is_empty())
    }

    pub async fn invalidate_round(&mut self, round: u32) -> Result<(), StoreError> {
        self.ensure_loaded().await;
        if self.baselines.remove(&round).is_some() {
            set_json(self.store.as_ref(), &keys::tournament_games_cache(&self.slug), &self.baselines).await?;
        }
        self.store.remove(&keys::round_ui_cache(&self.slug, round)).await
    }

    pub async fn invalidate_all(&mut self) -> Result<(), StoreError> {
        self.baselines.clear();
        self.loaded = true;
        self.store.remove(&keys::tournament_games_cache(&self.slug)).await?;
        for key in self.store.keys_with_prefix(&keys::round_ui_cache_prefix(&self.slug)).await? {
            self.store.remove(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::FileStore;

    fn games(round: u32, n: u32) -> Vec<GameRecord> {
        (1..=n)
            .map(|b| GameRecord::new(round, b, &format!("W{b}"), &format!("B{b}")))
            .collect()
    }

    #[tokio::test]
    async fn baselines_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KvStore> = Arc::new(FileStore::new(dir.path()));

        let mut rounds = RoundStore::new(store.clone(), "tata");
        assert!(rounds.baseline(1).await.is_none());
        rounds.set_baseline(1, games(1, 4)).await.unwrap();
        rounds.set_baseline(2, games(2, 3)).await.unwrap();
        rounds.save_snapshot(2, &games(2, 3)).await.unwrap();

        let mut reopened = RoundStore::new(store.clone(), "tata");
        assert_eq!(reopened.baseline(1).await.map(|g| g.len()), Some(4));
        assert_eq!(reopened.load_snapshot(2).await.map(|g| g.len()), Some(3));

        reopened.invalidate_round(2).await.unwrap();
        assert!(reopened.baseline(2).await.is_none());
        assert!(reopened.load_snapshot(2).await.is_none());
        assert!(reopened.baseline(1).await.is_some());

        reopened.invalidate_all().await.unwrap();
        let mut empty = RoundStore::new(store, "tata");
        assert!(empty.baseline(1).await.is_none());
    }
}
