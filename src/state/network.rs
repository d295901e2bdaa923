use crate::cache::preview_cache::{PreviewCache, previews_from_games};
use crate::cache::round_store::RoundStore;
use crate::cache::store::KvStore;
use crate::state::messages::{NetworkRequest, NetworkResponse};
use anyhow::Context;
use broadcast_api::feed::{FeedFetcher, FeedSource};
use broadcast_api::merge::{merge, promote_on_completeness};
use broadcast_api::roster::Roster;
use broadcast_api::schedule::LiveStatus;
use broadcast_api::{GameRecord, pgn};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Everything a request needs to turn feed data into a merged round view.
pub struct Pipeline {
    pub fetcher: FeedFetcher,
    pub roster: Arc<Roster>,
    pub rounds: Mutex<RoundStore>,
    pub store: Arc<dyn KvStore>,
    pub tournament_key: String,
    pub broadcast_id: Option<String>,
    pub min_boards: usize,
}

impl Pipeline {
    pub async fn handle(&self, request: NetworkRequest) -> anyhow::Result<NetworkResponse> {
        match request {
            NetworkRequest::LoadRound { round, force } => self.load_round(round, force).await,
            NetworkRequest::ProbeLiveStatus => self.probe_live_status().await,
            NetworkRequest::HydrateRound { round, round_id } => self.hydrate_round(round, round_id).await,
            NetworkRequest::RefreshGame { round, game_id } => self.refresh_game(round, &game_id).await,
            NetworkRequest::InvalidateRound { round } => {
                self.rounds.lock().await.invalidate_round(round).await?;
                info!("round {round} invalidated, reloading");
                self.load_round(round, true).await
            }
            NetworkRequest::InvalidateTournament { round } => {
                self.rounds.lock().await.invalidate_all().await?;
                info!("{} cache cleared, reloading round {round}", self.tournament_key);
                self.load_round(round, true).await
            }
        }
    }

    /// Fetch, reconcile, promote a baseline when the feed looks complete,
    /// then merge live data over the last merged view of the round.
    async fn load_round(&self, round: u32, force: bool) -> anyhow::Result<NetworkResponse> {
        let fetched = self.fetcher.fetch_round_games(&self.tournament_key, round, force).await;
        let mut feed = match fetched {
            Ok(feed) => feed,
            Err(err) => {
                let snapshot = self.rounds.lock().await.load_snapshot(round).await;
                let Some(games) = snapshot else {
                    return Err(err).with_context(|| format!("loading round {round}"));
                };
                warn!("round {round}: {err}; serving persisted snapshot");
                return Ok(self.round_loaded(round, games, FeedSource::Cache, true, None));
            }
        };

        for game in feed.games.iter_mut() {
            self.roster.apply(game);
        }

        let mut rounds = self.rounds.lock().await;
        let mut baseline = rounds.baseline(round).await;
        if !feed.stale
            && let Some(promoted) = promote_on_completeness(baseline.as_deref(), &feed.games, self.min_boards)
        {
            if let Err(e) = rounds.set_baseline(round, promoted.clone()).await {
                warn!("could not persist round {round} baseline: {e}");
            }
            baseline = Some(promoted);
        }

        let previous = self.merged_view(&rounds, round, baseline.as_deref()).await;
        let games = merge(&previous, &feed.games);
        if !feed.stale
            && !games.is_empty()
            && let Err(e) = rounds.save_snapshot(round, &games).await
        {
            warn!("could not persist round {round} snapshot: {e}");
        }
        drop(rounds);

        debug!("round {round}: {} games from {}", games.len(), feed.source);
        Ok(self.round_loaded(round, games, feed.source, feed.stale, feed.round_id))
    }

    /// Baseline with the last persisted merge laid over it, so a poorer
    /// payload is always compared against the freshest known state.
    async fn merged_view(
        &self,
        rounds: &RoundStore,
        round: u32,
        baseline: Option<&[GameRecord]>,
    ) -> Vec<GameRecord> {
        let snapshot = rounds.load_snapshot(round).await;
        match (baseline, snapshot) {
            (Some(baseline), Some(snapshot)) => merge(baseline, &snapshot),
            (Some(baseline), None) => baseline.to_vec(),
            (None, Some(snapshot)) => snapshot,
            (None, None) => Vec::new(),
        }
    }

    fn round_loaded(
        &self,
        round: u32,
        games: Vec<GameRecord>,
        source: FeedSource,
        stale: bool,
        round_id: Option<String>,
    ) -> NetworkResponse {
        NetworkResponse::RoundLoaded {
            tournament_key: self.tournament_key.clone(),
            round,
            games,
            source,
            stale,
            round_id,
        }
    }

    async fn probe_live_status(&self) -> anyhow::Result<NetworkResponse> {
        let info = self.fetcher.fetch_tournament(&self.tournament_key).await?;
        let status = LiveStatus::from_tournament(&info, Utc::now().timestamp_millis());
        Ok(NetworkResponse::LiveStatusLoaded { tournament_key: self.tournament_key.clone(), info, status })
    }

    /// Persisted previews first; otherwise compute them from the tournament archive.
    async fn hydrate_round(&self, round: u32, round_id: Option<String>) -> anyhow::Result<NetworkResponse> {
        let persisted =
            PreviewCache::load(self.store.as_ref(), &self.tournament_key, round, round_id.as_deref()).await;
        if let Some(previews) = persisted {
            debug!("round {round}: {} previews from cache", previews.len());
            return Ok(NetworkResponse::RoundHydrated {
                tournament_key: self.tournament_key.clone(),
                round,
                previews,
                persisted: true,
                archive: Vec::new(),
            });
        }

        let tour_id = self
            .broadcast_id
            .as_deref()
            .with_context(|| format!("no cached previews for round {round} and no archive to compute them"))?;
        let (games, bytes) = self.fetcher.api().fetch_tournament_pgn(tour_id, Utc::now()).await?;
        let mut archive = pgn::filter_round(games, round);
        for game in archive.iter_mut() {
            self.roster.apply(game);
        }
        let previews = previews_from_games(&archive);
        info!("round {round}: {} previews computed from a {bytes} byte archive", previews.len());
        Ok(NetworkResponse::RoundHydrated {
            tournament_key: self.tournament_key.clone(),
            round,
            previews,
            persisted: false,
            archive,
        })
    }

    async fn refresh_game(&self, round: u32, game_id: &str) -> anyhow::Result<NetworkResponse> {
        let mut game = self.fetcher.api().fetch_game_pgn(game_id, round, Utc::now()).await?;
        self.roster.apply(&mut game);

        let rounds = self.rounds.lock().await;
        if let Some(snapshot) = rounds.load_snapshot(round).await {
            let merged = merge(&snapshot, std::slice::from_ref(&game));
            if let Err(e) = rounds.save_snapshot(round, &merged).await {
                warn!("could not persist round {round} snapshot: {e}");
            }
        }
        drop(rounds);

        Ok(NetworkResponse::GameRefreshed { tournament_key: self.tournament_key.clone(), round, game })
    }
}

pub struct NetworkWorker {
    pipeline: Arc<Pipeline>,
    requests: mpsc::Receiver<NetworkRequest>,
    responses: mpsc::Sender<NetworkResponse>,
}

impl NetworkWorker {
    pub fn new(
        pipeline: Arc<Pipeline>,
        requests: mpsc::Receiver<NetworkRequest>,
        responses: mpsc::Sender<NetworkResponse>,
    ) -> Self {
        Self { pipeline, requests, responses }
    }

    /// Each request runs on its own task so a slow round fetch never holds
    /// up the live-status probe. Duplicate fetches are joined by the fetcher.
    pub async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            let pipeline = self.pipeline.clone();
            let responses = self.responses.clone();
            tokio::spawn(async move {
                debug!("network request {request:?}");
                let response = pipeline
                    .handle(request)
                    .await
                    .unwrap_or_else(|err| NetworkResponse::Error { message: format!("{err:#}") });
                if let Err(e) = responses.send(response).await {
                    error!("Failed to send network response: {e}");
                }
            });
        }
    }
}
