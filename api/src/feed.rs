//! Multi-source round fetcher.
//!
//! Sources are tried in priority order: the official tournament feed, the
//! Lichess broadcast round (PGN, then JSON), the tournament archive filtered
//! to the round, and finally the last good result for the round. The first
//! source that yields games wins and tags the result.

use crate::client::{ApiError, BroadcastApi};
use crate::{GameRecord, TournamentInfo, pgn};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Consecutive official-feed failures before switching to fallback.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedSource {
    Official,
    Broadcast,
    Archive,
    Cache,
}

impl FeedSource {
    pub fn label(&self) -> &'static str {
        match self {
            FeedSource::Official => "official",
            FeedSource::Broadcast => "broadcast",
            FeedSource::Archive => "archive",
            FeedSource::Cache => "cache",
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundGames {
    pub tournament_key: String,
    pub round: u32,
    pub games: Vec<GameRecord>,
    pub source: FeedSource,
    /// Payload size as received; 0 when the source does not report one.
    pub bytes: usize,
    pub stale: bool,
    pub round_id: Option<String>,
}

/// Shareable fetch error. Every waiter on a de-duplicated fetch gets a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    Unavailable { round: u32, reasons: Vec<String> },
    UnknownTournament(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Unavailable { round, reasons } => {
                write!(f, "no source for round {round}: {}", reasons.join("; "))
            }
            FeedError::UnknownTournament(key) => write!(f, "unknown tournament {key}"),
        }
    }
}

impl std::error::Error for FeedError {}

// ---------------------------------------------------------------------------
// Official-feed source mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Primary { failures: u32 },
    /// Official feed skipped until the probe interval elapses.
    Fallback { since: Instant },
    /// One official attempt allowed; its outcome decides the next mode.
    Probing,
}

impl Default for SourceMode {
    fn default() -> Self {
        SourceMode::Primary { failures: 0 }
    }
}

impl SourceMode {
    pub fn should_try_primary(&mut self, now: Instant, probe_interval: Duration) -> bool {
        match *self {
            SourceMode::Primary { .. } | SourceMode::Probing => true,
            SourceMode::Fallback { since } if now.duration_since(since) >= probe_interval => {
                *self = SourceMode::Probing;
                true
            }
            SourceMode::Fallback { .. } => false,
        }
    }

    pub fn record_primary_success(&mut self) {
        *self = SourceMode::Primary { failures: 0 };
    }

    pub fn record_primary_failure(&mut self, now: Instant, threshold: u32) {
        *self = match *self {
            SourceMode::Primary { failures } if failures + 1 < threshold => {
                SourceMode::Primary { failures: failures + 1 }
            }
            _ => SourceMode::Fallback { since: now },
        };
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Canonical tournament key, used for de-duplication and cache keys.
    pub tournament_key: String,
    /// Lichess broadcast tournament ID.
    pub broadcast_id: Option<String>,
    /// Official PGN URL with a `{round}` placeholder.
    pub official_template: Option<String>,
    pub failure_threshold: u32,
    pub probe_interval: Duration,
}

impl FeedConfig {
    pub fn new(tournament_key: impl Into<String>) -> Self {
        Self {
            tournament_key: tournament_key.into(),
            broadcast_id: None,
            official_template: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    tournament: String,
    round: u32,
    force: bool,
}

type SharedFetch = Shared<BoxFuture<'static, Result<RoundGames, FeedError>>>;

#[derive(Debug)]
struct TournamentFeed {
    config: FeedConfig,
    round_ids: Mutex<HashMap<u32, String>>,
    last_good: Mutex<HashMap<u32, RoundGames>>,
    mode: Mutex<SourceMode>,
}

struct FeedInner {
    api: BroadcastApi,
    tournaments: Mutex<HashMap<String, Arc<TournamentFeed>>>,
    in_flight: Mutex<HashMap<FetchKey, SharedFetch>>,
}

/// Cheap to clone; clones share caches and in-flight fetches.
#[derive(Clone)]
pub struct FeedFetcher {
    inner: Arc<FeedInner>,
}

/// A poisoned lock only means another fetch panicked mid-update; the maps stay usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn assign_round(games: &mut [GameRecord], round: u32) {
    for game in games.iter_mut().filter(|g| g.round != round) {
        let synthesized = game.id == game.row_key();
        game.round = round;
        if synthesized {
            game.id = game.row_key();
        }
    }
}

impl FeedFetcher {
    pub fn new(api: BroadcastApi) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                api,
                tournaments: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn api(&self) -> &BroadcastApi {
        &self.inner.api
    }

    pub fn register(&self, config: FeedConfig) {
        let key = config.tournament_key.clone();
        let feed = Arc::new(TournamentFeed {
            config,
            round_ids: Mutex::new(HashMap::new()),
            last_good: Mutex::new(HashMap::new()),
            mode: Mutex::new(SourceMode::default()),
        });
        lock(&self.inner.tournaments).insert(key, feed);
    }

    fn feed(&self, tournament_key: &str) -> Result<Arc<TournamentFeed>, FeedError> {
        lock(&self.inner.tournaments)
            .get(tournament_key)
            .cloned()
            .ok_or_else(|| FeedError::UnknownTournament(tournament_key.to_string()))
    }

    pub fn source_mode(&self, tournament_key: &str) -> Option<SourceMode> {
        self.feed(tournament_key).ok().map(|feed| *lock(&feed.mode))
    }

    /// Tournament metadata; refreshes the round-ID cache as a side effect.
    pub async fn fetch_tournament(&self, tournament_key: &str) -> Result<TournamentInfo, ApiError> {
        let feed = self
            .feed(tournament_key)
            .map_err(|e| ApiError::Other(e.to_string()))?;
        let tour_id = feed
            .config
            .broadcast_id
            .clone()
            .ok_or_else(|| ApiError::Other(format!("{tournament_key} has no broadcast id")))?;
        let info = self.inner.api.fetch_tournament(&tour_id).await?;
        let mut ids = lock(&feed.round_ids);
        ids.clear();
        ids.extend(info.rounds.iter().map(|r| (r.number, r.id.clone())));
        Ok(info)
    }

    /// Games for one round from the best available source.
    ///
    /// Identical concurrent calls share a single fetch. `force` skips the
    /// fallback-mode gate and the round-ID cache.
    pub async fn fetch_round_games(
        &self,
        tournament_key: &str,
        round: u32,
        force: bool,
    ) -> Result<RoundGames, FeedError> {
        let feed = self.feed(tournament_key)?;
        let key = FetchKey { tournament: tournament_key.to_string(), round, force };

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!("joining in-flight fetch of {tournament_key} round {round}");
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let cleanup = key.clone();
                    let fetch = async move {
                        let result = this.fetch_uncached(feed, round, force).await;
                        lock(&this.inner.in_flight).remove(&cleanup);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        shared.await
    }

    async fn fetch_uncached(
        &self,
        feed: Arc<TournamentFeed>,
        round: u32,
        force: bool,
    ) -> Result<RoundGames, FeedError> {
        let now = Utc::now();
        let config = &feed.config;
        let api = &self.inner.api;
        let mut reasons: Vec<String> = Vec::new();

        let result = |games: Vec<GameRecord>, source, bytes, round_id: Option<String>| RoundGames {
            tournament_key: config.tournament_key.clone(),
            round,
            games,
            source,
            bytes,
            stale: false,
            round_id,
        };

        if let Some(template) = &config.official_template {
            let attempt = force || lock(&feed.mode).should_try_primary(Instant::now(), config.probe_interval);
            if attempt {
                match api.fetch_official_pgn(template, round, now).await {
                    Ok((games, bytes)) => {
                        let games = pgn::filter_round(games, round);
                        if games.is_empty() {
                            lock(&feed.mode).record_primary_failure(Instant::now(), config.failure_threshold);
                            reasons.push(format!("official: no games for round {round}"));
                        } else {
                            lock(&feed.mode).record_primary_success();
                            return Ok(feed.remember(result(games, FeedSource::Official, bytes, None)));
                        }
                    }
                    Err(e) => {
                        lock(&feed.mode).record_primary_failure(Instant::now(), config.failure_threshold);
                        warn!("official feed failed for round {round}: {e}");
                        reasons.push(format!("official: {e}"));
                    }
                }
            } else {
                reasons.push("official: skipped in fallback mode".to_string());
            }
        }

        if let Some(tour_id) = &config.broadcast_id {
            match self.resolve_round_id(&feed, tour_id, round, force).await {
                Ok(round_id) => {
                    match api.fetch_round_pgn(&round_id, round, now).await {
                        Ok((mut games, bytes)) if !games.is_empty() => {
                            assign_round(&mut games, round);
                            let found = result(games, FeedSource::Broadcast, bytes, Some(round_id));
                            return Ok(feed.remember(found));
                        }
                        Ok(_) => reasons.push("broadcast pgn: no games".to_string()),
                        Err(e) => reasons.push(format!("broadcast pgn: {e}")),
                    }
                    match api.fetch_round_json(&round_id, round, now).await {
                        Ok(games) if !games.is_empty() => {
                            let found = result(games, FeedSource::Broadcast, 0, Some(round_id));
                            return Ok(feed.remember(found));
                        }
                        Ok(_) => reasons.push("broadcast json: no games".to_string()),
                        Err(e) => reasons.push(format!("broadcast json: {e}")),
                    }
                }
                Err(e) => reasons.push(format!("round id: {e}")),
            }

            match api.fetch_tournament_pgn(tour_id, now).await {
                Ok((games, bytes)) => {
                    let games = pgn::filter_round(games, round);
                    if !games.is_empty() {
                        info!("round {round} backfilled from tournament archive");
                        return Ok(feed.remember(result(games, FeedSource::Archive, bytes, None)));
                    }
                    reasons.push(format!("archive: no games for round {round}"));
                }
                Err(e) => reasons.push(format!("archive: {e}")),
            }
        }

        let cached = lock(&feed.last_good).get(&round).cloned();
        if let Some(mut stale) = cached {
            warn!("serving stale round {round}: {}", reasons.join("; "));
            stale.source = FeedSource::Cache;
            stale.stale = true;
            return Ok(stale);
        }

        Err(FeedError::Unavailable { round, reasons })
    }

    async fn resolve_round_id(
        &self,
        feed: &TournamentFeed,
        tour_id: &str,
        round: u32,
        force: bool,
    ) -> Result<String, ApiError> {
        if !force {
            let cached = lock(&feed.round_ids).get(&round).cloned();
            if let Some(id) = cached {
                return Ok(id);
            }
        }
        let info = self.inner.api.fetch_tournament(tour_id).await?;
        let mut ids = lock(&feed.round_ids);
        ids.clear();
        ids.extend(info.rounds.iter().map(|r| (r.number, r.id.clone())));
        ids.get(&round)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("round {round} of {tour_id}")))
    }
}

impl TournamentFeed {
    fn remember(&self, found: RoundGames) -> RoundGames {
        debug!(
            "round {} from {}: {} games, {} bytes",
            found.round,
            found.source,
            found.games.len(),
            found.bytes
        );
        lock(&self.last_good).insert(found.round, found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;

    fn tour_json(rounds: u32) -> String {
        let rounds: Vec<String> = (1..=rounds)
            .map(|n| format!(r#"{{"id": "r{n}", "name": "Round {n}", "slug": "round-{n}"}}"#))
            .collect();
        format!(
            r#"{{"tour": {{"id": "tour1", "name": "Test Open", "slug": "test-open"}}, "rounds": [{}]}}"#,
            rounds.join(",")
        )
    }

    fn round_pgn(round: u32, boards: u32) -> String {
        (1..=boards)
            .map(|b| {
                format!(
                    "[Round \"{round}.{b}\"]\n[White \"White {b}\"]\n[Black \"Black {b}\"]\n[Result \"*\"]\n\n1. e4 e5 *\n\n"
                )
            })
            .collect()
    }

    fn config(server: &mockito::Server, official: bool) -> FeedConfig {
        let mut config = FeedConfig::new("test-open");
        config.broadcast_id = Some("tour1".into());
        if official {
            config.official_template = Some(format!("{}/official/{{round}}.pgn", server.url()));
        }
        config
    }

    fn fetcher(server: &mockito::Server, official: bool) -> FeedFetcher {
        let fetcher = FeedFetcher::new(BroadcastApi::with_base_url(server.url()));
        fetcher.register(config(server, official));
        fetcher
    }

    #[tokio::test]
    async fn html_official_page_falls_through_to_broadcast() {
        let mut server = mockito::Server::new_async().await;
        let _official = server
            .mock("GET", "/official/7.pgn")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<!DOCTYPE html><html><body>Round 7</body></html>")
            .create_async()
            .await;
        let _tour = server
            .mock("GET", "/api/broadcast/tour1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(tour_json(9))
            .create_async()
            .await;
        let _round = server
            .mock("GET", "/api/broadcast/round/r7.pgn")
            .with_status(200)
            .with_header("content-type", "application/x-chess-pgn")
            .with_body(round_pgn(7, 8))
            .create_async()
            .await;

        let fetcher = fetcher(&server, true);
        let found = fetcher.fetch_round_games("test-open", 7, false).await.unwrap();
        assert_eq!(found.source, FeedSource::Broadcast);
        assert_eq!(found.source.label(), "broadcast");
        assert_eq!(found.games.len(), 8);
        assert!(!found.stale);
        assert_eq!(found.round_id.as_deref(), Some("r7"));
        assert_eq!(merge(&[], &found.games).len(), 8);
        assert_eq!(
            fetcher.source_mode("test-open"),
            Some(SourceMode::Primary { failures: 1 })
        );
    }

    #[tokio::test]
    async fn overlapping_fetches_share_one_request() {
        let mut server = mockito::Server::new_async().await;
        let tour = server
            .mock("GET", "/api/broadcast/tour1")
            .with_status(200)
            .with_body(tour_json(5))
            .expect(1)
            .create_async()
            .await;
        let round = server
            .mock("GET", "/api/broadcast/round/r4.pgn")
            .with_status(200)
            .with_body(round_pgn(4, 3))
            .expect(1)
            .create_async()
            .await;

        let fetcher = fetcher(&server, false);
        let other = fetcher.clone();
        let (a, b) = tokio::join!(
            fetcher.fetch_round_games("test-open", 4, false),
            other.fetch_round_games("test-open", 4, false)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        tour.assert_async().await;
        round.assert_async().await;
    }

    #[tokio::test]
    async fn archive_backfills_when_round_sources_are_empty() {
        let mut server = mockito::Server::new_async().await;
        let _tour = server
            .mock("GET", "/api/broadcast/tour1")
            .with_status(200)
            .with_body(tour_json(3))
            .create_async()
            .await;
        let _round_pgn = server
            .mock("GET", "/api/broadcast/round/r2.pgn")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;
        let _round_json = server
            .mock("GET", "/api/broadcast/-/-/r2")
            .with_status(200)
            .with_body(r#"{"games": []}"#)
            .create_async()
            .await;
        let archive = format!("{}{}{}", round_pgn(1, 2), round_pgn(2, 4), round_pgn(3, 1));
        let _archive = server
            .mock("GET", "/api/broadcast/tour1.pgn")
            .with_status(200)
            .with_body(archive)
            .create_async()
            .await;

        let found = fetcher(&server, false)
            .fetch_round_games("test-open", 2, false)
            .await
            .unwrap();
        assert_eq!(found.source, FeedSource::Archive);
        assert_eq!(found.games.len(), 4);
        assert!(found.games.iter().all(|g| g.round == 2));
    }

    #[tokio::test]
    async fn last_good_result_served_stale_when_everything_fails() {
        let mut server = mockito::Server::new_async().await;
        let _tour = server
            .mock("GET", "/api/broadcast/tour1")
            .with_status(200)
            .with_body(tour_json(3))
            .create_async()
            .await;
        let round = server
            .mock("GET", "/api/broadcast/round/r3.pgn")
            .with_status(200)
            .with_body(round_pgn(3, 2))
            .create_async()
            .await;

        let fetcher = fetcher(&server, false);
        let fresh = fetcher.fetch_round_games("test-open", 3, false).await.unwrap();
        assert!(!fresh.stale);

        round.remove_async().await;
        let stale = fetcher.fetch_round_games("test-open", 3, false).await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.source, FeedSource::Cache);
        assert_eq!(stale.games, fresh.games);
    }

    #[tokio::test]
    async fn unknown_tournament_is_rejected() {
        let server = mockito::Server::new_async().await;
        let err = fetcher(&server, false)
            .fetch_round_games("elsewhere", 1, false)
            .await
            .unwrap_err();
        assert_eq!(err, FeedError::UnknownTournament("elsewhere".into()));
    }

    #[test]
    fn source_mode_transitions() {
        let start = Instant::now();
        let interval = Duration::from_secs(60);
        let mut mode = SourceMode::default();

        mode.record_primary_failure(start, 2);
        assert_eq!(mode, SourceMode::Primary { failures: 1 });
        mode.record_primary_failure(start, 2);
        assert_eq!(mode, SourceMode::Fallback { since: start });

        assert!(!mode.should_try_primary(start + Duration::from_secs(10), interval));
        assert!(mode.should_try_primary(start + interval, interval));
        assert_eq!(mode, SourceMode::Probing);

        mode.record_primary_failure(start + interval, 2);
        assert!(matches!(mode, SourceMode::Fallback { .. }));

        mode = SourceMode::Probing;
        mode.record_primary_success();
        assert_eq!(mode, SourceMode::Primary { failures: 0 });
    }
}
