use crate::lichess::{BroadcastGame, BroadcastRoundInfo, BroadcastRoundResponse, BroadcastTournamentResponse};
use crate::preview::{format_clock, resolve_preview};
use crate::schedule::normalize_epoch_ms;
use crate::{GameRecord, GameResult, Player, RoundInfo, TournamentInfo, pgn};
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::fmt;
use std::time::Duration;

pub type ApiResult<T> = Result<T, ApiError>;

pub const LICHESS_BASE: &str = "https://lichess.org";

/// Lichess broadcast client plus the per-tournament official PGN feed.
#[derive(Debug, Clone)]
pub struct BroadcastApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Default for BroadcastApi {
    fn default() -> Self {
        Self::with_base_url(LICHESS_BASE)
    }
}

#[derive(Debug)]
pub enum ApiError {
    Network(reqwest::Error, String),
    Api(reqwest::Error, String),
    Parsing(String, String),
    /// An HTML page where PGN or JSON was expected (login wall, error page).
    Html(String),
    NotFound(String),
    Other(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e, url) => write!(f, "Network error for {url}: {e}"),
            ApiError::Api(e, url) => write!(f, "API error for {url}: {e}"),
            ApiError::Parsing(e, url) => write!(f, "Parse error for {url}: {e}"),
            ApiError::Html(url) => write!(f, "HTML instead of data at {url}"),
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl BroadcastApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("boardcast/0.1 (live broadcast viewer)")
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Tournament metadata with its round list.
    pub async fn fetch_tournament(&self, tour_id: &str) -> ApiResult<TournamentInfo> {
        let url = format!("{}/api/broadcast/{tour_id}", self.base_url);
        let raw: BroadcastTournamentResponse = self.get(&url).await?;
        if raw.tour.is_none() && raw.rounds.is_empty() {
            return Err(ApiError::NotFound(format!("broadcast {tour_id}")));
        }
        Ok(map_tournament(raw))
    }

    /// Round PGN. Every game of the round, with clocks.
    pub async fn fetch_round_pgn(
        &self,
        round_id: &str,
        round: u32,
        now: DateTime<Utc>,
    ) -> ApiResult<(Vec<GameRecord>, usize)> {
        let url = format!("{}/api/broadcast/round/{round_id}.pgn", self.base_url);
        let body = self.get_text(&url).await?;
        Ok((pgn::parse_games(&body, round, now), body.len()))
    }

    /// Round JSON. Snapshot FENs and centisecond clocks, no movetext.
    pub async fn fetch_round_json(
        &self,
        round_id: &str,
        round: u32,
        now: DateTime<Utc>,
    ) -> ApiResult<Vec<GameRecord>> {
        let url = format!("{}/api/broadcast/-/-/{round_id}", self.base_url);
        let raw: BroadcastRoundResponse = self.get(&url).await?;
        Ok(map_round_games(raw, round, now))
    }

    /// Whole-tournament PGN archive.
    pub async fn fetch_tournament_pgn(
        &self,
        tour_id: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<(Vec<GameRecord>, usize)> {
        let url = format!("{}/api/broadcast/{tour_id}.pgn", self.base_url);
        let body = self.get_text(&url).await?;
        Ok((pgn::parse_games(&body, 1, now), body.len()))
    }

    /// One game with clock comments, for the game-detail refresh.
    pub async fn fetch_game_pgn(
        &self,
        game_id: &str,
        round: u32,
        now: DateTime<Utc>,
    ) -> ApiResult<GameRecord> {
        let url = format!("{}/game/export/{game_id}?clocks=true", self.base_url);
        let body = self.get_text(&url).await?;
        let mut game = pgn::parse_games(&body, round, now)
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("game {game_id}")))?;
        game.id = game_id.to_string();
        Ok(game)
    }

    /// Official tournament feed. `template` contains a `{round}` placeholder.
    pub async fn fetch_official_pgn(
        &self,
        template: &str,
        round: u32,
        now: DateTime<Utc>,
    ) -> ApiResult<(Vec<GameRecord>, usize)> {
        let url = template.replace("{round}", &round.to_string());
        let body = self.get_text(&url).await?;
        Ok((pgn::parse_games(&body, round, now), body.len()))
    }

    async fn get<T: Default + serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url.to_owned()))?;

        match response.error_for_status() {
            Ok(res) => {
                let body = res.text().await.map_err(|e| ApiError::Network(e, url.to_owned()))?;
                if looks_like_html(None, &body) {
                    return Err(ApiError::Html(url.to_owned()));
                }
                serde_json::from_str(&body).map_err(|e| ApiError::Parsing(e.to_string(), url.to_owned()))
            }
            Err(e) => {
                if e.status().map(|s| s.is_client_error()).unwrap_or(false) {
                    Ok(T::default())
                } else {
                    Err(ApiError::Api(e, url.to_owned()))
                }
            }
        }
    }

    /// Plain-text GET that rejects HTML bodies.
    async fn get_text(&self, url: &str) -> ApiResult<String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url.to_owned()))?;

        let response = match response.error_for_status() {
            Ok(res) => res,
            Err(e) if e.status().is_some_and(|s| s == reqwest::StatusCode::NOT_FOUND) => {
                return Err(ApiError::NotFound(url.to_owned()));
            }
            Err(e) => return Err(ApiError::Api(e, url.to_owned())),
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e, url.to_owned()))?;

        if looks_like_html(content_type.as_deref(), &body) {
            return Err(ApiError::Html(url.to_owned()));
        }
        Ok(body)
    }
}

/// HTML by content type or by a leading `<`.
pub fn looks_like_html(content_type: Option<&str>, body: &str) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        || body.trim_start().starts_with('<')
}

// ---------------------------------------------------------------------------
// Mapping: Lichess wire types → clean domain types
// ---------------------------------------------------------------------------

/// Round ordinal from a round name ("Round 7", "R7", "7"), else the list position.
fn round_number(raw: &BroadcastRoundInfo, index: usize) -> u32 {
    let digits: String = raw
        .name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(index as u32 + 1)
}

fn map_round(raw: &BroadcastRoundInfo, index: usize) -> RoundInfo {
    RoundInfo {
        number: round_number(raw, index),
        id: raw.id.clone(),
        name: raw.name.clone(),
        slug: raw.slug.clone(),
        url: raw.url.clone(),
        starts_at_ms: raw.starts_at.map(normalize_epoch_ms),
        finished: raw.finished,
        ongoing: raw.ongoing,
    }
}

pub fn map_tournament(raw: BroadcastTournamentResponse) -> TournamentInfo {
    let tour = raw.tour.unwrap_or_default();
    let mut rounds: Vec<RoundInfo> = raw
        .rounds
        .iter()
        .enumerate()
        .map(|(i, r)| map_round(r, i))
        .collect();
    rounds.sort_by_key(|r| r.number);

    TournamentInfo {
        slug: if tour.slug.is_empty() { tour.id.clone() } else { tour.slug },
        id: tour.id,
        name: tour.name,
        description: tour.description,
        rounds,
    }
}

fn map_player(raw: Option<&crate::lichess::BroadcastPlayer>) -> Player {
    let Some(raw) = raw else {
        return Player::default();
    };
    Player {
        name: raw.name.trim().to_string(),
        title: raw.title.clone().unwrap_or_default(),
        rating: raw.rating.unwrap_or(0),
        federation: raw.fed.clone().unwrap_or_default(),
    }
}

fn map_game(raw: &BroadcastGame, round: u32, board: u32, now: DateTime<Utc>) -> GameRecord {
    let white = map_player(raw.players.first());
    let black = map_player(raw.players.get(1));

    let mut game = GameRecord::new(round, board, &white.name, &black.name);
    game.white = white;
    game.black = black;
    if !raw.id.is_empty() {
        game.id = raw.id.clone();
    }
    game.fen = raw.fen.clone();
    game.last_move = raw.last_move.clone().filter(|m| !m.is_empty());
    game.status = raw.status.clone();
    game.updated_at = Some(now);

    let preview = resolve_preview("", raw.fen.as_deref(), &[]);
    game.set_preview(&preview);
    if game.preview_last_move.is_none() {
        game.preview_last_move = game.last_move.clone();
    }

    let seconds = |p: Option<&crate::lichess::BroadcastPlayer>| {
        p.and_then(|p| p.clock).map(|cs| u32::try_from(cs / 100).unwrap_or(u32::MAX))
    };
    game.white_seconds = seconds(raw.players.first());
    game.black_seconds = seconds(raw.players.get(1));
    game.white_clock = game.white_seconds.map(format_clock);
    game.black_clock = game.black_seconds.map(format_clock);
    if game.white_seconds.is_some() || game.black_seconds.is_some() {
        game.clock_captured_at = Some(now);
    }

    match raw.status.as_deref().and_then(GameResult::from_token) {
        Some(result) => game.finish(result),
        None if raw.status.as_deref() == Some("*") && game.has_moves() => game.mark_live(),
        None => {}
    }
    game
}

pub fn map_round_games(raw: BroadcastRoundResponse, round: u32, now: DateTime<Utc>) -> Vec<GameRecord> {
    raw.games
        .iter()
        .enumerate()
        .map(|(i, g)| map_game(g, round, i as u32 + 1, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 15, 0, 0).unwrap()
    }

    const TOUR_JSON: &str = r#"{
        "tour": {"id": "cand26", "name": "Candidates 2026", "slug": "candidates-2026"},
        "rounds": [
            {"id": "rA", "name": "Round 1", "slug": "round-1", "startsAt": 1775000000, "finished": true},
            {"id": "rB", "name": "Round 2", "slug": "round-2", "startsAt": 1775086400000, "ongoing": true},
            {"id": "rC", "name": "Tiebreaks", "slug": "tiebreaks"}
        ]
    }"#;

    #[test]
    fn html_sniffing_uses_content_type_and_body() {
        assert!(looks_like_html(Some("text/html; charset=utf-8"), "[Event \"x\"]"));
        assert!(looks_like_html(None, "  <!doctype html>"));
        assert!(!looks_like_html(Some("application/x-chess-pgn"), "[Event \"x\"]"));
    }

    #[test]
    fn tournament_mapping_numbers_rounds_and_normalizes_epochs() {
        let raw: BroadcastTournamentResponse = serde_json::from_str(TOUR_JSON).unwrap();
        let info = map_tournament(raw);
        assert_eq!(info.slug, "candidates-2026");
        assert_eq!(info.rounds.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(info.rounds[0].starts_at_ms, Some(1_775_000_000_000));
        assert_eq!(info.rounds[1].starts_at_ms, Some(1_775_086_400_000));
        assert_eq!(info.round(2).map(|r| r.id.as_str()), Some("rB"));
    }

    #[test]
    fn round_json_maps_results_and_clocks() {
        let raw: BroadcastRoundResponse = serde_json::from_str(
            r#"{"games": [
                {"id": "g1", "status": "½-½", "fen": "8/8/4k3/8/8/4K3/8/8 w - - 0 60",
                 "players": [{"name": "A"}, {"name": "B"}]},
                {"id": "g2", "status": "*", "lastMove": "e7e5",
                 "fen": "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
                 "players": [{"name": "C", "clock": 599000}, {"name": "D", "clock": 360050}]}
            ]}"#,
        )
        .unwrap();
        let games = map_round_games(raw, 7, now());
        assert_eq!(games[0].result(), Some(GameResult::Draw));
        assert_eq!(games[0].board, 1);
        assert!(games[1].is_live);
        assert_eq!(games[1].white_clock.as_deref(), Some("1:39:50"));
        assert_eq!(games[1].black_seconds, Some(3600));
        assert_eq!(games[1].preview_last_move.as_deref(), Some("e7e5"));
    }

    #[tokio::test]
    async fn html_official_page_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/official/7.pgn")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>Please log in</body></html>")
            .create_async()
            .await;

        let api = BroadcastApi::with_base_url(server.url());
        let template = format!("{}/official/{{round}}.pgn", server.url());
        let result = api.fetch_official_pgn(&template, 7, now()).await;
        assert!(matches!(result, Err(ApiError::Html(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn game_export_sets_upstream_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/game/export/AbCd1234")
            .match_query(mockito::Matcher::UrlEncoded("clocks".into(), "true".into()))
            .with_status(200)
            .with_header("content-type", "application/x-chess-pgn")
            .with_body("[White \"A\"]\n[Black \"B\"]\n[Result \"0-1\"]\n\n1. f3 e5 2. g4 Qh4# 0-1\n")
            .create_async()
            .await;

        let api = BroadcastApi::with_base_url(server.url());
        let game = api.fetch_game_pgn("AbCd1234", 2, now()).await.unwrap();
        assert_eq!(game.id, "AbCd1234");
        assert_eq!(game.result(), Some(GameResult::BlackWins));
        assert_eq!(game.last_move.as_deref(), Some("d8h4"));
    }

    #[tokio::test]
    async fn missing_tournament_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/broadcast/nope")
            .with_status(404)
            .create_async()
            .await;

        let api = BroadcastApi::with_base_url(server.url());
        assert!(matches!(api.fetch_tournament("nope").await, Err(ApiError::NotFound(_))));
    }
}
