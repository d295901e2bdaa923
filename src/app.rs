use crate::cache::preview_cache::{PreviewCache, RoundPreviews};
use crate::state::app_settings::AppSettings;
use crate::state::app_state::{AppState, RoundMeta};
use crate::state::messages::{NetworkRequest, PollKind};
use crate::state::refresher::PollControl;
use broadcast_api::feed::FeedSource;
use broadcast_api::merge::{backfill_metadata, merge};
use broadcast_api::schedule::LiveStatus;
use broadcast_api::{GameRecord, TournamentInfo};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

pub struct App {
    pub settings: AppSettings,
    pub state: AppState,
    previews: PreviewCache,
    /// Board followed by the live overlay.
    focused_board: Option<u32>,
}

impl App {
    pub fn new(settings: AppSettings, previews: PreviewCache) -> Self {
        let state = AppState::new(settings.initial_round);
        Self { settings, state, previews, focused_board: None }
    }

    pub fn tournament_key(&self) -> &str {
        &self.settings.tournament_key
    }

    pub fn startup_requests(&self) -> Vec<NetworkRequest> {
        vec![
            NetworkRequest::ProbeLiveStatus,
            NetworkRequest::LoadRound { round: self.state.selected_round(), force: false },
        ]
    }

    /// Responses for another tournament, or for a round that is neither
    /// selected nor live, are dropped.
    fn accepts(&self, tournament_key: &str, round: u32, now: DateTime<Utc>) -> bool {
        if tournament_key != self.tournament_key() {
            debug!("dropping response for tournament {tournament_key}");
            return false;
        }
        let live_round = self.state.live_status(now).live_round;
        if round != self.state.selected_round() && Some(round) != live_round {
            debug!("dropping response for round {round}, no longer selected");
            return false;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Network response handlers, called from main_loop
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn on_round_loaded(
        &mut self,
        tournament_key: &str,
        round: u32,
        mut games: Vec<GameRecord>,
        source: FeedSource,
        stale: bool,
        round_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<NetworkRequest> {
        if !self.accepts(tournament_key, round, now) {
            return Vec::new();
        }
        if games.is_empty() && !self.state.games(round).is_empty() {
            warn!("round {round}: {source} returned no games, keeping the current view");
            return Vec::new();
        }

        let key = self.settings.tournament_key.clone();
        let applied = self.previews.apply_to_games(&key, round, &mut games);
        if applied > 0 {
            debug!("round {round}: {applied} games filled from the preview cache");
        }
        self.previews.record_round(&key, round, round_id.as_deref(), &games);

        let round_id = round_id.or_else(|| self.state.round_id(round));
        let needs_previews = games.iter().any(|g| g.preview_fen.is_none());
        self.state.rounds.insert(round, games);
        self.state
            .meta
            .insert(round, RoundMeta { source, stale, round_id: round_id.clone(), loaded_at: now });
        self.state.last_error = None;

        let mut follow_up = Vec::new();
        if needs_previews && self.previews.begin_hydration(&key, round) {
            follow_up.push(NetworkRequest::HydrateRound { round, round_id });
        }
        if self.state.reevaluate(now) {
            follow_up.push(self.load_selected());
        }
        follow_up
    }

    pub fn on_round_hydrated(
        &mut self,
        tournament_key: &str,
        round: u32,
        previews: RoundPreviews,
        persisted: bool,
        archive: Vec<GameRecord>,
    ) {
        if tournament_key != self.tournament_key() {
            return;
        }
        let key = self.settings.tournament_key.clone();
        self.previews.insert_loaded(&key, round, previews, persisted);

        let round_id = self.state.round_id(round);
        let Some(games) = self.state.rounds.get_mut(&round) else {
            return;
        };
        let applied = self.previews.apply_to_games(&key, round, games);
        let filled = backfill_metadata(games, &archive);
        info!("round {round} hydrated: {applied} previews applied, {filled} games backfilled");
        self.previews.record_round(&key, round, round_id.as_deref(), games);
    }

    pub fn on_live_status(
        &mut self,
        tournament_key: &str,
        info: TournamentInfo,
        status: LiveStatus,
        now: DateTime<Utc>,
    ) -> Vec<NetworkRequest> {
        if tournament_key != self.tournament_key() {
            return Vec::new();
        }
        self.state.info = Some(info);
        self.state.probe = Some(status);
        if self.state.reevaluate(now) {
            info!("switching to round {}", self.state.selected_round());
            return vec![self.load_selected()];
        }
        Vec::new()
    }

    pub fn on_game_refreshed(&mut self, tournament_key: &str, round: u32, game: GameRecord, now: DateTime<Utc>) {
        if !self.accepts(tournament_key, round, now) {
            return;
        }
        let Some(games) = self.state.rounds.get_mut(&round) else {
            return;
        };
        *games = merge(games.as_slice(), std::slice::from_ref(&game));
        let round_id = self.state.round_id(round);
        let key = self.settings.tournament_key.clone();
        if let Some(games) = self.state.rounds.get(&round) {
            self.previews.record_round(&key, round, round_id.as_deref(), games);
        }
    }

    pub fn on_error(&mut self, message: String) {
        self.state.last_error = Some(message);
    }

    // -----------------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------------

    fn load_selected(&self) -> NetworkRequest {
        NetworkRequest::LoadRound { round: self.state.selected_round(), force: false }
    }

    pub fn select_round(&mut self, round: u32, now: DateTime<Utc>) -> Vec<NetworkRequest> {
        self.state.selector.select_manually(round);
        self.state.reevaluate(now);
        self.focused_board = None;
        vec![self.load_selected()]
    }

    /// Back to automatic round selection.
    pub fn reset_round(&mut self, now: DateTime<Utc>) -> Vec<NetworkRequest> {
        self.state.selector.reset();
        self.state.reevaluate(now);
        vec![self.load_selected()]
    }

    pub fn focus_board(&mut self, board: Option<u32>) {
        self.focused_board = board;
    }

    /// Drop every cached view of the selected round and refetch it.
    pub async fn reload(&mut self) -> Vec<NetworkRequest> {
        let round = self.state.selected_round();
        let key = self.settings.tournament_key.clone();
        let round_id = self.state.round_id(round);
        if let Err(e) = self.previews.invalidate_round(&key, round, round_id.as_deref()).await {
            warn!("could not clear cached previews for round {round}: {e}");
        }
        vec![NetworkRequest::InvalidateRound { round }]
    }

    /// Forget everything cached for the tournament.
    pub async fn clear_cache(&mut self) -> Vec<NetworkRequest> {
        let key = self.settings.tournament_key.clone();
        let round_ids = self.state.known_round_ids();
        match self.previews.invalidate_tournament(&key, round_ids).await {
            Ok(removed) => info!("removed {removed} cached preview rounds"),
            Err(e) => warn!("could not clear cached previews: {e}"),
        }
        vec![NetworkRequest::InvalidateTournament { round: self.state.selected_round() }]
    }

    pub fn toggle_pause(&mut self) {
        self.state.paused = !self.state.paused;
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    pub fn poll_requests(&mut self, kind: PollKind, now: DateTime<Utc>) -> Vec<NetworkRequest> {
        match kind {
            PollKind::Games => vec![self.load_selected()],
            PollKind::LiveOverlay => {
                let round = self.state.selected_round();
                self.focused_game(round)
                    .filter(|g| g.is_live && g.id != g.row_key())
                    .map(|g| NetworkRequest::RefreshGame { round, game_id: g.id.clone() })
                    .into_iter()
                    .collect()
            }
            PollKind::Schedule => {
                if self.state.reevaluate(now) {
                    vec![NetworkRequest::ProbeLiveStatus, self.load_selected()]
                } else {
                    vec![NetworkRequest::ProbeLiveStatus]
                }
            }
        }
    }

    fn focused_game(&self, round: u32) -> Option<&GameRecord> {
        let board = self.focused_board?;
        self.state.games(round).iter().find(|g| g.board == board)
    }

    pub fn poll_control(&self) -> PollControl {
        PollControl {
            paused: self.state.paused,
            round_finished: self.state.round_finished(self.state.selected_round()),
        }
    }

    pub async fn flush_previews(&self) -> usize {
        self.previews.flush().await
    }
}
