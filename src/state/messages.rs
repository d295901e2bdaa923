use crate::cache::preview_cache::RoundPreviews;
use broadcast_api::feed::FeedSource;
use broadcast_api::schedule::LiveStatus;
use broadcast_api::{GameRecord, TournamentInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRequest {
    LoadRound { round: u32, force: bool },
    ProbeLiveStatus,
    /// One-time preview hydration: persisted tier, then PGN.
    HydrateRound { round: u32, round_id: Option<String> },
    RefreshGame { round: u32, game_id: String },
    /// Drop the persisted baseline and last-good view, then reload.
    InvalidateRound { round: u32 },
    /// Drop every persisted round for the tournament, then reload `round`.
    InvalidateTournament { round: u32 },
}

#[derive(Debug)]
pub enum NetworkResponse {
    RoundLoaded {
        tournament_key: String,
        round: u32,
        games: Vec<GameRecord>,
        source: FeedSource,
        stale: bool,
        round_id: Option<String>,
    },
    RoundHydrated {
        tournament_key: String,
        round: u32,
        previews: RoundPreviews,
        /// Read back from the persisted tier rather than computed from PGN.
        persisted: bool,
        /// Round games from the archive, for metadata backfill.
        archive: Vec<GameRecord>,
    },
    LiveStatusLoaded {
        tournament_key: String,
        info: TournamentInfo,
        status: LiveStatus,
    },
    GameRefreshed {
        tournament_key: String,
        round: u32,
        game: GameRecord,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Games,
    LiveOverlay,
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    AppStarted,
    PollTick(PollKind),
    SelectRound(u32),
    /// Follow one board with the single-game refresh.
    FocusBoard(Option<u32>),
    ResetRound,
    Reload,
    ClearCache,
    TogglePause,
    Quit,
}
