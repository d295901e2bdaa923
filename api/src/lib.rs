pub mod client;
pub mod feed;
pub mod lichess;
pub mod merge;
pub mod pgn;
pub mod preview;
pub mod roster;
pub mod schedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use preview::{Preview, PreviewSource};

/// Piece placement of the standard starting position.
pub const STARTING_BOARD: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

// ---------------------------------------------------------------------------
// Domain types, independent of Lichess and PGN wire formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TournamentInfo {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub rounds: Vec<RoundInfo>,
}

impl TournamentInfo {
    pub fn round(&self, number: u32) -> Option<&RoundInfo> {
        self.rounds.iter().find(|r| r.number == number)
    }
}

/// One round as announced by the broadcast metadata endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub number: u32,
    /// Upstream opaque round ID, distinct from the ordinal `number`.
    pub id: String,
    pub name: String,
    pub slug: String,
    pub url: Option<String>,
    /// Always milliseconds since the epoch once mapped.
    pub starts_at_ms: Option<i64>,
    pub finished: bool,
    pub ongoing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub title: String,
    pub rating: u16,
    pub federation: String,
}

impl Player {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn display(&self) -> String {
        match (self.title.is_empty(), self.rating) {
            (true, 0) => self.name.clone(),
            (true, r) => format!("{} ({r})", self.name),
            (false, 0) => format!("{} {}", self.title, self.name),
            (false, r) => format!("{} {} ({r})", self.title, self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    /// Parse a PGN / feed result token. `*` and anything unknown are unresolved.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "1-0" => Some(GameResult::WhiteWins),
            "0-1" => Some(GameResult::BlackWins),
            "1/2-1/2" | "½-½" | "0.5-0.5" => Some(GameResult::Draw),
            _ => None,
        }
    }

    /// Parse a per-side result pair (`"1"`, `"0"`, `"½"`).
    pub fn from_sides(white: &str, black: &str) -> Option<Self> {
        let side = |s: &str| match s.trim() {
            "1" => Some(2u8),
            "0" => Some(0u8),
            "½" | "1/2" | "0.5" => Some(1u8),
            _ => None,
        };
        match (side(white)?, side(black)?) {
            (2, 0) => Some(GameResult::WhiteWins),
            (0, 2) => Some(GameResult::BlackWins),
            (1, 1) => Some(GameResult::Draw),
            _ => None,
        }
    }

    pub fn white_token(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1",
            GameResult::BlackWins => "0",
            GameResult::Draw => "½",
        }
    }

    pub fn black_token(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "0",
            GameResult::BlackWins => "1",
            GameResult::Draw => "½",
        }
    }

    pub fn pgn_token(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

/// One chess game within a round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Upstream game ID when a feed supplies one, otherwise the row key.
    pub id: String,
    pub round: u32,
    pub board: u32,
    pub white: Player,
    pub black: Player,
    pub is_live: bool,
    /// Raw upstream status string ("*", "playing", "1-0", ...).
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    result: Option<GameResult>,
    pub fen: Option<String>,
    #[serde(default)]
    pub pgn: String,
    /// SAN or UCI tokens when a feed ships a move list instead of PGN.
    #[serde(default)]
    pub moves: Vec<String>,
    pub last_move: Option<String>,
    pub preview_fen: Option<String>,
    pub preview_last_move: Option<String>,
    #[serde(default)]
    pub preview_source: PreviewSource,
    pub white_clock: Option<String>,
    pub black_clock: Option<String>,
    pub white_seconds: Option<u32>,
    pub black_seconds: Option<u32>,
    pub clock_captured_at: Option<DateTime<Utc>>,
    /// Last time a live feed touched this record.
    pub updated_at: Option<DateTime<Utc>>,
}

impl GameRecord {
    pub fn new(round: u32, board: u32, white: &str, black: &str) -> Self {
        let mut game = Self {
            round,
            board,
            white: Player::named(white.trim()),
            black: Player::named(black.trim()),
            ..Self::default()
        };
        game.id = game.row_key();
        game
    }

    /// Stable join key between live data and the preview cache.
    pub fn row_key(&self) -> String {
        row_key(self.round, &self.white.name, &self.black.name)
    }

    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    pub fn white_result(&self) -> Option<&'static str> {
        self.result.map(|r| r.white_token())
    }

    pub fn black_result(&self) -> Option<&'static str> {
        self.result.map(|r| r.black_token())
    }

    /// Record a final result. A finished game is never live.
    pub fn finish(&mut self, result: GameResult) {
        self.result = Some(result);
        self.is_live = false;
    }

    /// Mark the game as in progress. A live game has no result.
    pub fn mark_live(&mut self) {
        self.result = None;
        self.is_live = true;
    }

    pub fn clear_result(&mut self) {
        self.result = None;
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn set_preview(&mut self, preview: &Preview) {
        self.preview_fen = preview.fen.clone();
        self.preview_last_move = preview.last_move_uci.clone();
        self.preview_source = preview.source;
    }

    /// Number of plies known for this game, from whichever representation is longest.
    pub fn ply_count(&self) -> usize {
        let from_pgn = if self.pgn.trim().is_empty() {
            0
        } else {
            preview::mainline_tokens(&self.pgn).len()
        };
        from_pgn.max(self.moves.len())
    }

    /// Whether any move has been played, judged from every representation.
    pub fn has_moves(&self) -> bool {
        self.ply_count() > 0
            || self.last_move.as_deref().is_some_and(|m| !m.is_empty())
            || self.fen.as_deref().is_some_and(|f| !is_starting_fen(f))
    }

    pub fn has_running_clock(&self) -> bool {
        self.white_seconds.is_some_and(|s| s > 0) || self.black_seconds.is_some_and(|s| s > 0)
    }

    /// Best FEN to render: computed preview, then raw snapshot, then start.
    pub fn display_fen(&self) -> &str {
        self.preview_fen
            .as_deref()
            .or(self.fen.as_deref())
            .unwrap_or(STARTING_FEN)
    }

    /// Clock readings ticked forward from `clock_captured_at` for the side to move.
    pub fn clock_now(&self, now: DateTime<Utc>) -> (Option<u32>, Option<u32>) {
        let (white, black) = (self.white_seconds, self.black_seconds);
        if !self.is_live {
            return (white, black);
        }
        let Some(captured) = self.clock_captured_at else {
            return (white, black);
        };
        let elapsed = (now - captured).num_seconds().max(0);
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        match side_to_move(self.display_fen()) {
            Some(Side::White) => (white.map(|s| s.saturating_sub(elapsed)), black),
            Some(Side::Black) => (white, black.map(|s| s.saturating_sub(elapsed))),
            None => (white, black),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
}

/// Side to move read from the second FEN field.
pub fn side_to_move(fen: &str) -> Option<Side> {
    match fen.split_whitespace().nth(1) {
        Some("w") => Some(Side::White),
        Some("b") => Some(Side::Black),
        _ => None,
    }
}

pub fn is_starting_fen(fen: &str) -> bool {
    fen.split_whitespace().next() == Some(STARTING_BOARD)
}

/// Lowercase, drop `.` and `,`, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '.' && *c != ',')
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Order-insensitive name key so "Carlsen, Magnus" and "Magnus Carlsen" agree.
pub fn name_key(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    tokens.sort_unstable();
    tokens.join("_")
}

/// Composite row key `(round, white, black)`; identical for every data source.
pub fn row_key(round: u32, white: &str, black: &str) -> String {
    format!("{round}:{}:{}", name_key(white), name_key(black))
}
