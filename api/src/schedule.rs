//! Round schedule and liveness: what is being played right now.

use crate::{GameRecord, TournamentInfo};
use chrono::{DateTime, Duration, Utc};

/// Below this an epoch value is in seconds, not milliseconds.
const EPOCH_SECONDS_CUTOFF: i64 = 100_000_000_000;

/// A game with no update for this long is not considered live on activity alone.
pub const LIVE_FRESHNESS_MINUTES: i64 = 20;

const LIVE_STATUSES: [&str; 5] = ["live", "playing", "ongoing", "started", "in_progress"];

pub fn normalize_epoch_ms(value: i64) -> i64 {
    if value.abs() < EPOCH_SECONDS_CUTOFF {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Whether a game is in progress.
///
/// A recorded result always wins. Otherwise an explicit live status or flag
/// decides, and failing that, moves or a running clock seen within the
/// freshness window.
pub fn is_game_live(game: &GameRecord, now: DateTime<Utc>) -> bool {
    if game.is_finished() {
        return false;
    }
    let status = game.status.as_deref().map(str::trim).unwrap_or_default();
    if crate::GameResult::from_token(status).is_some() {
        return false;
    }
    if LIVE_STATUSES.iter().any(|s| status.eq_ignore_ascii_case(s)) || game.is_live {
        return true;
    }
    let active = game.has_moves() || game.has_running_clock();
    let fresh = game
        .updated_at
        .is_some_and(|t| now - t < Duration::minutes(LIVE_FRESHNESS_MINUTES));
    active && fresh
}

/// Live-status probe derived from tournament metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStatus {
    pub live_round: Option<u32>,
    pub latest_finished: Option<u32>,
    pub next_round: Option<u32>,
    pub next_round_at_ms: Option<i64>,
    pub total_rounds: u32,
}

impl LiveStatus {
    pub fn from_tournament(info: &TournamentInfo, now_ms: i64) -> Self {
        let live_round = info
            .rounds
            .iter()
            .filter(|r| r.ongoing && !r.finished)
            .map(|r| r.number)
            .max();

        let latest_finished = info.rounds.iter().filter(|r| r.finished).map(|r| r.number).max();

        let next = info
            .rounds
            .iter()
            .filter(|r| !r.finished && !r.ongoing)
            .filter_map(|r| r.starts_at_ms.map(|at| (r.number, normalize_epoch_ms(at))))
            .filter(|(_, at)| *at >= now_ms)
            .min_by_key(|(_, at)| *at);

        Self {
            live_round,
            latest_finished,
            next_round: next.map(|(n, _)| n),
            next_round_at_ms: next.map(|(_, at)| at),
            total_rounds: info.rounds.iter().map(|r| r.number).max().unwrap_or(0),
        }
    }

    /// Minutes until the next round starts, rounded up.
    pub fn minutes_until_next(&self, now_ms: i64) -> Option<i64> {
        self.next_round_at_ms
            .map(|at| ((at - now_ms).max(0) + 59_999) / 60_000)
    }
}
