//! Which round to show, and how to describe the tournament right now.

use broadcast_api::schedule::{LiveStatus, is_game_live, normalize_epoch_ms};
use broadcast_api::{GameRecord, TournamentInfo};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// A round starting within this window is preferred over finished rounds.
pub const STARTS_SOON_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TournamentPhase {
    Live { round: u32 },
    StartsSoon { round: u32, minutes: i64 },
    OngoingScheduled { next_round: u32, at_ms: i64 },
    OngoingGeneric { latest_finished: u32 },
    Completed,
    Upcoming { starts_at_ms: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    Red,
    Amber,
    Blue,
    Green,
    Grey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSelectionState {
    pub primary_text: String,
    pub secondary_text: String,
    pub status_color: StatusColor,
    pub selected_round: u32,
    /// Round auto-selection would open; differs from `selected_round` after a manual pick.
    pub preferred_open_round: u32,
}

/// Combine the live-status probe with what the cached games say.
///
/// Probe values win; cached games fill what the probe leaves open.
pub fn summarize_rounds(
    probe: Option<&LiveStatus>,
    info: Option<&TournamentInfo>,
    cached: &BTreeMap<u32, Vec<GameRecord>>,
    now: DateTime<Utc>,
) -> LiveStatus {
    let mut status = match (probe, info) {
        (Some(probe), _) => probe.clone(),
        (None, Some(info)) => LiveStatus::from_tournament(info, now.timestamp_millis()),
        (None, None) => LiveStatus::default(),
    };

    if status.live_round.is_none() {
        status.live_round = cached
            .iter()
            .filter(|(_, games)| games.iter().any(|g| is_game_live(g, now)))
            .map(|(round, _)| *round)
            .max();
    }

    let cached_finished = cached
        .iter()
        .filter(|(_, games)| round_has_finished(games, now))
        .map(|(round, _)| *round)
        .max();
    status.latest_finished = status.latest_finished.max(cached_finished);

    let cached_total = cached.keys().copied().max().unwrap_or(0);
    status.total_rounds = status.total_rounds.max(cached_total);
    status.next_round_at_ms = status.next_round_at_ms.map(normalize_epoch_ms);
    status
}

/// A round is over once it has started and none of its games is live.
fn round_has_finished(games: &[GameRecord], now: DateTime<Utc>) -> bool {
    games.iter().any(|g| g.has_moves() || g.is_finished()) && !games.iter().any(|g| is_game_live(g, now))
}

/// Highest active round, else a round starting within the hour, else the
/// highest finished round, else round 1.
pub fn default_round(status: &LiveStatus, now_ms: i64) -> u32 {
    if let Some(live) = status.live_round {
        return live;
    }
    if let (Some(next), Some(minutes)) = (status.next_round, status.minutes_until_next(now_ms))
        && minutes <= STARTS_SOON_MINUTES
    {
        return next;
    }
    status.latest_finished.unwrap_or(1).max(1)
}

pub fn classify(status: &LiveStatus, now_ms: i64) -> TournamentPhase {
    if let Some(round) = status.live_round {
        return TournamentPhase::Live { round };
    }
    if let (Some(round), Some(minutes)) = (status.next_round, status.minutes_until_next(now_ms))
        && minutes <= STARTS_SOON_MINUTES
    {
        return TournamentPhase::StartsSoon { round, minutes };
    }
    match status.latest_finished {
        Some(finished) if status.total_rounds > 0 && finished >= status.total_rounds => {
            TournamentPhase::Completed
        }
        Some(finished) => match (status.next_round, status.next_round_at_ms) {
            (Some(next_round), Some(at_ms)) => TournamentPhase::OngoingScheduled { next_round, at_ms },
            _ => TournamentPhase::OngoingGeneric { latest_finished: finished },
        },
        None => TournamentPhase::Upcoming { starts_at_ms: status.next_round_at_ms },
    }
}

fn format_start(at_ms: i64) -> String {
    Utc.timestamp_millis_opt(at_ms)
        .single()
        .map(|at| at.format("%a %d %b %H:%M UTC").to_string())
        .unwrap_or_else(|| "time TBA".to_string())
}

pub fn describe(phase: TournamentPhase, status: &LiveStatus) -> (String, String, StatusColor) {
    match phase {
        TournamentPhase::Live { round } => {
            ("LIVE".into(), format!("Round {round} in progress"), StatusColor::Red)
        }
        TournamentPhase::StartsSoon { round, minutes } => (
            format!("Starts in {minutes}m"),
            format!("Round {round}"),
            StatusColor::Amber,
        ),
        TournamentPhase::OngoingScheduled { next_round, at_ms } => (
            "Ongoing".into(),
            format!("Round {next_round} starts {}", format_start(at_ms)),
            StatusColor::Blue,
        ),
        TournamentPhase::OngoingGeneric { latest_finished } => {
            let secondary = if status.total_rounds > 0 {
                format!("Round {latest_finished} of {} complete", status.total_rounds)
            } else {
                format!("Round {latest_finished} complete")
            };
            ("Ongoing".into(), secondary, StatusColor::Blue)
        }
        TournamentPhase::Completed => (
            "Completed".into(),
            format!("All {} rounds played", status.total_rounds),
            StatusColor::Green,
        ),
        TournamentPhase::Upcoming { starts_at_ms } => (
            "Upcoming".into(),
            starts_at_ms
                .map(|at| format!("Starts {}", format_start(at)))
                .unwrap_or_else(|| "Schedule TBA".into()),
            StatusColor::Grey,
        ),
    }
}

/// Auto-selects the default round until the user picks one.
#[derive(Debug, Clone, Default)]
pub struct RoundSelector {
    manual: Option<u32>,
}

impl RoundSelector {
    pub fn with_initial(round: Option<u32>) -> Self {
        Self { manual: round.filter(|r| *r > 0) }
    }

    pub fn select_manually(&mut self, round: u32) {
        self.manual = Some(round.max(1));
    }

    pub fn reset(&mut self) {
        self.manual = None;
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }

    pub fn evaluate(&self, status: &LiveStatus, now_ms: i64) -> RoundSelectionState {
        let preferred = default_round(status, now_ms);
        let phase = classify(status, now_ms);
        let (primary_text, secondary_text, status_color) = describe(phase, status);
        RoundSelectionState {
            primary_text,
            secondary_text,
            status_color,
            selected_round: self.manual.unwrap_or(preferred),
            preferred_open_round: preferred,
        }
    }
}
