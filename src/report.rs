//! Plain-text rendering of the selected round.

use crate::state::app_state::AppState;
use broadcast_api::GameRecord;
use broadcast_api::preview::format_clock;
use chrono::{DateTime, Utc};
use std::fmt::Write;

fn status_column(game: &GameRecord) -> String {
    match game.result() {
        Some(result) => result.pgn_token().to_string(),
        None if game.is_live => "live".to_string(),
        None => "-".to_string(),
    }
}

fn clock_column(game: &GameRecord, now: DateTime<Utc>) -> String {
    let (white, black) = game.clock_now(now);
    match (white, black) {
        (None, None) => String::new(),
        (w, b) => format!(
            "{} | {}",
            w.map(format_clock).unwrap_or_else(|| "--".into()),
            b.map(format_clock).unwrap_or_else(|| "--".into())
        ),
    }
}

pub fn render_game(game: &GameRecord, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{:>3}. {:<32} {:>7}  {:<32}",
        game.board,
        game.white.display(),
        status_column(game),
        game.black.display(),
    );
    let clocks = clock_column(game, now);
    if !clocks.is_empty() {
        let _ = write!(line, "  {clocks}");
    }
    if let Some(last) = game.preview_last_move.as_deref().or(game.last_move.as_deref()) {
        let _ = write!(line, "  [{last}]");
    }
    line.trim_end().to_string()
}

pub fn render_round(state: &AppState, now: DateTime<Utc>) -> String {
    let round = state.selected_round();
    let selection = &state.selection;
    let mut out = format!(
        "{} | {} | Round {round}",
        selection.primary_text, selection.secondary_text
    );
    if selection.preferred_open_round != round {
        let _ = write!(out, " (auto: {})", selection.preferred_open_round);
    }
    if let Some(meta) = state.meta.get(&round) {
        let _ = write!(out, " via {}", meta.source);
        if meta.stale {
            out.push_str(" (stale)");
        }
    }
    if state.paused {
        out.push_str(" [paused]");
    }

    let games = state.games(round);
    if games.is_empty() {
        out.push_str("\n  no games yet");
    }
    for game in games {
        out.push_str("\n  ");
        out.push_str(&render_game(game, now));
    }
    if let Some(err) = &state.last_error {
        let _ = write!(out, "\n  ! {err}");
    }
    out
}
