//! Baseline/live reconciliation for one round.
//!
//! The baseline is the persisted, metadata-rich view of a round; live data is
//! whatever the latest poll produced. Metadata comes from the baseline, moves,
//! clocks and results from the freshest source that is at least as rich.

use crate::{GameRecord, GameResult, Player, is_starting_fen, row_key};
use log::debug;

/// Ordering used to decide whether a payload may overwrite another.
fn richness(game: &GameRecord) -> (usize, bool, usize) {
    let advanced_fen = game
        .fen
        .as_deref()
        .or(game.preview_fen.as_deref())
        .is_some_and(|f| !is_starting_fen(f));
    (game.ply_count(), advanced_fen, game.pgn.trim().len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Same,
    Swapped,
}

fn find_match(baseline: &[GameRecord], live: &GameRecord) -> Option<(usize, Orientation)> {
    if !live.id.is_empty()
        && let Some(idx) = baseline.iter().position(|b| b.id == live.id)
    {
        return Some((idx, Orientation::Same));
    }
    let key = live.row_key();
    if let Some(idx) = baseline.iter().position(|b| b.row_key() == key) {
        return Some((idx, Orientation::Same));
    }
    let swapped = row_key(live.round, &live.black.name, &live.white.name);
    baseline
        .iter()
        .position(|b| b.row_key() == swapped)
        .map(|idx| (idx, Orientation::Swapped))
}

fn fill_player(into: &mut Player, from: &Player) {
    if into.name.trim().is_empty() {
        into.name = from.name.clone();
    }
    if into.title.is_empty() {
        into.title = from.title.clone();
    }
    if into.rating == 0 {
        into.rating = from.rating;
    }
    if into.federation.is_empty() {
        into.federation = from.federation.clone();
    }
}

fn flip(result: GameResult) -> GameResult {
    match result {
        GameResult::WhiteWins => GameResult::BlackWins,
        GameResult::BlackWins => GameResult::WhiteWins,
        GameResult::Draw => GameResult::Draw,
    }
}

/// Live payload re-expressed in the baseline's colour orientation.
fn oriented(live: &GameRecord, orientation: Orientation) -> GameRecord {
    let mut live = live.clone();
    if orientation == Orientation::Swapped {
        std::mem::swap(&mut live.white, &mut live.black);
        std::mem::swap(&mut live.white_clock, &mut live.black_clock);
        std::mem::swap(&mut live.white_seconds, &mut live.black_seconds);
        if let Some(result) = live.result() {
            live.finish(flip(result));
        }
    }
    live
}

fn merge_pair(base: &GameRecord, live: &GameRecord, orientation: Orientation) -> GameRecord {
    let live = oriented(live, orientation);
    let mut out = base.clone();

    fill_player(&mut out.white, &live.white);
    fill_player(&mut out.black, &live.black);
    if out.board == 0 {
        out.board = live.board;
    }
    // Prefer an upstream ID over a synthesized row key.
    if out.id == out.row_key() && !live.id.is_empty() && live.id != live.row_key() {
        out.id = live.id.clone();
    }

    let live_is_richer = richness(&live) >= richness(base);
    if live_is_richer {
        out.fen = live.fen.clone();
        out.pgn = live.pgn.clone();
        out.moves = live.moves.clone();
        out.last_move = live.last_move.clone();
        out.preview_fen = live.preview_fen.clone();
        out.preview_last_move = live.preview_last_move.clone();
        out.preview_source = live.preview_source;
        if live.status.is_some() {
            out.status = live.status.clone();
        }
    } else {
        debug!("merge: keeping richer baseline for {}", base.row_key());
    }

    let has_clock = live.white_seconds.is_some() || live.black_seconds.is_some();
    let clock_is_older = matches!(
        (live.clock_captured_at, base.clock_captured_at),
        (Some(live_at), Some(base_at)) if live_at < base_at
    );
    if has_clock && live_is_richer && !clock_is_older {
        out.white_clock = live.white_clock.clone();
        out.black_clock = live.black_clock.clone();
        out.white_seconds = live.white_seconds;
        out.black_seconds = live.black_seconds;
        out.clock_captured_at = live.clock_captured_at;
    }
    out.updated_at = out.updated_at.max(live.updated_at);

    match live.result() {
        Some(result) => out.finish(result),
        None if live.is_live && live_is_richer => out.mark_live(),
        None => {}
    }

    out
}

/// Merge a live snapshot into a round baseline.
///
/// Unmatched baseline records pass through, unmatched live records are
/// appended. Output is ordered by `(round, board)`. Applying the same live
/// snapshot twice yields the same result.
pub fn merge(baseline: &[GameRecord], live: &[GameRecord]) -> Vec<GameRecord> {
    let mut out: Vec<GameRecord> = baseline.to_vec();
    let mut appended: Vec<GameRecord> = Vec::new();

    for game in live {
        match find_match(&out, game) {
            Some((idx, orientation)) => out[idx] = merge_pair(&out[idx], game, orientation),
            None => match find_match(&appended, game) {
                Some((idx, orientation)) => {
                    appended[idx] = merge_pair(&appended[idx], game, orientation)
                }
                None => appended.push(game.clone()),
            },
        }
    }

    out.extend(appended);
    out.sort_by_key(|g| (g.round, g.board));
    out
}

/// New baseline when live data looks complete and the current one does not.
///
/// Returns `None` when the existing baseline should be kept.
pub fn promote_on_completeness(
    baseline: Option<&[GameRecord]>,
    live: &[GameRecord],
    min_boards: usize,
) -> Option<Vec<GameRecord>> {
    if live.is_empty() || live.len() < min_boards.max(1) {
        return None;
    }
    match baseline {
        Some(existing) if existing.len() >= live.len() && existing.len() >= min_boards => None,
        Some(existing) => Some(merge(existing, live)),
        None => {
            let mut games = live.to_vec();
            games.sort_by_key(|g| (g.round, g.board));
            Some(games)
        }
    }
}

/// Fill empty player metadata from an archive. Never touches dynamic state.
pub fn backfill_metadata(games: &mut [GameRecord], archive: &[GameRecord]) -> usize {
    let mut filled = 0;
    for game in games.iter_mut() {
        let Some((idx, orientation)) = find_match(archive, game) else {
            continue;
        };
        let source = &archive[idx];
        let (white, black) = match orientation {
            Orientation::Same => (&source.white, &source.black),
            Orientation::Swapped => (&source.black, &source.white),
        };
        let before = (game.white.clone(), game.black.clone());
        fill_player(&mut game.white, white);
        fill_player(&mut game.black, black);
        if (game.white.clone(), game.black.clone()) != before {
            filled += 1;
        }
    }
    filled
}
