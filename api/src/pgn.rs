//! Multi-game PGN ingestion: round PGNs, official feeds and tournament archives.

use crate::preview::{extract_clocks, resolve_preview};
use crate::{GameRecord, GameResult, Player, schedule};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*\[\s*([A-Za-z0-9_]+)\s+"((?:[^"\\]|\\.)*)"\s*\]"#).unwrap());

/// Split a multi-game PGN into per-game chunks.
///
/// A new game starts at a header line that follows movetext, or at a header
/// that repeats within the current header block.
pub fn split_games(pgn: &str) -> Vec<String> {
    let mut games = Vec::new();
    let mut current = String::new();
    let mut seen_movetext = false;
    let mut seen_tags: HashSet<String> = HashSet::new();

    for line in pgn.lines() {
        let trimmed = line.trim();
        if let Some(caps) = TAG_RE.captures(trimmed) {
            let name = caps[1].to_string();
            if seen_movetext || seen_tags.contains(&name) {
                if !current.trim().is_empty() {
                    games.push(std::mem::take(&mut current));
                }
                current.clear();
                seen_movetext = false;
                seen_tags.clear();
            }
            seen_tags.insert(name);
        } else if !trimmed.is_empty() {
            seen_movetext = true;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        games.push(current);
    }
    games
}

/// Header tags of one game, unescaped.
pub fn read_tags(game: &str) -> HashMap<String, String> {
    game.lines()
        .filter_map(|line| TAG_RE.captures(line))
        .map(|caps| (caps[1].to_string(), caps[2].replace("\\\"", "\"").replace("\\\\", "\\")))
        .collect()
}

/// `"5.3"` → `(Some(5), Some(3))`, `"5"` → `(Some(5), None)`, `"?"` → `(None, None)`.
pub fn parse_round_tag(value: &str) -> (Option<u32>, Option<u32>) {
    let mut parts = value.trim().splitn(2, '.');
    let round = parts.next().and_then(|r| r.trim().parse().ok());
    let board = parts.next().and_then(|b| b.trim().parse().ok());
    (round, board)
}

/// Upstream game ID from a `GameURL` or a game-page `Site`.
fn game_id(tags: &HashMap<String, String>) -> Option<String> {
    let url = tags
        .get("GameURL")
        .or_else(|| tags.get("Site").filter(|s| s.starts_with("http")))?;
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
}

fn player(tags: &HashMap<String, String>, side: &str) -> Player {
    let tag = |suffix: &str| {
        tags.get(&format!("{side}{suffix}"))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty() && *v != "?" && *v != "-")
            .map(str::to_string)
    };
    Player {
        name: tag("").unwrap_or_default(),
        title: tag("Title").unwrap_or_default(),
        rating: tag("Elo").and_then(|e| e.parse().ok()).unwrap_or(0),
        federation: tag("Fed").or_else(|| tag("Federation")).unwrap_or_default(),
    }
}

/// Build game records from a (possibly multi-game) PGN.
///
/// `default_round` is used when a game has no usable `Round` tag; boards
/// without `Board` or a `Round` sub-number are numbered by position.
pub fn parse_games(pgn: &str, default_round: u32, now: DateTime<Utc>) -> Vec<GameRecord> {
    split_games(pgn)
        .into_iter()
        .enumerate()
        .filter_map(|(index, chunk)| parse_game(&chunk, index, default_round, now))
        .collect()
}

fn parse_game(
    chunk: &str,
    index: usize,
    default_round: u32,
    now: DateTime<Utc>,
) -> Option<GameRecord> {
    let tags = read_tags(chunk);
    let white = player(&tags, "White");
    let black = player(&tags, "Black");
    if white.name.is_empty() && black.name.is_empty() {
        return None;
    }

    let (round, sub_board) = tags.get("Round").map_or((None, None), |r| parse_round_tag(r));
    let round = round.filter(|r| *r > 0).unwrap_or(default_round);
    let board = tags
        .get("Board")
        .and_then(|b| b.trim().parse().ok())
        .or(sub_board)
        .unwrap_or(index as u32 + 1);

    let mut game = GameRecord::new(round, board, &white.name, &black.name);
    game.white = white;
    game.black = black;
    if let Some(id) = game_id(&tags) {
        game.id = id;
    }
    game.pgn = chunk.to_string();

    let preview = resolve_preview(chunk, tags.get("FEN").map(String::as_str), &[]);
    game.set_preview(&preview);
    game.fen = preview.fen.clone();
    game.last_move = preview.last_move_uci.clone();

    let clocks = extract_clocks(chunk, preview.fen.as_deref());
    if clocks.white_seconds.is_some() || clocks.black_seconds.is_some() {
        game.white_clock = clocks.white;
        game.black_clock = clocks.black;
        game.white_seconds = clocks.white_seconds;
        game.black_seconds = clocks.black_seconds;
        game.clock_captured_at = Some(now);
    }

    let result_tag = tags.get("Result").map(|r| r.trim().to_string());
    game.updated_at = Some(now);
    match result_tag.as_deref().and_then(GameResult::from_token) {
        Some(result) => game.finish(result),
        None if schedule::is_game_live(&game, now) => game.mark_live(),
        None => {}
    }
    game.status = result_tag;

    Some(game)
}

/// Keep only the games of `round`, ordered by board.
pub fn filter_round(games: Vec<GameRecord>, round: u32) -> Vec<GameRecord> {
    let mut games: Vec<GameRecord> = games.into_iter().filter(|g| g.round == round).collect();
    games.sort_by_key(|g| g.board);
    games
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ROUND_PGN: &str = r#"[Event "Candidates 2026"]
[Site "https://lichess.org/broadcast/-/-/abcd1234/Gm0001aa"]
[Round "5.1"]
[White "Carlsen, Magnus"]
[Black "Nakamura, Hikaru"]
[WhiteTitle "GM"]
[WhiteElo "2837"]
[BlackElo "2804"]
[WhiteFed "NOR"]
[Result "1-0"]
[GameURL "https://lichess.org/broadcast/-/-/abcd1234/Gm0001aa"]

1. e4 { [%clk 1:59:50] } e5 { [%clk 1:59:41] } 2. Nf3 { [%clk 1:58:00] } 1-0

[Event "Candidates 2026"]
[Round "5.2"]
[White "Gukesh D"]
[Black "So, Wesley"]
[Result "*"]

1. d4 { [%clk 1:59:00] } d5 { [%clk 1:58:30] } *

[Event "Candidates 2026"]
[Round "5.3"]
[White "Wei Yi"]
[Black "Giri, Anish"]
[Result "*"]

*
"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 15, 0, 0).unwrap()
    }

    #[test]
    fn splits_on_header_after_movetext() {
        assert_eq!(split_games(ROUND_PGN).len(), 3);
    }

    #[test]
    fn round_tag_carries_board_number() {
        assert_eq!(parse_round_tag("5.3"), (Some(5), Some(3)));
        assert_eq!(parse_round_tag("12"), (Some(12), None));
        assert_eq!(parse_round_tag("?"), (None, None));
    }

    #[test]
    fn maps_headers_results_and_clocks() {
        let games = parse_games(ROUND_PGN, 1, now());
        assert_eq!(games.len(), 3);

        let first = &games[0];
        assert_eq!((first.round, first.board), (5, 1));
        assert_eq!(first.id, "Gm0001aa");
        assert_eq!(first.white.title, "GM");
        assert_eq!(first.white.rating, 2837);
        assert_eq!(first.white.federation, "NOR");
        assert_eq!(first.result(), Some(GameResult::WhiteWins));
        assert!(!first.is_live);
        assert_eq!(first.last_move.as_deref(), Some("g1f3"));
        assert_eq!(first.white_seconds, Some(7080));
        assert_eq!(first.black_seconds, Some(7181));

        let second = &games[1];
        assert_eq!(second.board, 2);
        assert!(second.is_live, "in-progress game with moves is live");
        assert_eq!(second.status.as_deref(), Some("*"));

        let third = &games[2];
        assert!(!third.is_live, "no moves and no clock is not live");
        assert!(third.preview_fen.is_none());
    }

    #[test]
    fn missing_round_tag_uses_default_and_position() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n1. e4 *\n\n[White \"C\"]\n[Black \"D\"]\n\n*\n";
        let games = parse_games(pgn, 4, now());
        assert_eq!(games.iter().map(|g| (g.round, g.board)).collect::<Vec<_>>(), vec![(4, 1), (4, 2)]);
    }

    #[test]
    fn filter_round_keeps_requested_round_only() {
        let pgn = "[Round \"2.2\"]\n[White \"A\"]\n[Black \"B\"]\n\n*\n\n\
                   [Round \"3.1\"]\n[White \"C\"]\n[Black \"D\"]\n\n*\n\n\
                   [Round \"2.1\"]\n[White \"E\"]\n[Black \"F\"]\n\n*\n";
        let games = filter_round(parse_games(pgn, 1, now()), 2);
        assert_eq!(games.iter().map(|g| g.board).collect::<Vec<_>>(), vec![1, 2]);
    }
}
