//! Best-effort board position for list-view rendering.
//!
//! A preview is computed from whatever a feed hands us: a full PGN, a
//! mangled movetext, a bare move list or only a FEN snapshot. Each step
//! below is tried in order and the first one that yields a position wins.

use crate::{Side, is_starting_fen, side_to_move};
use pgn_reader::{RawTag, Reader, SanPlus, Skip, Visitor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};
use std::borrow::Cow;
use std::ops::ControlFlow;
use std::sync::LazyLock;

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[%clk\s+(?:(\d+):)?(\d{1,2}):(\d{1,2})(?:\.\d+)?\s*\]").unwrap()
});

static FEN_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[\s*FEN\s+"([^"]+)"\s*\]"#).unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewSource {
    /// Full PGN parsed as-is.
    PgnParsed,
    /// PGN parsed after stripping comments, variations and annotations.
    PgnParsedRobust,
    /// Replayed from a move list up to the first bad token.
    #[serde(rename = "moves_array_recons")]
    MovesArray,
    /// Raw FEN snapshot from the feed.
    SnapshotFallback,
    #[default]
    None,
}

impl PreviewSource {
    pub fn label(&self) -> &'static str {
        match self {
            PreviewSource::PgnParsed => "pgn_parsed",
            PreviewSource::PgnParsedRobust => "pgn_parsed_robust",
            PreviewSource::MovesArray => "moves_array_recons",
            PreviewSource::SnapshotFallback => "snapshot_fallback",
            PreviewSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub fen: Option<String>,
    pub last_move_uci: Option<String>,
    pub source: PreviewSource,
    pub plies: usize,
}

impl Preview {
    fn none() -> Self {
        Self { fen: None, last_move_uci: None, source: PreviewSource::None, plies: 0 }
    }

    /// False means the caller should render the starting position.
    pub fn ok(&self) -> bool {
        self.fen.is_some()
    }
}

/// Resolve a preview position.
///
/// Order: direct PGN parse, sanitized re-parse, move-list replay, FEN snapshot.
pub fn resolve_preview(pgn: &str, fallback_fen: Option<&str>, moves: &[String]) -> Preview {
    if !pgn.trim().is_empty() {
        if let Some(replay) = parse_pgn(pgn)
            && replay.plies > 0
            && !replay.failed
        {
            return replay.into_preview(PreviewSource::PgnParsed);
        }

        let start = setup_position(pgn);
        let tokens = mainline_tokens(pgn);
        let replay = Replay::run(start, &tokens);
        if replay.plies > 0 && !replay.failed {
            return replay.into_preview(PreviewSource::PgnParsedRobust);
        }
    }

    if !moves.is_empty() {
        let replay = Replay::run(Chess::default(), moves);
        if replay.plies > 0 {
            return replay.into_preview(PreviewSource::MovesArray);
        }
    }

    if let Some(fen) = fallback_fen.map(str::trim)
        && !fen.is_empty()
        && !is_starting_fen(fen)
        && fen.parse::<Fen>().is_ok()
    {
        return Preview {
            fen: Some(fen.to_string()),
            last_move_uci: None,
            source: PreviewSource::SnapshotFallback,
            plies: 0,
        };
    }

    Preview::none()
}

// ---------------------------------------------------------------------------
// Direct parse via pgn-reader
// ---------------------------------------------------------------------------

struct Replay {
    pos: Chess,
    plies: usize,
    last_uci: Option<String>,
    failed: bool,
}

impl Replay {
    fn new(pos: Chess) -> Self {
        Self { pos, plies: 0, last_uci: None, failed: false }
    }

    /// Play tokens in order, stopping at the first one that does not apply.
    fn run<S: AsRef<str>>(start: Chess, tokens: &[S]) -> Self {
        let mut replay = Self::new(start);
        for token in tokens {
            if !replay.play_token(token.as_ref()) {
                replay.failed = true;
                break;
            }
        }
        replay
    }

    fn play_token(&mut self, token: &str) -> bool {
        let token = normalize_castling(token.trim());
        let by_san = token
            .parse::<SanPlus>()
            .ok()
            .and_then(|san| san.san.to_move(&self.pos).ok());
        let m = match by_san {
            Some(m) => m,
            None => match token.parse::<UciMove>().ok().and_then(|uci| uci.to_move(&self.pos).ok()) {
                Some(m) => m,
                None => return false,
            },
        };
        self.last_uci = Some(m.to_uci(CastlingMode::Standard).to_string());
        self.pos.play_unchecked(m);
        self.plies += 1;
        true
    }

    fn into_preview(self, source: PreviewSource) -> Preview {
        Preview {
            fen: Some(Fen::from_position(&self.pos, EnPassantMode::Legal).to_string()),
            last_move_uci: self.last_uci,
            source,
            plies: self.plies,
        }
    }
}

struct MainlineVisitor {
    replay: Replay,
    bad_setup: bool,
}

impl Visitor for MainlineVisitor {
    type Tags = Option<Chess>;
    type Movetext = ();
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        ControlFlow::Continue(None)
    }

    fn tag(
        &mut self,
        tags: &mut Self::Tags,
        name: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        if name == b"FEN" {
            match Fen::from_ascii(value.as_bytes())
                .ok()
                .and_then(|fen| fen.into_position(CastlingMode::Chess960).ok())
            {
                Some(pos) => *tags = Some(pos),
                None => self.bad_setup = true,
            }
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        self.replay = Replay::new(tags.unwrap_or_default());
        ControlFlow::Continue(())
    }

    fn san(&mut self, _movetext: &mut Self::Movetext, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        match san_plus.san.to_move(&self.replay.pos) {
            Ok(m) => {
                self.replay.last_uci = Some(m.to_uci(CastlingMode::Standard).to_string());
                self.replay.pos.play_unchecked(m);
                self.replay.plies += 1;
                ControlFlow::Continue(())
            }
            Err(_) => {
                self.replay.failed = true;
                ControlFlow::Break(())
            }
        }
    }

    fn begin_variation(&mut self, _movetext: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {}
}

/// Parse the first game of `pgn` as-is. `None` when the reader gives up.
fn parse_pgn(pgn: &str) -> Option<Replay> {
    let mut reader = Reader::new(pgn.as_bytes());
    let mut visitor = MainlineVisitor { replay: Replay::new(Chess::default()), bad_setup: false };
    match reader.read_game(&mut visitor) {
        Ok(Some(())) if !visitor.bad_setup => Some(visitor.replay),
        _ => None,
    }
}

fn setup_position(pgn: &str) -> Chess {
    FEN_TAG_RE
        .captures(pgn)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<Fen>().ok())
        .and_then(|fen| fen.into_position(CastlingMode::Chess960).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Sanitizer
// ---------------------------------------------------------------------------

/// Strip headers, `{}` comments, nested `()` variations, `;` line comments,
/// NAGs, glyphs, move numbers and result tokens, leaving `"e4 e5 Nf3"`.
pub fn sanitize_movetext(pgn: &str) -> String {
    mainline_tokens(pgn).join(" ")
}

pub fn mainline_tokens(pgn: &str) -> Vec<String> {
    let body = pgn
        .lines()
        .filter(|line| !line.trim_start().starts_with('['))
        .map(|line| line.split_once(';').map_or(line, |(before, _)| before))
        .collect::<Vec<_>>()
        .join(" ");

    let mut stripped = String::with_capacity(body.len());
    let mut in_comment = false;
    let mut depth = 0usize;
    for ch in body.chars() {
        if in_comment {
            if ch == '}' {
                in_comment = false;
                stripped.push(' ');
            }
            continue;
        }
        match ch {
            '{' => in_comment = true,
            '}' => stripped.push(' '),
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                stripped.push(' ');
            }
            _ if depth > 0 => {}
            _ => stripped.push(ch),
        }
    }

    stripped.split_whitespace().filter_map(clean_token).collect()
}

fn clean_token(raw: &str) -> Option<String> {
    if matches!(raw, "1-0" | "0-1" | "1/2-1/2" | "½-½" | "*") {
        return None;
    }
    if raw.starts_with('$') {
        return None;
    }
    // "12.", "12...", "12.e4"
    let token = raw.trim_start_matches(|c: char| c.is_ascii_digit());
    let token = if token.len() < raw.len() && token.starts_with('.') {
        token.trim_start_matches('.')
    } else if token.is_empty() {
        ""
    } else {
        raw
    };
    let token = token.trim_end_matches(['!', '?']);
    let token = token.split('$').next().unwrap_or_default();
    if token.is_empty() || token.chars().all(|c| c == '.') {
        return None;
    }
    Some(normalize_castling(token).into_owned())
}

fn normalize_castling(token: &str) -> Cow<'_, str> {
    if token.starts_with("0-0") {
        Cow::Owned(token.replace('0', "O"))
    } else {
        Cow::Borrowed(token)
    }
}

// ---------------------------------------------------------------------------
// Clock extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedClocks {
    pub white: Option<String>,
    pub black: Option<String>,
    pub white_seconds: Option<u32>,
    pub black_seconds: Option<u32>,
}

/// Read the last two `[%clk]` annotations and attribute them to each side.
///
/// The last annotation belongs to whoever just moved: with White to move in
/// `fen`, Black owns the last one and White the one before it. Without a FEN
/// the annotation count parity decides.
pub fn extract_clocks(pgn: &str, fen: Option<&str>) -> ExtractedClocks {
    let readings: Vec<u32> = CLOCK_RE
        .captures_iter(pgn)
        .filter_map(|caps| {
            let hours: u32 = caps.get(1).map_or(Ok(0), |h| h.as_str().parse()).ok()?;
            let minutes: u32 = caps.get(2)?.as_str().parse().ok()?;
            let seconds: u32 = caps.get(3)?.as_str().parse().ok()?;
            hours
                .checked_mul(3600)?
                .checked_add(minutes.checked_mul(60)?)?
                .checked_add(seconds)
        })
        .collect();

    let Some(&last) = readings.last() else {
        return ExtractedClocks::default();
    };
    let previous = readings.len().checked_sub(2).map(|i| readings[i]);

    let last_mover = match fen.and_then(side_to_move) {
        Some(Side::White) => Side::Black,
        Some(Side::Black) => Side::White,
        None if readings.len() % 2 == 1 => Side::White,
        None => Side::Black,
    };

    let (white_seconds, black_seconds) = match last_mover {
        Side::White => (Some(last), previous),
        Side::Black => (previous, Some(last)),
    };

    ExtractedClocks {
        white: white_seconds.map(format_clock),
        black: black_seconds.map(format_clock),
        white_seconds,
        black_seconds,
    }
}

/// `1:05:09` above an hour, `5:09` below.
pub fn format_clock(total_seconds: u32) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::STARTING_FEN;

    #[test]
    fn full_pgn_parses_directly() {
        let pgn = "[Event \"Test\"]\n[White \"A\"]\n[Black \"B\"]\n\n1. e4 e5 2. Nf3 Nc6 *";
        let preview = resolve_preview(pgn, None, &[]);
        assert!(preview.ok());
        assert_eq!(preview.source, PreviewSource::PgnParsed);
        assert_eq!(preview.plies, 4);
        assert_eq!(preview.last_move_uci.as_deref(), Some("b8c6"));
        let fen = preview.fen.unwrap();
        assert_ne!(fen, STARTING_FEN);
        assert!(fen.ends_with(" w KQkq - 2 3"), "unexpected fen {fen}");
    }

    #[test]
    fn last_move_is_four_char_uci_for_castling() {
        let pgn = "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. O-O";
        let preview = resolve_preview(pgn, None, &[]);
        assert_eq!(preview.last_move_uci.as_deref(), Some("e1g1"));
    }

    #[test]
    fn nested_variations_are_removed_entirely() {
        assert_eq!(sanitize_movetext("1. e4 (1. d4 d5) e5 2. Nf3"), "e4 e5 Nf3");
        assert_eq!(
            sanitize_movetext("1. e4 (1. d4 (1. c4 c5) d5) e5 $1 2. Nf3!? {good} 1-0"),
            "e4 e5 Nf3"
        );
        assert_eq!(mainline_tokens("1. e4 (1. d4 d5) e5 2. Nf3").len(), 3);
    }

    #[test]
    fn illegal_move_in_pgn_falls_back_to_move_list() {
        let pgn = "1. e4 e5 2. Ke3 Nc6";
        let moves: Vec<String> = ["e2e4", "e7e5", "g1f3", "zzzz", "b8c6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let preview = resolve_preview(pgn, None, &moves);
        assert_eq!(preview.source, PreviewSource::MovesArray);
        assert_eq!(preview.plies, 3);
        assert_eq!(preview.last_move_uci.as_deref(), Some("g1f3"));
    }

    #[test]
    fn unclosed_comment_is_recovered_by_sanitizer() {
        let pgn = "1. e4 e5 2. Nf3 } Nc6";
        let preview = resolve_preview(pgn, None, &[]);
        assert!(preview.ok());
        assert!(matches!(
            preview.source,
            PreviewSource::PgnParsed | PreviewSource::PgnParsedRobust
        ));
    }

    #[test]
    fn snapshot_fen_used_when_nothing_parses() {
        let fen = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";
        let preview = resolve_preview("", Some(fen), &[]);
        assert_eq!(preview.source, PreviewSource::SnapshotFallback);
        assert_eq!(preview.fen.as_deref(), Some(fen));
    }

    #[test]
    fn starting_snapshot_is_not_a_preview() {
        let preview = resolve_preview("garbage ???", Some(STARTING_FEN), &[]);
        assert!(!preview.ok());
        assert_eq!(preview.source, PreviewSource::None);
    }

    #[test]
    fn fen_header_sets_start_position() {
        let pgn = "[SetUp \"1\"]\n[FEN \"4k3/8/8/8/8/8/4P3/4K3 w - - 0 1\"]\n\n1. e4 Kd7";
        let preview = resolve_preview(pgn, None, &[]);
        assert_eq!(preview.source, PreviewSource::PgnParsed);
        assert_eq!(preview.last_move_uci.as_deref(), Some("e8d7"));
    }

    #[test]
    fn clocks_follow_side_to_move() {
        let pgn = "1. e4 { [%clk 1:59:50] } e5 { [%clk 1:59:41] } 2. Nf3 { [%clk 1:58:00] }";
        let black_to_move = "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2";
        let clocks = extract_clocks(pgn, Some(black_to_move));
        assert_eq!(clocks.white_seconds, Some(7080));
        assert_eq!(clocks.black_seconds, Some(7181));
        assert_eq!(clocks.white.as_deref(), Some("1:58:00"));

        let white_to_move = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";
        let clocks = extract_clocks("1. e4 {[%clk 0:10:00]} e5 {[%clk 0:09:30]}", Some(white_to_move));
        assert_eq!(clocks.black.as_deref(), Some("9:30"));
        assert_eq!(clocks.white.as_deref(), Some("10:00"));
    }

    #[test]
    fn clocks_tolerate_zero_and_one_annotation() {
        assert_eq!(extract_clocks("1. e4 e5", None), ExtractedClocks::default());
        let clocks = extract_clocks("1. e4 {[%clk 0:05:00]}", None);
        assert_eq!(clocks.white_seconds, Some(300));
        assert_eq!(clocks.black_seconds, None);
    }

    #[test]
    fn oversized_clock_reading_is_dropped() {
        assert_eq!(extract_clocks("1. e4 { [%clk 9999999:00:00] }", None), ExtractedClocks::default());
        let clocks = extract_clocks("1. e4 { [%clk 1:30:00] } e5 { [%clk 9999999:00:00] }", None);
        assert_eq!(clocks.white_seconds, Some(5400));
        assert_eq!(clocks.black_seconds, None);
    }
}
